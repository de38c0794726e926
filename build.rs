use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    gemini: Gemini,
    audio: Audio,
    tutor: Tutor,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Gemini {
    api_base: String,
    tts_model: String,
    chat_model: String,
    request_timeout_secs: u64,
    default_voice: String,
}

#[derive(Deserialize)]
struct Audio {
    sample_rate: u32,
    channels: u16,
    output_backend: String,
    playback_device: String,
    period_size: usize,
    wav_path: String,
    interrupt_previous: bool,
}

#[derive(Deserialize)]
struct Tutor {
    language: String,
    level: String,
    topic: String,
    auto_speak: bool,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 应用信息
    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // Gemini 服务配置
    println!("cargo:rustc-env=GEMINI_API_BASE={}", config.gemini.api_base);
    println!("cargo:rustc-env=GEMINI_TTS_MODEL={}", config.gemini.tts_model);
    println!("cargo:rustc-env=GEMINI_CHAT_MODEL={}", config.gemini.chat_model);
    println!("cargo:rustc-env=GEMINI_REQUEST_TIMEOUT_SECS={}", config.gemini.request_timeout_secs);
    println!("cargo:rustc-env=GEMINI_DEFAULT_VOICE={}", config.gemini.default_voice);

    // 音频配置
    println!("cargo:rustc-env=AUDIO_SAMPLE_RATE={}", config.audio.sample_rate);
    println!("cargo:rustc-env=AUDIO_CHANNELS={}", config.audio.channels);
    println!("cargo:rustc-env=AUDIO_OUTPUT_BACKEND={}", config.audio.output_backend);
    println!("cargo:rustc-env=AUDIO_PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=AUDIO_PERIOD_SIZE={}", config.audio.period_size);
    println!("cargo:rustc-env=AUDIO_WAV_PATH={}", config.audio.wav_path);
    println!("cargo:rustc-env=AUDIO_INTERRUPT_PREVIOUS={}", config.audio.interrupt_previous);

    // 对话配置
    println!("cargo:rustc-env=TUTOR_LANGUAGE={}", config.tutor.language);
    println!("cargo:rustc-env=TUTOR_LEVEL={}", config.tutor.level);
    println!("cargo:rustc-env=TUTOR_TOPIC={}", config.tutor.topic);
    println!("cargo:rustc-env=TUTOR_AUTO_SPEAK={}", config.tutor.auto_speak);
}

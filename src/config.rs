use std::path::PathBuf;

use crate::audio::{OutputBackend, OutputConfig};

#[derive(Debug, Clone)]
pub struct Config {
    // 应用信息
    pub app_name: &'static str,
    pub app_version: &'static str,

    // Gemini 服务配置（静态部分）
    pub api_base: &'static str,
    pub tts_model: &'static str,
    pub chat_model: &'static str,
    pub request_timeout_secs: u64,
    pub default_voice: &'static str,

    // API key 只从运行时环境变量读取，不编译进二进制
    pub api_key: Option<String>,

    // 音频输出配置
    pub output: OutputConfig,

    // 对话配置（可被命令行参数覆盖）
    pub language: String,
    pub level: String,
    pub topic: String,
    pub auto_speak: bool,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有静态参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            api_base: env!("GEMINI_API_BASE"),
            tts_model: env!("GEMINI_TTS_MODEL"),
            chat_model: env!("GEMINI_CHAT_MODEL"),
            request_timeout_secs: env!("GEMINI_REQUEST_TIMEOUT_SECS").parse()
                .map_err(|_| "Failed to parse GEMINI_REQUEST_TIMEOUT_SECS")?,
            default_voice: env!("GEMINI_DEFAULT_VOICE"),

            api_key: api_key_from_env(),

            output: OutputConfig {
                sample_rate: env!("AUDIO_SAMPLE_RATE").parse()
                    .map_err(|_| "Failed to parse AUDIO_SAMPLE_RATE")?,
                channels: env!("AUDIO_CHANNELS").parse()
                    .map_err(|_| "Failed to parse AUDIO_CHANNELS")?,
                backend: env!("AUDIO_OUTPUT_BACKEND").parse::<OutputBackend>()
                    .map_err(|_| "Failed to parse AUDIO_OUTPUT_BACKEND")?,
                playback_device: env!("AUDIO_PLAYBACK_DEVICE").to_string(),
                period_size: env!("AUDIO_PERIOD_SIZE").parse()
                    .map_err(|_| "Failed to parse AUDIO_PERIOD_SIZE")?,
                wav_path: PathBuf::from(env!("AUDIO_WAV_PATH")),
                interrupt_previous: env!("AUDIO_INTERRUPT_PREVIOUS").parse()
                    .map_err(|_| "Failed to parse AUDIO_INTERRUPT_PREVIOUS")?,
            },

            language: env!("TUTOR_LANGUAGE").to_string(),
            level: env!("TUTOR_LEVEL").to_string(),
            topic: env!("TUTOR_TOPIC").to_string(),
            auto_speak: env!("TUTOR_AUTO_SPEAK").parse()
                .map_err(|_| "Failed to parse TUTOR_AUTO_SPEAK")?,
        })
    }
}

/// GEMINI_API_KEY 优先，其次 API_KEY；空字符串视为未设置
fn api_key_from_env() -> Option<String> {
    ["GEMINI_API_KEY", "API_KEY"]
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_time_config_parses() {
        let config = Config::new().unwrap();
        assert!(!config.api_base.is_empty());
        assert!(config.request_timeout_secs > 0);
        assert_eq!(config.output.sample_rate, 24000);
        assert_eq!(config.output.channels, 1);
        assert!(config.default_voice.parse::<crate::synthesis::Voice>().is_ok());
    }
}

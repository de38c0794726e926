mod audio;
mod cli;
mod config;
mod controller;
mod error;
mod gemini;
mod protocol;
mod synthesis;
mod tutor;

use anyhow::{Context, Result};
use audio::{AudioPlaybackController, PlaybackHandle, PlaybackState};
use clap::Parser;
use cli::{Args, Command};
use config::Config;
use controller::{ChatSession, LESSONS, find_lesson};
use gemini::{GeminiClient, GenerativeBackend};
use std::sync::Arc;
use synthesis::{SpeechSynthesisClient, Voice};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tutor::{ChatContext, TutorClient};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    cli::init_logging(&args);

    // 加载配置
    let config = Config::new().map_err(anyhow::Error::msg)?;
    log::info!("{} v{} starting", config.app_name, config.app_version);

    match args.command {
        Command::Voices => {
            for voice in Voice::ALL {
                println!("{}", voice);
            }
            Ok(())
        }
        Command::Speak { text, voice } => {
            let voice = resolve_voice(voice.as_deref(), &config)?;
            let backend: Arc<dyn GenerativeBackend> = Arc::new(GeminiClient::from_config(&config)?);
            let playback = Arc::new(AudioPlaybackController::from_config(config.output.clone())?);

            log::info!("Playback policy: {:?}", playback.policy());
            let result = run_speak(&config, backend, &playback, &text, voice).await;
            playback.shutdown().await;
            result
        }
        Command::Chat { language, level, topic, voice, auto_speak } => {
            let voice = resolve_voice(voice.as_deref(), &config)?;
            let context = ChatContext {
                language: language.unwrap_or_else(|| config.language.clone()),
                level: level.unwrap_or_else(|| config.level.clone()),
                topic: topic.unwrap_or_else(|| config.topic.clone()),
            };
            let backend: Arc<dyn GenerativeBackend> = Arc::new(GeminiClient::from_config(&config)?);
            let playback = Arc::new(AudioPlaybackController::from_config(config.output.clone())?);

            let session = ChatSession::new(
                context,
                TutorClient::new(backend.clone(), config.chat_model),
                SpeechSynthesisClient::new(backend, config.tts_model),
                playback.clone(),
                voice,
            );
            let result = run_chat(session, auto_speak || config.auto_speak).await;
            playback.shutdown().await;
            result
        }
    }
}

fn resolve_voice(requested: Option<&str>, config: &Config) -> Result<Voice> {
    let name = requested.unwrap_or(config.default_voice);
    name.parse::<Voice>()
        .context("Run `lingua_voice_rs voices` to list valid names")
}

async fn run_speak(
    config: &Config,
    backend: Arc<dyn GenerativeBackend>,
    playback: &AudioPlaybackController,
    text: &str,
    voice: Voice,
) -> Result<()> {
    let speech = SpeechSynthesisClient::new(backend, config.tts_model);
    let buffer = speech.synthesize(text, voice).await?;
    let handle = playback.speak(buffer).await?;
    println!("Playing {:.1}s with voice {} (Ctrl+C to stop)", handle.duration().as_secs_f32(), voice);

    tokio::select! {
        finished = handle.completed() => {
            log::info!("Playback {} finished (completed={})", handle.id(), finished);
        }
        _ = signal::ctrl_c() => {
            println!("Received Ctrl+C, stopping playback...");
            handle.stop();
        }
    }
    Ok(())
}

// 没有正在播放的音频时永远挂起，让 select! 忽略这一分支
async fn playback_finished(handle: Option<&PlaybackHandle>) -> PlaybackState {
    match handle {
        Some(handle) => handle.wait().await,
        None => std::future::pending().await,
    }
}

async fn speak_reply(session: &ChatSession, current: &mut Option<PlaybackHandle>) {
    match session.speak_last_reply().await {
        Ok(handle) => *current = Some(handle),
        Err(e) => eprintln!("(audio unavailable: {:#})", e),
    }
}

async fn run_chat(mut session: ChatSession, auto_speak: bool) -> Result<()> {
    let context = session.context().clone();
    println!(
        "Practicing {} ({}), topic: {}. Commands: /speak, /lesson <title>, /lessons, /quit",
        context.language, context.level, context.topic
    );
    if let Some(greeting) = session.last_reply() {
        println!("Tutor: {}", greeting);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut current: Option<PlaybackHandle> = None;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                println!("Received Ctrl+C, shutting down...");
                if let Some(handle) = current.take() {
                    handle.stop();
                }
                break;
            }

            state = playback_finished(current.as_ref()) => {
                log::debug!("Reply playback ended: {:?}", state);
                current = None;
            }

            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                let line = line.trim();

                match line {
                    "" => {}
                    "/quit" => break,
                    "/speak" => speak_reply(&session, &mut current).await,
                    "/lessons" => {
                        for lesson in LESSONS.iter() {
                            println!("  {} - {}", lesson.title, lesson.description);
                        }
                    }
                    _ if line.starts_with("/lesson") => {
                        let query = line.trim_start_matches("/lesson");
                        match find_lesson(query) {
                            Some(lesson) => {
                                session.start_lesson(lesson.title, lesson.description);
                                if let Some(opener) = session.last_reply() {
                                    println!("Tutor: {}", opener);
                                }
                                if auto_speak {
                                    speak_reply(&session, &mut current).await;
                                }
                            }
                            None => println!("Unknown lesson, try /lessons"),
                        }
                    }
                    text => {
                        let Some(outcome) = session.send(text).await else {
                            continue;
                        };
                        println!("Tutor: {}", outcome.reply);
                        if let Some(correction) = outcome.correction {
                            println!("  Correction: {} ({})", correction.corrected, correction.explanation);
                        }
                        if auto_speak {
                            speak_reply(&session, &mut current).await;
                        }
                    }
                }
            }
        }
    }

    log::info!("Chat ended after {} turns", session.history().len());

    // 等待正在播放的回复结束再退出
    if let Some(handle) = current {
        if handle.is_active() {
            handle.wait().await;
        }
    }
    Ok(())
}

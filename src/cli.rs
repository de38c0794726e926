//! Command-line interface
//!
//! Argument parsing and logging configuration.

use clap::{Parser, Subcommand};
use log::LevelFilter;

/// Spoken language tutor backed by Gemini
#[derive(Parser, Debug)]
#[command(name = "lingua_voice_rs")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase logging verbosity
    /// -v = info, -vv = debug, -vvv = trace (includes HTTP internals)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Synthesize TEXT and play it
    Speak {
        text: String,

        /// Prebuilt voice name (see `voices`)
        #[arg(long)]
        voice: Option<String>,
    },

    /// Interactive tutoring conversation on stdin
    Chat {
        #[arg(long)]
        language: Option<String>,

        #[arg(long)]
        level: Option<String>,

        #[arg(long)]
        topic: Option<String>,

        #[arg(long)]
        voice: Option<String>,

        /// Speak every tutor reply
        #[arg(long)]
        auto_speak: bool,
    },

    /// List the available voices
    Voices,
}

impl Args {
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // 依赖库保持 warn，避免刷屏
    builder.filter_level(LevelFilter::Warn);
    builder.filter_module("lingua_voice_rs", args.log_level());

    if args.verbose >= 3 {
        builder.filter_module("reqwest", args.log_level());
        builder.filter_module("hyper", args.log_level());
    }

    builder.format_timestamp_millis().init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        let args = Args::parse_from(["lingua_voice_rs", "-vv", "voices"]);
        assert_eq!(args.log_level(), LevelFilter::Debug);

        let args = Args::parse_from(["lingua_voice_rs", "voices", "-q"]);
        assert_eq!(args.log_level(), LevelFilter::Error);
    }

    #[test]
    fn speak_takes_text_and_voice() {
        let args = Args::parse_from(["lingua_voice_rs", "speak", "Hola", "--voice", "Puck"]);
        match args.command {
            Command::Speak { text, voice } => {
                assert_eq!(text, "Hola");
                assert_eq!(voice.as_deref(), Some("Puck"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn chat_overrides_are_optional() {
        let args = Args::parse_from(["lingua_voice_rs", "chat", "--language", "French"]);
        match args.command {
            Command::Chat { language, level, auto_speak, .. } => {
                assert_eq!(language.as_deref(), Some("French"));
                assert!(level.is_none());
                assert!(!auto_speak);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}

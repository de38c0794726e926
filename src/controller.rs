use std::sync::Arc;

use anyhow::{Context, Result};

use crate::audio::{AudioPlaybackController, PlaybackHandle};
use crate::synthesis::{SpeechSynthesisClient, Voice};
use crate::tutor::{ChatContext, ChatTurn, GrammarCorrection, Speaker, TutorClient};

pub const GREETING: &str = "Hola! Soy tu tutor de español. ¿Cómo estás hoy?";
pub const FALLBACK_REPLY: &str = "I'm having trouble connecting to the language server. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lesson {
    pub title: &'static str,
    pub description: &'static str,
}

/// Built-in lesson catalogue for `/lesson`.
pub const LESSONS: [Lesson; 5] = [
    Lesson { title: "Ordering Coffee", description: "Learn how to order drinks politely." },
    Lesson { title: "Introductions", description: "Meet new people and say hello." },
    Lesson { title: "At the Airport", description: "Navigate terminals and gates." },
    Lesson { title: "Restaurant", description: "Ordering food and asking for the bill." },
    Lesson { title: "Directions", description: "Ask where the library is." },
];

/// Case-insensitive lookup by title prefix.
pub fn find_lesson(query: &str) -> Option<&'static Lesson> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return None;
    }
    LESSONS
        .iter()
        .find(|lesson| lesson.title.to_lowercase().starts_with(&query))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub reply: String,
    /// Only present when the student's sentence had a mistake.
    pub correction: Option<GrammarCorrection>,
}

/// One tutoring conversation: context, history and the voice used to speak replies.
pub struct ChatSession {
    context: ChatContext,
    history: Vec<ChatTurn>,
    tutor: TutorClient,
    speech: SpeechSynthesisClient,
    playback: Arc<AudioPlaybackController>,
    voice: Voice,
}

impl ChatSession {
    pub fn new(
        context: ChatContext,
        tutor: TutorClient,
        speech: SpeechSynthesisClient,
        playback: Arc<AudioPlaybackController>,
        voice: Voice,
    ) -> Self {
        Self {
            context,
            history: vec![ChatTurn::tutor(GREETING)],
            tutor,
            speech,
            playback,
            voice,
        }
    }

    pub fn context(&self) -> &ChatContext {
        &self.context
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn last_reply(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|turn| turn.speaker == Speaker::Tutor)
            .map(|turn| turn.text.as_str())
    }

    /// Send one student message. Blank input is ignored and yields `None`.
    pub async fn send(&mut self, text: &str) -> Option<TurnOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        // 语法检查和回复并行请求
        let (grammar, reply) = tokio::join!(
            self.tutor.grammar_correction(text, &self.context.language),
            self.tutor.conversation_reply(&self.history, text, &self.context),
        );

        let reply = reply.unwrap_or_else(|e| {
            log::error!("Chat reply failed: {}", e);
            FALLBACK_REPLY.to_string()
        });
        let correction = match grammar {
            Ok(correction) if correction.has_mistake => Some(correction),
            Ok(_) => None,
            Err(e) => {
                log::error!("Grammar check failed: {}", e);
                None
            }
        };

        self.history.push(ChatTurn::user(text));
        self.history.push(ChatTurn::tutor(reply.clone()));
        Some(TurnOutcome { reply, correction })
    }

    /// Switch topic and restart the conversation with the lesson opener.
    pub fn start_lesson(&mut self, title: &str, description: &str) {
        log::info!("Starting lesson: {}", title);
        self.context.topic = title.to_string();
        self.history = vec![ChatTurn::tutor(format!(
            "Vamos a practicar: {}. {} ¿Listo?",
            title, description
        ))];
    }

    /// Synthesize the latest tutor reply and start playing it.
    pub async fn speak_last_reply(&self) -> Result<PlaybackHandle> {
        let reply = self.last_reply().context("No tutor reply to speak")?;
        let buffer = self
            .speech
            .synthesize(reply, self.voice)
            .await
            .context("Failed to synthesize reply")?;
        let handle = self
            .playback
            .speak(buffer)
            .await
            .context("Failed to play reply")?;
        Ok(handle)
    }
}

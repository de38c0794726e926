//! Conversation and grammar calls against the chat model.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use crate::error::TutorError;
use crate::gemini::GenerativeBackend;
use crate::protocol::{Content, GenerateContentRequest, GenerationConfig};

const REPLY_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Tutor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub speaker: Speaker,
    pub text: String,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { speaker: Speaker::User, text: text.into() }
    }

    pub fn tutor(text: impl Into<String>) -> Self {
        Self { speaker: Speaker::Tutor, text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatContext {
    pub language: String,
    pub level: String,
    pub topic: String,
}

impl Default for ChatContext {
    fn default() -> Self {
        Self {
            language: "Spanish".to_string(),
            level: "Beginner".to_string(),
            topic: "General".to_string(),
        }
    }
}

/// Result of checking one student sentence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GrammarCorrection {
    pub has_mistake: bool,
    pub corrected: String,
    pub explanation: String,
}

pub struct TutorClient {
    backend: Arc<dyn GenerativeBackend>,
    model: String,
}

impl TutorClient {
    pub fn new(backend: Arc<dyn GenerativeBackend>, model: impl Into<String>) -> Self {
        Self { backend, model: model.into() }
    }

    /// Next tutor line for the conversation so far.
    pub async fn conversation_reply(
        &self,
        history: &[ChatTurn],
        last_message: &str,
        context: &ChatContext,
    ) -> Result<String, TutorError> {
        let request = conversation_request(history, last_message, context);
        log::debug!(
            "Requesting reply: model={}, history={} turns",
            self.model,
            history.len()
        );
        let response = self.backend.generate_content(&self.model, &request).await?;
        let reply = response
            .first_text()
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(TutorError::EmptyReply)?;
        Ok(reply)
    }

    pub async fn grammar_correction(&self, text: &str, language: &str) -> Result<GrammarCorrection, TutorError> {
        let request = grammar_request(text, language);
        let response = self.backend.generate_content(&self.model, &request).await?;

        // 空回复按“没有错误”处理
        let body = response.first_text().unwrap_or_default();
        if body.trim().is_empty() {
            return Ok(GrammarCorrection::default());
        }
        let correction: GrammarCorrection = serde_json::from_str(body.trim())?;
        log::debug!("Grammar check: has_mistake={}", correction.has_mistake);
        Ok(correction)
    }
}

fn system_instruction(context: &ChatContext) -> String {
    format!(
        "You are a helpful, friendly, and encouraging language tutor helping a student learn {lang}.\n\
         The student is at a {level} level.\n\
         Keep your responses concise (under 40 words) and conversational.\n\
         Always reply in {lang}, but keep the vocabulary appropriate for their level.\n\
         Do not provide long grammar explanations unless asked. Just converse naturally.",
        lang = context.language,
        level = context.level,
    )
}

fn conversation_request(history: &[ChatTurn], last_message: &str, context: &ChatContext) -> GenerateContentRequest {
    let mut contents: Vec<Content> = history
        .iter()
        .map(|turn| match turn.speaker {
            Speaker::User => Content::user(turn.text.as_str()),
            Speaker::Tutor => Content::model(turn.text.as_str()),
        })
        .collect();
    contents.push(Content::user(last_message));

    GenerateContentRequest {
        contents,
        system_instruction: Some(Content::text(system_instruction(context))),
        generation_config: Some(GenerationConfig {
            temperature: Some(REPLY_TEMPERATURE),
            ..Default::default()
        }),
    }
}

fn grammar_request(text: &str, language: &str) -> GenerateContentRequest {
    let prompt = format!(
        "Analyze the following sentence in {language} spoken by a student: \"{text}\".\n\
         If there are grammar mistakes, return a JSON object with:\n\
         - \"hasMistake\": boolean\n\
         - \"corrected\": string (the corrected sentence)\n\
         - \"explanation\": string (very brief explanation in English)\n\n\
         If it is correct or \"perfect\", return hasMistake: false."
    );

    GenerateContentRequest {
        contents: vec![Content::user(prompt)],
        system_instruction: None,
        generation_config: Some(GenerationConfig {
            response_mime_type: Some("application/json".to_string()),
            response_schema: Some(json!({
                "type": "OBJECT",
                "properties": {
                    "hasMistake": { "type": "BOOLEAN" },
                    "corrected": { "type": "STRING" },
                    "explanation": { "type": "STRING" }
                }
            })),
            ..Default::default()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::gemini::testing::{FakeBackend, text_response};
    use crate::protocol::GenerateContentResponse;

    fn tutor_with(backend: FakeBackend) -> (TutorClient, Arc<FakeBackend>) {
        let backend = Arc::new(backend);
        (TutorClient::new(backend.clone(), "gemini-2.5-flash"), backend)
    }

    #[tokio::test]
    async fn reply_request_carries_history_and_instruction() {
        let (tutor, backend) = tutor_with(FakeBackend::new(|_, _| Ok(text_response("  ¡Muy bien!  "))));
        let history = vec![ChatTurn::tutor("Hola"), ChatTurn::user("Hola, ¿qué tal?")];

        let reply = tutor
            .conversation_reply(&history, "Estoy bien", &ChatContext::default())
            .await
            .unwrap();
        assert_eq!(reply, "¡Muy bien!");

        let (model, request) = backend.last_call().unwrap();
        assert_eq!(model, "gemini-2.5-flash");
        let roles: Vec<_> = request.contents.iter().map(|c| c.role.as_deref().unwrap()).collect();
        assert_eq!(roles, ["model", "user", "user"]);
        assert_eq!(request.contents[2].parts[0].text.as_deref(), Some("Estoy bien"));

        let instruction = request.system_instruction.unwrap().parts[0].text.clone().unwrap();
        assert!(instruction.contains("learn Spanish"));
        assert!(instruction.contains("Beginner level"));
        assert!(instruction.contains("under 40 words"));
        assert_eq!(request.generation_config.unwrap().temperature, Some(0.7));
    }

    #[tokio::test]
    async fn blank_reply_is_an_error() {
        let (tutor, _) = tutor_with(FakeBackend::new(|_, _| Ok(GenerateContentResponse::default())));
        let err = tutor
            .conversation_reply(&[], "Hola", &ChatContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TutorError::EmptyReply));
    }

    #[tokio::test]
    async fn reply_propagates_remote_failure() {
        let (tutor, _) = tutor_with(FakeBackend::new(|_, _| {
            Err(RemoteError::Status { status: 500, body: String::new() })
        }));
        let err = tutor
            .conversation_reply(&[], "Hola", &ChatContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TutorError::Request(_)));
    }

    #[tokio::test]
    async fn grammar_correction_parses_json_mode_reply() {
        let (tutor, backend) = tutor_with(FakeBackend::new(|_, _| {
            Ok(text_response(
                r#"{"hasMistake":true,"corrected":"Yo soy alto","explanation":"Use 'soy' for traits."}"#,
            ))
        }));

        let correction = tutor.grammar_correction("Yo es alto", "Spanish").await.unwrap();
        assert_eq!(
            correction,
            GrammarCorrection {
                has_mistake: true,
                corrected: "Yo soy alto".into(),
                explanation: "Use 'soy' for traits.".into(),
            }
        );

        let (_, request) = backend.last_call().unwrap();
        let prompt = request.contents[0].parts[0].text.clone().unwrap();
        assert!(prompt.contains("in Spanish"));
        assert!(prompt.contains("\"Yo es alto\""));
        let config = request.generation_config.unwrap();
        assert_eq!(config.response_mime_type.as_deref(), Some("application/json"));
        assert_eq!(
            config.response_schema.unwrap()["properties"]["hasMistake"]["type"],
            "BOOLEAN"
        );
    }

    #[tokio::test]
    async fn missing_fields_and_empty_reply_mean_no_mistake() {
        let (tutor, _) = tutor_with(FakeBackend::new(|_, _| Ok(text_response(r#"{"hasMistake":false}"#))));
        assert_eq!(
            tutor.grammar_correction("Hola", "Spanish").await.unwrap(),
            GrammarCorrection::default()
        );

        let (tutor, _) = tutor_with(FakeBackend::new(|_, _| Ok(GenerateContentResponse::default())));
        assert!(!tutor.grammar_correction("Hola", "Spanish").await.unwrap().has_mistake);
    }

    #[tokio::test]
    async fn malformed_grammar_json_is_an_error() {
        let (tutor, _) = tutor_with(FakeBackend::new(|_, _| Ok(text_response("not json"))));
        assert!(matches!(
            tutor.grammar_correction("Hola", "Spanish").await,
            Err(TutorError::Json(_))
        ));
    }
}

//! Text-to-speech through the remote model.
//!
//! One request per call, no retries. The reply's first inline audio part is
//! decoded as PCM16 at the client's fixed format (24 kHz mono by default).

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::audio::{PcmAudioBuffer, RawAudioPayload};
use crate::error::{SynthesisError, UnknownVoice};
use crate::gemini::GenerativeBackend;
use crate::protocol::{Content, GenerateContentRequest, GenerationConfig, SpeechConfig};

pub const SAMPLE_RATE: u32 = 24000;
pub const CHANNELS: u16 = 1;

/// Prebuilt voices offered by the synthesis model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Voice {
    Zephyr,
    Puck,
    Charon,
    #[default]
    Kore,
    Fenrir,
    Leda,
    Orus,
    Aoede,
    Callirrhoe,
    Autonoe,
    Enceladus,
    Iapetus,
    Umbriel,
    Algieba,
    Despina,
    Erinome,
    Algenib,
    Rasalgethi,
    Laomedeia,
    Achernar,
    Alnilam,
    Schedar,
    Gacrux,
    Pulcherrima,
    Achird,
    Zubenelgenubi,
    Vindemiatrix,
    Sadachbia,
    Sadaltager,
    Sulafat,
}

impl Voice {
    pub const ALL: [Voice; 30] = [
        Voice::Zephyr,
        Voice::Puck,
        Voice::Charon,
        Voice::Kore,
        Voice::Fenrir,
        Voice::Leda,
        Voice::Orus,
        Voice::Aoede,
        Voice::Callirrhoe,
        Voice::Autonoe,
        Voice::Enceladus,
        Voice::Iapetus,
        Voice::Umbriel,
        Voice::Algieba,
        Voice::Despina,
        Voice::Erinome,
        Voice::Algenib,
        Voice::Rasalgethi,
        Voice::Laomedeia,
        Voice::Achernar,
        Voice::Alnilam,
        Voice::Schedar,
        Voice::Gacrux,
        Voice::Pulcherrima,
        Voice::Achird,
        Voice::Zubenelgenubi,
        Voice::Vindemiatrix,
        Voice::Sadachbia,
        Voice::Sadaltager,
        Voice::Sulafat,
    ];

    /// Name as the API expects it.
    pub fn name(self) -> &'static str {
        match self {
            Voice::Zephyr => "Zephyr",
            Voice::Puck => "Puck",
            Voice::Charon => "Charon",
            Voice::Kore => "Kore",
            Voice::Fenrir => "Fenrir",
            Voice::Leda => "Leda",
            Voice::Orus => "Orus",
            Voice::Aoede => "Aoede",
            Voice::Callirrhoe => "Callirrhoe",
            Voice::Autonoe => "Autonoe",
            Voice::Enceladus => "Enceladus",
            Voice::Iapetus => "Iapetus",
            Voice::Umbriel => "Umbriel",
            Voice::Algieba => "Algieba",
            Voice::Despina => "Despina",
            Voice::Erinome => "Erinome",
            Voice::Algenib => "Algenib",
            Voice::Rasalgethi => "Rasalgethi",
            Voice::Laomedeia => "Laomedeia",
            Voice::Achernar => "Achernar",
            Voice::Alnilam => "Alnilam",
            Voice::Schedar => "Schedar",
            Voice::Gacrux => "Gacrux",
            Voice::Pulcherrima => "Pulcherrima",
            Voice::Achird => "Achird",
            Voice::Zubenelgenubi => "Zubenelgenubi",
            Voice::Vindemiatrix => "Vindemiatrix",
            Voice::Sadachbia => "Sadachbia",
            Voice::Sadaltager => "Sadaltager",
            Voice::Sulafat => "Sulafat",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Voice {
    type Err = UnknownVoice;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Voice::ALL
            .iter()
            .copied()
            .find(|v| v.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownVoice(wanted.to_string()))
    }
}

pub struct SpeechSynthesisClient {
    backend: Arc<dyn GenerativeBackend>,
    model: String,
    sample_rate: u32,
    channels: u16,
}

impl SpeechSynthesisClient {
    pub fn new(backend: Arc<dyn GenerativeBackend>, model: impl Into<String>) -> Self {
        Self {
            backend,
            model: model.into(),
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
        }
    }

    /// Synthesize `text` and decode the returned audio.
    pub async fn synthesize(&self, text: &str, voice: Voice) -> Result<PcmAudioBuffer, SynthesisError> {
        if text.trim().is_empty() {
            return Err(SynthesisError::EmptyText);
        }

        let request = speech_request(text, voice);
        log::debug!(
            "Requesting speech: model={}, voice={}, chars={}",
            self.model,
            voice,
            text.chars().count()
        );
        let response = self.backend.generate_content(&self.model, &request).await?;

        let inline = response.first_inline_data().ok_or(SynthesisError::NoAudioData)?;
        let payload = RawAudioPayload::from_base64(&inline.data, inline.mime_type.clone())?;
        // 空字符串也视为没有音频
        if payload.is_empty() {
            return Err(SynthesisError::NoAudioData);
        }
        let buffer = payload.decode_pcm16(self.sample_rate, self.channels)?;

        log::info!(
            "Synthesized {} bytes -> {} frames ({:.2}s) with voice {}",
            payload.len(),
            buffer.frame_count(),
            buffer.duration().as_secs_f32(),
            voice
        );
        Ok(buffer)
    }
}

fn speech_request(text: &str, voice: Voice) -> GenerateContentRequest {
    GenerateContentRequest {
        contents: vec![Content::text(text)],
        system_instruction: None,
        generation_config: Some(GenerationConfig {
            response_modalities: Some(vec!["AUDIO".to_string()]),
            speech_config: Some(SpeechConfig::prebuilt(voice.name())),
            ..Default::default()
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, RemoteError};
    use crate::gemini::testing::{FakeBackend, audio_response, text_response};
    use crate::protocol::{Candidate, Content, GenerateContentResponse, InlineData, Part};

    fn client(backend: FakeBackend) -> (SpeechSynthesisClient, Arc<FakeBackend>) {
        let backend = Arc::new(backend);
        (
            SpeechSynthesisClient::new(backend.clone(), "gemini-2.5-flash-preview-tts"),
            backend,
        )
    }

    #[tokio::test]
    async fn decodes_first_audio_part() {
        let (client, backend) = client(FakeBackend::new(|_, _| {
            Ok(audio_response(&[0x00, 0x00, 0xFF, 0x7F]))
        }));

        let buffer = client.synthesize("Hola", Voice::Kore).await.unwrap();
        assert_eq!(buffer.sample_rate(), 24000);
        assert_eq!(buffer.channel_count(), 1);
        assert_eq!(buffer.channel(0), &[0.0, 0.999969482421875]);

        let (model, request) = backend.last_call().unwrap();
        assert_eq!(model, "gemini-2.5-flash-preview-tts");
        let config = request.generation_config.unwrap();
        assert_eq!(config.response_modalities, Some(vec!["AUDIO".to_string()]));
        assert_eq!(
            config.speech_config.unwrap().voice_config.prebuilt_voice_config.voice_name,
            "Kore"
        );
        assert_eq!(request.contents[0].parts[0].text.as_deref(), Some("Hola"));
    }

    #[tokio::test]
    async fn response_without_audio_is_no_audio_data() {
        let (client, _) = client(FakeBackend::new(|_, _| Ok(text_response("sorry"))));
        let err = client.synthesize("Hola", Voice::Puck).await.unwrap_err();
        assert!(matches!(err, SynthesisError::NoAudioData));
    }

    #[tokio::test]
    async fn empty_candidates_is_no_audio_data() {
        let (client, _) = client(FakeBackend::new(|_, _| Ok(GenerateContentResponse::default())));
        let err = client.synthesize("Hola", Voice::Kore).await.unwrap_err();
        assert!(matches!(err, SynthesisError::NoAudioData));
    }

    #[tokio::test]
    async fn empty_audio_string_is_no_audio_data() {
        let (client, _) = client(FakeBackend::new(|_, _| {
            Ok(GenerateContentResponse {
                candidates: vec![Candidate {
                    content: Some(Content {
                        role: None,
                        parts: vec![Part {
                            text: None,
                            inline_data: Some(InlineData {
                                mime_type: None,
                                data: String::new(),
                            }),
                        }],
                    }),
                    finish_reason: None,
                }],
            })
        }));
        let err = client.synthesize("Hola", Voice::Kore).await.unwrap_err();
        assert!(matches!(err, SynthesisError::NoAudioData));
    }

    #[tokio::test]
    async fn odd_length_payload_is_decode_error() {
        let (client, _) = client(FakeBackend::new(|_, _| Ok(audio_response(&[0x00, 0x00, 0x01]))));
        let err = client.synthesize("Hola", Voice::Kore).await.unwrap_err();
        assert!(matches!(
            err,
            SynthesisError::AudioDecode(DecodeError::OddByteLength(3))
        ));
    }

    #[tokio::test]
    async fn remote_failure_is_request_error_without_retry() {
        let (client, backend) = client(FakeBackend::new(|_, _| {
            Err(RemoteError::Status {
                status: 429,
                body: "quota".into(),
            })
        }));
        let err = client.synthesize("Hola", Voice::Kore).await.unwrap_err();
        assert!(matches!(
            err,
            SynthesisError::Request(RemoteError::Status { status: 429, .. })
        ));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn empty_text_never_reaches_the_network() {
        let (client, backend) = client(FakeBackend::new(|_, _| Ok(audio_response(&[0, 0]))));
        let err = client.synthesize("   ", Voice::Kore).await.unwrap_err();
        assert!(matches!(err, SynthesisError::EmptyText));
        assert_eq!(backend.call_count(), 0);
    }

    #[test]
    fn voices_parse_case_insensitively() {
        assert_eq!("kore".parse::<Voice>().unwrap(), Voice::Kore);
        assert_eq!(" PUCK ".parse::<Voice>().unwrap(), Voice::Puck);
        assert!("Robot".parse::<Voice>().is_err());
        assert_eq!(Voice::default(), Voice::Kore);
    }

    #[test]
    fn every_voice_round_trips_through_its_name() {
        for voice in Voice::ALL {
            assert_eq!(voice.name().parse::<Voice>().unwrap(), voice);
        }
    }
}

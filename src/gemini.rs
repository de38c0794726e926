use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::config::Config;
use crate::error::RemoteError;
use crate::protocol::{GenerateContentRequest, GenerateContentResponse};

/// A remote model that answers `generateContent` requests.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, RemoteError>;
}

/// HTTP client for the Gemini REST API.
pub struct GeminiClient {
    http: Client,
    api_base: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(api_base: &str, api_key: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let api_key = config.api_key.as_deref().ok_or_else(|| {
            anyhow::anyhow!("Missing API key: set GEMINI_API_KEY (or API_KEY) in the environment")
        })?;
        Ok(Self::new(
            config.api_base,
            api_key,
            Duration::from_secs(config.request_timeout_secs),
        )?)
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.api_base, model)
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, RemoteError> {
        let url = self.endpoint(model);
        log::debug!("POST {}", url);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            log::warn!("Gemini {} returned HTTP {}", model, status);
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }

        log::debug!("Gemini {} responded with {} bytes", model, body.len());
        Ok(serde_json::from_str(&body)?)
    }
}

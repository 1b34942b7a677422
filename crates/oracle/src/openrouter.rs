// In crates/oracle/src/openrouter.rs

use crate::parse::parse_assessment;
use crate::prompt::{user_prompt, SYSTEM_PROMPT};
use crate::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage, OracleRequest, ResponseFormat};
use crate::{Error, MarketOracle, Result};
use app_config::types::OracleSettings;
use async_trait::async_trait;
use chrono::Utc;
use core_types::{OracleAssessment, OracleReading};
use reqwest::Client;
use std::time::Duration;

const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Asks a chat model on OpenRouter for a market assessment.
#[derive(Debug, Clone)]
pub struct OpenRouterOracle {
    client: Client,
    settings: OracleSettings,
}

impl OpenRouterOracle {
    pub fn new(settings: OracleSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| Error::ClientBuild(e.to_string()))?;
        Ok(Self { client, settings })
    }

    /// Longest a full `assess` can take, retries included.
    pub fn deadline(&self) -> Duration {
        let attempts = self.settings.max_attempts.max(1);
        Duration::from_secs(self.settings.timeout_secs) * attempts + RETRY_DELAY * (attempts - 1)
    }

    async fn chat_completion(&self, messages: Vec<ChatMessage>) -> Result<ChatCompletionResponse> {
        let url = format!("{}/chat/completions", self.settings.base_url.trim_end_matches('/'));
        let body = ChatCompletionRequest {
            model: &self.settings.model,
            messages,
            temperature: self.settings.temperature,
            response_format: ResponseFormat { kind: "json_object" },
            stream: false,
        };
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Status { status: status.as_u16(), body });
        }
        Ok(response.json().await?)
    }

    async fn attempt(&self, request: &OracleRequest) -> Result<OracleAssessment> {
        let messages = vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user_prompt(request))];
        let response = self.chat_completion(messages).await?;
        let model = response.model.unwrap_or_else(|| self.settings.model.clone());
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(Error::EmptyResponse)?;
        tracing::debug!(%model, %content, "Oracle answered.");
        parse_assessment(&content, &model, Utc::now(), self.settings.max_reasoning_length)
    }
}

#[async_trait]
impl MarketOracle for OpenRouterOracle {
    async fn assess(&self, request: &OracleRequest) -> OracleReading {
        let attempts = self.settings.max_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.attempt(request).await {
                Ok(assessment) => {
                    tracing::info!(
                        bias = ?assessment.bias,
                        confidence = assessment.confidence,
                        attempt,
                        "Oracle assessment received."
                    );
                    return OracleReading::Assessment(assessment);
                }
                Err(e) => {
                    tracing::warn!(attempt, max_attempts = attempts, error = %e, "Oracle request failed.");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(RETRY_DELAY).await;
                    }
                }
            }
        }
        match last_error {
            Some(e) if e.is_timeout() => OracleReading::TimedOut,
            Some(e) => OracleReading::Failed { reason: e.to_string() },
            None => OracleReading::Failed { reason: "no attempt made".into() },
        }
    }
}

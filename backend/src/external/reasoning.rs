//! Chat-completions client for the reasoning capability
//!
//! Speaks the OpenAI-compatible `/chat/completions` protocol, which covers
//! hosted and self-hosted reasoning models alike.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::ReasoningConfig;
use crate::error::{AppError, AppResult};
use crate::services::reasoning::{Prompt, ReasoningCapability};

/// HTTP client for the reasoning service
#[derive(Clone)]
pub struct ReasoningClient {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    max_tokens: u32,
    max_prompt_chars: usize,
    http_client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
    reasoning_content: Option<String>,
    text: Option<String>,
}

impl ChoiceMessage {
    /// Reasoning models sometimes leave `content` empty and answer in another field
    fn into_text(self) -> Option<String> {
        [self.content, self.reasoning_content, self.text]
            .into_iter()
            .flatten()
            .find(|text| !text.trim().is_empty())
    }
}

impl ReasoningClient {
    pub fn new(config: &ReasoningConfig) -> AppResult<Self> {
        // Slightly above the generator's own timeout so the generator reports it
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds + 5))
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: config.api_endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_prompt_chars: config.max_prompt_chars,
            http_client,
        })
    }
}

#[async_trait]
impl ReasoningCapability for ReasoningClient {
    async fn complete(&self, prompt: &Prompt) -> AppResult<String> {
        if prompt.len() > self.max_prompt_chars {
            return Err(AppError::PromptTooLarge {
                size: prompt.len(),
                limit: self.max_prompt_chars,
            });
        }

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let mut builder = self
            .http_client
            .post(format!("{}/chat/completions", self.endpoint))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::ReasoningService(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ReasoningService(format!(
                "Reasoning API error: {} - {}",
                status, body
            )));
        }

        let data: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::ParseFailure(format!("Invalid chat response: {}", e)))?;

        data.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.into_text())
            .ok_or_else(|| AppError::ReasoningService("Reasoning API returned no content".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_fallback_order() {
        let message = ChoiceMessage {
            content: Some("  ".into()),
            reasoning_content: Some("{\"a\": 1}".into()),
            text: Some("ignored".into()),
        };
        assert_eq!(message.into_text().as_deref(), Some("{\"a\": 1}"));
        assert_eq!(ChoiceMessage::default().into_text(), None);
    }

    #[test]
    fn test_oversized_prompt_rejected_before_network() {
        let config = ReasoningConfig {
            max_prompt_chars: 10,
            ..ReasoningConfig::default()
        };
        let client = ReasoningClient::new(&config).unwrap();
        let prompt = Prompt {
            system: "system prompt".into(),
            user: "user".into(),
        };
        let result = tokio_test::block_on(client.complete(&prompt));
        assert!(matches!(result, Err(AppError::PromptTooLarge { limit: 10, .. })));
    }
}

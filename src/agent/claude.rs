use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::config::ClaudeConfig;
use crate::error::{AppError, Result};

const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Backoff applied when the API answers 429.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

pub struct ClaudeClient {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
    rate_limit: RateLimitConfig,
}

impl ClaudeClient {
    pub fn new(config: &ClaudeConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_url: CLAUDE_API_URL.to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            rate_limit: RateLimitConfig {
                max_retries: config.rate_limit_max_retries,
                initial_backoff: Duration::from_secs(config.rate_limit_backoff_secs),
            },
        })
    }

    pub async fn send_message(&self, request: &MessagesRequest) -> Result<MessagesResponse> {
        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ClaudeRateLimited(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ClaudeApi(format!("API returned {status}: {body}")));
        }

        let body = response.json::<MessagesResponse>().await?;
        Ok(body)
    }

    /// Send a single-turn prompt and return the concatenated text blocks.
    /// Rate-limited calls are retried with exponential backoff.
    pub async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens,
            temperature: 0.0,
            system: None,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let mut backoff = self.rate_limit.initial_backoff;
        let mut retries = 0;
        loop {
            match self.send_message(&request).await {
                Ok(response) => {
                    tracing::info!(
                        input_tokens = response.usage.input_tokens,
                        output_tokens = response.usage.output_tokens,
                        stop_reason = ?response.stop_reason,
                        "Claude response"
                    );
                    return Ok(response.text());
                }
                Err(AppError::ClaudeRateLimited(msg)) if retries < self.rate_limit.max_retries => {
                    retries += 1;
                    tracing::warn!(
                        retry = retries,
                        backoff_secs = backoff.as_secs(),
                        "Claude API rate limited, backing off"
                    );
                    tracing::debug!(body = %msg, "Rate limit response");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

// --- Request types ---

#[derive(Debug, Serialize)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

// --- Response types ---

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: Usage,
}

impl MessagesResponse {
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_text_skips_non_text_blocks() {
        let response: MessagesResponse = serde_json::from_value(serde_json::json!({
            "id": "msg_1",
            "content": [
                {"type": "text", "text": "first"},
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "second"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5}
        }))
        .unwrap();
        assert_eq!(response.text(), "first\nsecond");
    }

    #[test]
    fn test_request_omits_empty_system() {
        let request = MessagesRequest {
            model: "m".to_string(),
            max_tokens: 10,
            temperature: 0.0,
            system: None,
            messages: vec![],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert!(value.get("system").is_none());
        assert_eq!(value["temperature"], 0.0);
    }
}

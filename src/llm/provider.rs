//! Classification-service capability and its OpenAI-compatible implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ClassifierConfig;
use crate::error::LlmError;

/// One chat-completion request: a fixed system instruction plus the message under review.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Ask the service for a bare JSON object.
    pub json_mode: bool,
}

/// The external text-classification endpoint, reduced to request → raw text.
#[async_trait]
pub trait ClassificationService: Send + Sync {
    fn model_name(&self) -> &str;

    /// Issue exactly one request. Retrying is the caller's business.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

// ── Wire format ─────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

// ── OpenAI-compatible provider ──────────────────────────────────────

/// Chat-completions client for any OpenAI-compatible endpoint (DeepSeek by default).
pub struct OpenAiCompatibleService {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: SecretString,
    timeout: Duration,
    provider: String,
}

impl OpenAiCompatibleService {
    pub fn new(config: &ClassifierConfig) -> Result<Self, LlmError> {
        let provider = provider_label(&config.base_url);
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: provider.clone(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
            provider,
        })
    }

    fn map_transport_error(&self, err: reqwest::Error) -> LlmError {
        if err.is_timeout() {
            LlmError::Timeout {
                provider: self.provider.clone(),
                timeout: self.timeout,
            }
        } else if err.is_builder() {
            LlmError::InvalidRequest {
                provider: self.provider.clone(),
                reason: err.to_string(),
            }
        } else {
            LlmError::ConnectionFailed {
                provider: self.provider.clone(),
                reason: err.to_string(),
            }
        }
    }

    fn map_status(&self, status: StatusCode, headers: &HeaderMap, body: &str) -> LlmError {
        let provider = self.provider.clone();
        let reason = format!("{status}: {}", body.chars().take(200).collect::<String>());
        match status {
            StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
                provider,
                retry_after: retry_after(headers),
            },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::AuthFailed { provider },
            s if s.is_client_error() => LlmError::InvalidRequest { provider, reason },
            s if s.is_server_error() => LlmError::ServiceError { provider, reason },
            _ => LlmError::RequestFailed { provider, reason },
        }
    }
}

#[async_trait]
impl ClassificationService for OpenAiCompatibleService {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let body = ChatCompletionBody {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !status.is_success() {
            return Err(self.map_status(status, &headers, &text));
        }

        debug!(provider = %self.provider, status = %status, "Classification call completed");

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse {
                provider: self.provider.clone(),
                reason: format!("malformed completion envelope: {e}"),
            })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: self.provider.clone(),
                reason: "response carried no message content".into(),
            })
    }
}

/// Short provider name for logs, taken from the endpoint host.
fn provider_label(base_url: &str) -> String {
    reqwest::Url::parse(base_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| base_url.to_string())
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

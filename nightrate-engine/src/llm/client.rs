//! Chat-completions client
//!
//! Both supported vendors share the OpenAI request/response shape; only the
//! endpoint, default model and search options differ. Calls are throttled to
//! one per second, retried with exponential backoff on 429/5xx, and never
//! retried on 401/403.

use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, warn};

use nightrate_common::config::{LlmConfig, LlmVendor};

use crate::error::LlmError;
use crate::llm::ChatMessage;

pub const PERPLEXITY_ENDPOINT: &str = "https://api.perplexity.ai/chat/completions";
pub const PERPLEXITY_DEFAULT_MODEL: &str = "sonar";
pub const OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-search-preview";

/// Raw answer plus token accounting
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub content: String,
    pub total_tokens: i64,
}

/// One chat-completions round trip (retries included)
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage]) -> Result<ChatCompletion, LlmError>;
}

/// Backoff and deadline settings
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay unit; attempt `n` waits `unit · 2ⁿ`
    pub backoff_unit: Duration,
    pub max_backoff: Duration,
    pub attempt_timeout: Duration,
    pub total_deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff_unit: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(60),
            total_deadline: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.backoff_unit.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Resolved vendor settings
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub vendor: LlmVendor,
    pub endpoint: String,
    pub model: String,
    pub api_key: String,
    pub retry: RetryPolicy,
}

impl LlmSettings {
    pub fn from_config(config: &LlmConfig, api_key: String) -> Self {
        let (endpoint, model) = match config.provider {
            LlmVendor::Perplexity => (PERPLEXITY_ENDPOINT, PERPLEXITY_DEFAULT_MODEL),
            LlmVendor::OpenAi => (OPENAI_ENDPOINT, OPENAI_DEFAULT_MODEL),
        };
        Self {
            vendor: config.provider,
            endpoint: config.endpoint.clone().unwrap_or_else(|| endpoint.to_string()),
            model: config.model.clone().unwrap_or_else(|| model.to_string()),
            api_key,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: i64,
}

/// reqwest-backed provider for Perplexity and OpenAI
pub struct HttpChatProvider {
    http_client: reqwest::Client,
    settings: LlmSettings,
    rate_limiter: DefaultDirectRateLimiter,
}

impl HttpChatProvider {
    pub fn new(settings: LlmSettings) -> Result<Self, LlmError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("nightrate/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.retry.attempt_timeout)
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        let quota = Quota::per_second(NonZeroU32::MIN);
        Ok(Self {
            http_client,
            settings,
            rate_limiter: RateLimiter::direct(quota),
        })
    }

    fn request_body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        match self.settings.vendor {
            LlmVendor::Perplexity => json!({
                "model": self.settings.model,
                "messages": messages,
                "temperature": 0.2,
                "web_search_options": { "search_context_size": "medium" },
            }),
            // Search-preview models reject sampling parameters
            LlmVendor::OpenAi => json!({
                "model": self.settings.model,
                "messages": messages,
                "web_search_options": { "search_context_size": "medium" },
            }),
        }
    }

    async fn attempt(&self, body: &serde_json::Value) -> Result<ChatCompletion, LlmError> {
        self.rate_limiter.until_ready().await;

        let response = self
            .http_client
            .post(&self.settings.endpoint)
            .bearer_auth(&self.settings.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LlmError::Auth);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Http {
                status: status.as_u16(),
                body: text.chars().take(500).collect(),
            });
        }

        let parsed: CompletionResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Parse(format!("completion envelope: {}", e))
            }
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Parse("completion has no content".to_string()))?;

        Ok(ChatCompletion {
            content,
            total_tokens: parsed.usage.map(|u| u.total_tokens).unwrap_or(0),
        })
    }

    /// Attempts with backoff, all inside `total_deadline`
    ///
    /// A retry whose backoff would outlive the deadline is not started, so a
    /// persistent 429 surfaces as `RateLimited` rather than a timeout.
    async fn complete_with_retries(&self, messages: &[ChatMessage]) -> Result<ChatCompletion, LlmError> {
        let policy = &self.settings.retry;
        let body = self.request_body(messages);
        let deadline = Instant::now() + policy.total_deadline;
        let mut last_err: Option<LlmError> = None;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let started = Instant::now();
            let remaining = deadline.saturating_duration_since(started);
            let err = match tokio::time::timeout(remaining, self.attempt(&body)).await {
                Ok(Ok(completion)) => return Ok(completion),
                Ok(Err(e)) => e,
                Err(_) => {
                    warn!(attempt, "LLM deadline reached mid-attempt");
                    return Err(match last_err {
                        Some(LlmError::Http { status: 429, .. }) => LlmError::RateLimited { attempts: attempt - 1 },
                        _ => LlmError::Timeout,
                    });
                }
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            if matches!(err, LlmError::Auth) {
                error!(vendor = %self.settings.vendor, "LLM authentication rejected, not retrying");
                return Err(err);
            }
            if !is_retryable(&err) {
                return Err(err);
            }

            let delay = policy.backoff(attempt);
            if attempt >= policy.max_attempts || Instant::now() + delay >= deadline {
                return Err(give_up(err, attempt));
            }

            warn!(
                attempt,
                elapsed_ms,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "LLM call failed, backing off"
            );
            tokio::time::sleep(delay).await;
            last_err = Some(err);
        }
    }
}

/// Final error once retries are exhausted
fn give_up(err: LlmError, attempts: u32) -> LlmError {
    match err {
        LlmError::Http { status: 429, .. } => LlmError::RateLimited { attempts },
        other => other,
    }
}

/// 429 and server errors are retried; everything else fails the call
fn is_retryable(err: &LlmError) -> bool {
    matches!(err, LlmError::Http { status, .. } if *status == 429 || *status >= 500)
}

#[async_trait]
impl ChatProvider for HttpChatProvider {
    fn name(&self) -> &str {
        match self.settings.vendor {
            LlmVendor::Perplexity => "perplexity",
            LlmVendor::OpenAi => "openai",
        }
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<ChatCompletion, LlmError> {
        debug!(vendor = self.name(), model = %self.settings.model, "LLM call");
        self.complete_with_retries(messages).await
    }
}

//! Quota-gated LLM adjustment for one run

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::LlmError;
use crate::llm::parser::parse_calendar;
use crate::llm::prompt::{build_messages, PromptInput};
use crate::llm::ChatProvider;
use crate::models::{IssueCode, QuotaDecision, RunIssue};
use crate::pricing::LlmSuggestion;
use crate::services::QuotaGate;

/// Per-date suggestions, plus the breadcrumb when the layer degraded
#[derive(Debug, Clone, Default)]
pub struct LlmOutcome {
    pub days: BTreeMap<NaiveDate, LlmSuggestion>,
    pub issue: Option<RunIssue>,
}

impl LlmOutcome {
    fn degraded(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            days: BTreeMap::new(),
            issue: Some(RunIssue::new(code, message)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// True when the run was cancelled during the call
    pub fn is_cancelled(&self) -> bool {
        self.issue.as_ref().map(|i| i.code == IssueCode::LlmCancelled).unwrap_or(false)
    }
}

fn issue_code(err: &LlmError) -> IssueCode {
    match err {
        LlmError::Auth => IssueCode::LlmAuthFailed,
        LlmError::Parse(_) => IssueCode::LlmParseError,
        LlmError::Timeout => IssueCode::LlmTimeout,
        LlmError::RateLimited { .. } => IssueCode::LlmRateLimited,
        LlmError::Quota(_) => IssueCode::QuotaExceeded,
        LlmError::Cancelled => IssueCode::LlmCancelled,
        _ => IssueCode::LlmFailed,
    }
}

pub struct LlmAdjuster {
    provider: Arc<dyn ChatProvider>,
    quota: QuotaGate,
}

impl LlmAdjuster {
    pub fn new(provider: Arc<dyn ChatProvider>, quota: QuotaGate) -> Self {
        Self { provider, quota }
    }

    /// Run the quota saga around one chat call
    ///
    /// Never fails: every error becomes an empty outcome with an issue.
    /// Cancellation is checked before admission and raced only against the
    /// chat call, so an admitted call is always either kept or compensated.
    pub async fn adjust(
        &self,
        user_id: &str,
        input: &PromptInput<'_>,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> LlmOutcome {
        let property_id = input.property.id.as_str();
        if cancel.is_cancelled() {
            return LlmOutcome::degraded(IssueCode::LlmCancelled, LlmError::Cancelled.to_string());
        }

        match self.quota.check_and_increment(user_id, now).await {
            Ok(QuotaDecision::Admitted { remaining }) => {
                debug!(property_id, user_id, remaining, "LLM call admitted");
            }
            Ok(QuotaDecision::Exhausted) => {
                return LlmOutcome::degraded(IssueCode::QuotaExceeded, "Daily AI quota reached");
            }
            Err(e) => {
                warn!(property_id, error = %e, "Quota check failed, skipping LLM");
                return LlmOutcome::degraded(IssueCode::LlmFailed, format!("quota check failed: {}", e));
            }
        }

        let messages = build_messages(input);
        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LlmError::Cancelled),
            reply = self.provider.complete(&messages) => reply,
        };
        let result = match reply {
            Ok(completion) => {
                if let Err(e) = self.quota.record_tokens(user_id, now, completion.total_tokens).await {
                    warn!(property_id, error = %e, "Token usage not recorded");
                }
                parse_calendar(&completion.content, input.dates)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(parsed) => {
                info!(
                    property_id,
                    provider = self.provider.name(),
                    days = parsed.days.len(),
                    dropped = parsed.dropped,
                    missing = parsed.missing.len(),
                    "LLM calendar accepted"
                );
                let days = parsed
                    .days
                    .into_iter()
                    .map(|(date, day)| {
                        (
                            date,
                            LlmSuggestion {
                                price: day.price,
                                reasoning: day.reasoning,
                                premium: day.premium,
                            },
                        )
                    })
                    .collect();
                LlmOutcome { days, issue: None }
            }
            Err(err) => {
                if matches!(err, LlmError::Auth) {
                    error!(property_id, provider = self.provider.name(), "LLM authentication failed");
                } else if matches!(err, LlmError::Cancelled) {
                    debug!(property_id, "LLM call abandoned, releasing quota");
                } else {
                    warn!(property_id, provider = self.provider.name(), error = %err, "LLM adjustment failed");
                }
                if let Err(e) = self.quota.compensate(user_id, now).await {
                    error!(property_id, user_id, error = %e, "Quota compensation failed");
                }
                LlmOutcome::degraded(issue_code(&err), err.to_string())
            }
        }
    }
}

//! Calendar run inputs and outputs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Default forward window
pub const DEFAULT_HORIZON_DAYS: u32 = 180;

/// Longest accepted forward window
pub const MAX_HORIZON_DAYS: u32 = 366;

/// How a calendar was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingMethod {
    Deterministic,
    MlHybrid,
    AiHybrid,
}

impl PricingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PricingMethod::Deterministic => "deterministic",
            PricingMethod::MlHybrid => "ml_hybrid",
            PricingMethod::AiHybrid => "ai_hybrid",
        }
    }
}

impl std::fmt::Display for PricingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What started a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Scheduler,
    #[default]
    OnDemand,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Scheduler => "scheduler",
            Trigger::OnDemand => "on_demand",
        }
    }
}

/// Options for `generate_calendar`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Bypass the once-per-local-day check
    pub force: bool,
    pub horizon_days: u32,
    pub trigger: Trigger,
    /// User recorded as `updated_by`; `"system"` when absent
    pub triggered_by: Option<String>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            force: false,
            horizon_days: DEFAULT_HORIZON_DAYS,
            trigger: Trigger::default(),
            triggered_by: None,
        }
    }
}

/// One emitted night
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub price: i64,
    pub reason: String,
    /// Stored locked override returned unchanged
    pub locked: bool,
    /// Deterministic baseline before merge and guardrails
    pub baseline: f64,
    pub event: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Already priced today in the property's zone; nothing written
    Skipped,
}

/// Non-fatal issue codes recorded on a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    FeaturesUnavailable,
    MlUnavailable,
    QuotaExceeded,
    LlmAuthFailed,
    LlmParseError,
    LlmTimeout,
    LlmRateLimited,
    LlmFailed,
    LlmCancelled,
    PropagationFailed,
    PmsHandoffFailed,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::FeaturesUnavailable => "FEATURES_UNAVAILABLE",
            IssueCode::MlUnavailable => "ML_UNAVAILABLE",
            IssueCode::QuotaExceeded => "QUOTA_EXCEEDED",
            IssueCode::LlmAuthFailed => "LLM_AUTH_FAILED",
            IssueCode::LlmParseError => "LLM_PARSE_ERROR",
            IssueCode::LlmTimeout => "LLM_TIMEOUT",
            IssueCode::LlmRateLimited => "LLM_RATE_LIMITED",
            IssueCode::LlmFailed => "LLM_FAILED",
            IssueCode::LlmCancelled => "LLM_CANCELLED",
            IssueCode::PropagationFailed => "PROPAGATION_FAILED",
            IssueCode::PmsHandoffFailed => "PMS_HANDOFF_FAILED",
        }
    }
}

/// Breadcrumb for a degraded step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunIssue {
    pub code: IssueCode,
    pub message: String,
}

impl RunIssue {
    pub fn new(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Result of `generate_calendar`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarResult {
    pub property_id: String,
    pub status: RunStatus,
    pub days_generated: usize,
    pub method: PricingMethod,
    pub synced_properties: Vec<String>,
    pub summary: String,
    pub issues: Vec<RunIssue>,
    pub calendar: Vec<CalendarDay>,
}

impl CalendarResult {
    pub fn skipped(property_id: &str) -> Self {
        Self {
            property_id: property_id.to_string(),
            status: RunStatus::Skipped,
            days_generated: 0,
            method: PricingMethod::Deterministic,
            synced_properties: Vec::new(),
            summary: "Already priced today".to_string(),
            issues: Vec::new(),
            calendar: Vec::new(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.status == RunStatus::Skipped
    }

    pub fn has_issue(&self, code: IssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }

    pub fn day(&self, date: NaiveDate) -> Option<&CalendarDay> {
        self.calendar.iter().find(|d| d.date == date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&IssueCode::LlmParseError).unwrap();
        assert_eq!(json, "\"LLM_PARSE_ERROR\"");
        assert_eq!(IssueCode::PmsHandoffFailed.as_str(), "PMS_HANDOFF_FAILED");
    }

    #[test]
    fn test_method_names() {
        assert_eq!(PricingMethod::MlHybrid.to_string(), "ml_hybrid");
        assert_eq!(
            serde_json::to_string(&PricingMethod::AiHybrid).unwrap(),
            "\"ai_hybrid\""
        );
    }

    #[test]
    fn test_default_options() {
        let opts = GenerateOptions::default();
        assert!(!opts.force);
        assert_eq!(opts.horizon_days, 180);
        assert_eq!(opts.trigger, Trigger::OnDemand);
    }
}

//! LLM usage quota records and subscription caps

use serde::{Deserialize, Serialize};

/// Billing status resolved at call time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    #[default]
    None,
    Trial,
    Active,
}

impl SubscriptionStatus {
    /// Unknown statuses behave as `None`
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "trial" | "trialing" => SubscriptionStatus::Trial,
            "active" => SubscriptionStatus::Active,
            _ => SubscriptionStatus::None,
        }
    }

    pub fn caps(&self) -> QuotaCaps {
        match self {
            SubscriptionStatus::None => QuotaCaps {
                max_calls: 10,
                max_tokens: 100_000,
            },
            SubscriptionStatus::Trial => QuotaCaps {
                max_calls: 50,
                max_tokens: 500_000,
            },
            SubscriptionStatus::Active => QuotaCaps {
                max_calls: 200,
                max_tokens: 2_000_000,
            },
        }
    }
}

/// Daily caps per user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCaps {
    pub max_calls: i64,
    pub max_tokens: i64,
}

/// Usage row for `(user, date)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuotaUsage {
    pub calls_count: i64,
    pub tokens_used: i64,
}

/// Result of `check_and_increment`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotaDecision {
    /// Call admitted; `remaining` calls left today after this one
    Admitted { remaining: i64 },
    /// Daily cap reached; nothing was incremented
    Exhausted,
}

impl QuotaDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, QuotaDecision::Admitted { .. })
    }
}

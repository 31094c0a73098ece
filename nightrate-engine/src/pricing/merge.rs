//! Per-night merge of baseline, demand model and LLM suggestions
//!
//! Precedence is LLM > ML > baseline. An LLM price replaces the candidate
//! (it is still clamped by the guardrails afterwards); an ML price is blended
//! toward the baseline by its confidence.

use serde::{Deserialize, Serialize};

use crate::pricing::baseline::BaselineDay;

/// Prefix carried by every LLM-sourced reason
pub const AI_REASON_PREFIX: &str = "AI: ";

/// Demand model optimum for one night
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MlSuggestion {
    pub price: f64,
    /// Clamped to [0, 1] before blending
    pub confidence: f64,
}

/// LLM suggestion for one night
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSuggestion {
    pub price: i64,
    pub reasoning: String,
    pub premium: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaySource {
    Baseline,
    Ml,
    Llm,
}

/// Merged candidate handed to the guardrails
#[derive(Debug, Clone, PartialEq)]
pub struct MergedDay {
    pub price: f64,
    pub reason: String,
    pub source: DaySource,
    pub premium: bool,
}

pub fn merge_day(
    baseline: &BaselineDay,
    ml: Option<&MlSuggestion>,
    llm: Option<&LlmSuggestion>,
) -> MergedDay {
    if let Some(llm) = llm {
        return MergedDay {
            price: llm.price as f64,
            reason: format!("{}{}", AI_REASON_PREFIX, llm.reasoning.trim()),
            source: DaySource::Llm,
            premium: llm.premium,
        };
    }

    if let Some(ml) = ml {
        if ml.price.is_finite() && ml.price > 0.0 {
            let confidence = if ml.confidence.is_finite() {
                ml.confidence.clamp(0.0, 1.0)
            } else {
                0.0
            };
            let mut reason = baseline.reason();
            reason.push_str(", Demand model");
            return MergedDay {
                price: baseline.price + (ml.price - baseline.price) * confidence,
                reason,
                source: DaySource::Ml,
                premium: false,
            };
        }
    }

    MergedDay {
        price: baseline.price,
        reason: baseline.reason(),
        source: DaySource::Baseline,
        premium: false,
    }
}

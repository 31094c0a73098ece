//! Pure pricing functions: baseline, merge and guardrails

pub mod baseline;
pub mod guardrails;
pub mod merge;
pub mod season;

pub use baseline::{compute_baseline, compute_horizon, horizon_dates, BaselineDay, Multipliers};
pub use guardrails::{apply_guardrails, charm_round, effective_ceiling, GuardInput, GuardedDay};
pub use merge::{merge_day, DaySource, LlmSuggestion, MergedDay, MlSuggestion, AI_REASON_PREFIX};

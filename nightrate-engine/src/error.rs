//! Error types for nightrate-engine
//!
//! Each subsystem owns its error enum. Only [`GenerateError`] is fatal for a
//! pricing run; everything else degrades and is recorded as a run issue.

use thiserror::Error;

/// Property configuration rejected before BASELINE
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Unknown strategy: {0:?}")]
    UnknownStrategy(String),

    #[error("Unknown property type: {0:?}")]
    UnknownPropertyType(String),

    #[error("Invalid price envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Invalid stay rules: {0}")]
    InvalidRules(String),

    #[error("Malformed timezone: {0:?}")]
    InvalidTimezone(String),

    #[error("Capacity must be positive, got {0}")]
    InvalidCapacity(u32),

    #[error("Horizon must be between 1 and {max} days, got {got}")]
    InvalidHorizon { got: u32, max: u32 },

    /// Stored row that does not decode into a valid property
    #[error("Invalid property record: {0}")]
    InvalidRecord(String),
}

/// Fatal outcomes of `generate_calendar`
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Baseline failed: {0}")]
    Baseline(String),

    /// Nothing was written: the batch is atomic
    #[error("Persist failed: {0}")]
    Persist(String),

    #[error("Run cancelled before persist")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(#[from] nightrate_common::Error),
}

impl GenerateError {
    /// Stable code surfaced to callers and in `RunFailed` events
    pub fn code(&self) -> &'static str {
        match self {
            GenerateError::Validation(_) => "VALIDATION_FAILED",
            GenerateError::NotFound(_) => "NOT_FOUND",
            GenerateError::Baseline(_) => "BASELINE_FAILED",
            GenerateError::Persist(_) => "PERSIST_FAILED",
            GenerateError::Cancelled => "CANCELLED",
            GenerateError::Storage(_) => "PERSIST_FAILED",
        }
    }
}

/// LLM adjustment layer errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LlmError {
    /// HTTP 401/403: never retried
    #[error("LLM authentication failed")]
    Auth,

    #[error("LLM rate limit persisted after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("LLM call timed out")]
    Timeout,

    #[error("LLM response rejected: {0}")]
    Parse(String),

    #[error("LLM API error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("LLM network error: {0}")]
    Network(String),

    #[error("LLM not configured: {0}")]
    NotConfigured(String),

    #[error("Quota bookkeeping failed: {0}")]
    Quota(String),

    /// Run abandoned while the call was in flight
    #[error("LLM call cancelled")]
    Cancelled,
}

/// Demand model bridge errors; every variant is benign for the orchestrator
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    #[error("No demand model for property {0}")]
    NoModel(String),

    #[error("Demand bridge queue is full")]
    QueueFull,

    #[error("Demand worker call timed out")]
    Timeout,

    #[error("Demand worker crashed: {0}")]
    Crashed(String),

    #[error("Failed to spawn demand worker: {0}")]
    Spawn(String),

    #[error("Demand worker protocol error: {0}")]
    Protocol(String),

    #[error("Demand worker error: {0}")]
    Worker(String),

    #[error("Demand bridge stopped")]
    Stopped,
}

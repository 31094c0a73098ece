//! LLM adjustment layer
//!
//! One chat call per run prices the whole horizon. The answer is advisory:
//! every price still goes through the guardrails, every reason carries the
//! `"AI: "` prefix, and any failure degrades to the deterministic calendar.

pub mod adjuster;
pub mod client;
pub mod parser;
pub mod prompt;
pub mod sanitizer;

use serde::{Deserialize, Serialize};

pub use adjuster::{LlmAdjuster, LlmOutcome};
pub use client::{ChatCompletion, ChatProvider, HttpChatProvider, LlmSettings, RetryPolicy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

//! # nightrate common library
//!
//! Shared code for the nightrate workspace:
//! - Error type and result alias
//! - Bootstrap configuration (TOML, environment, platform defaults)
//! - Timezone and local-date helpers
//! - Pricing event bus
//! - SQLite initialization and the settings table

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};

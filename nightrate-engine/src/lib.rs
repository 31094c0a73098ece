//! nightrate-engine library interface
//!
//! Calendar generation pipeline, demand model bridge, LLM adjustment layer
//! and the hourly auto-pricing scheduler.

pub mod api;
pub mod config;
pub mod db;
pub mod demand;
pub mod error;
pub mod llm;
pub mod models;
pub mod pricing;
pub mod services;
pub mod utils;
pub mod workflow;

pub use crate::error::{GenerateError, ValidationError};
pub use crate::workflow::PricingEngine;

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last scheduler error for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            db,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Share the scheduler's error slot with the health endpoint
    pub fn with_last_error(mut self, last_error: Arc<RwLock<Option<String>>>) -> Self {
        self.last_error = last_error;
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

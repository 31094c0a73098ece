//! Pricing event types and the in-process event bus
//!
//! Events are broadcast on a `tokio::sync::broadcast` channel. Emitting with
//! no subscribers is not an error for callers; they usually ignore the result.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// One `(external_id, date, price)` row handed to a PMS adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedPrice {
    pub external_id: String,
    pub date: NaiveDate,
    pub price: i64,
}

/// nightrate event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PricingEvent {
    /// A calendar run started
    RunStarted {
        run_id: Uuid,
        property_id: String,
        trigger: String,
        timestamp: DateTime<Utc>,
    },

    /// A run found the property already priced today (no writes)
    RunSkipped {
        run_id: Uuid,
        property_id: String,
        timestamp: DateTime<Utc>,
    },

    /// A run persisted its calendar
    RunCompleted {
        run_id: Uuid,
        property_id: String,
        /// deterministic | ml_hybrid | ai_hybrid
        method: String,
        days_generated: usize,
        synced_properties: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A run failed fatally (nothing persisted)
    RunFailed {
        run_id: Uuid,
        property_id: String,
        code: String,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// Prices ready for PMS adapters
    CalendarPublished {
        property_id: String,
        prices: Vec<PublishedPrice>,
        timestamp: DateTime<Utc>,
    },

    /// A demand model artifact was replaced
    ModelRetrained {
        property_id: String,
        model_version: i64,
        val_rmse: f64,
        timestamp: DateTime<Utc>,
    },
}

impl PricingEvent {
    /// Event type name (matches the serde tag)
    pub fn event_type(&self) -> &'static str {
        match self {
            PricingEvent::RunStarted { .. } => "RunStarted",
            PricingEvent::RunSkipped { .. } => "RunSkipped",
            PricingEvent::RunCompleted { .. } => "RunCompleted",
            PricingEvent::RunFailed { .. } => "RunFailed",
            PricingEvent::CalendarPublished { .. } => "CalendarPublished",
            PricingEvent::ModelRetrained { .. } => "ModelRetrained",
        }
    }
}

/// Broadcast bus for [`PricingEvent`]
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PricingEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PricingEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)`, or `Err` when nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PricingEvent,
    ) -> Result<usize, broadcast::error::SendError<PricingEvent>> {
        self.tx.send(event)
    }

    /// Emit, logging at trace level when there are no subscribers
    pub fn emit_lossy(&self, event: PricingEvent) {
        let event_type = event.event_type();
        if self.tx.send(event).is_err() {
            tracing::trace!(event_type, "No subscribers for event");
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

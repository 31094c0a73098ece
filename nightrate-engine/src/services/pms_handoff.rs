//! Hand-off of emitted prices to PMS adapters

use async_trait::async_trait;
use chrono::Utc;

use nightrate_common::events::{EventBus, PricingEvent, PublishedPrice};
use nightrate_common::Result;

/// Receives `(external_id, date, price)` rows after a run persisted
#[async_trait]
pub trait PmsHandoff: Send + Sync {
    async fn publish(&self, property_id: &str, prices: Vec<PublishedPrice>) -> Result<()>;
}

/// Publishes a `CalendarPublished` event for adapters listening on the bus
pub struct EventBusHandoff {
    bus: EventBus,
}

impl EventBusHandoff {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl PmsHandoff for EventBusHandoff {
    async fn publish(&self, property_id: &str, prices: Vec<PublishedPrice>) -> Result<()> {
        if prices.is_empty() {
            return Ok(());
        }
        self.bus.emit_lossy(PricingEvent::CalendarPublished {
            property_id: property_id.to_string(),
            prices,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

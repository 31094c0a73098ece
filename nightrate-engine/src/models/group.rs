//! Property groups sharing one calendar

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum distance between any two members, in meters
pub const GEOFENCE_RADIUS_M: f64 = 500.0;

/// A set of co-located, structurally identical properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyGroup {
    pub id: String,
    pub name: String,
    pub main_property_id: String,
    pub sync_prices: bool,
    /// Instant of the last successful group run
    pub last_pricing_update: Option<DateTime<Utc>>,
    /// Member ids, excluding the main property
    pub members: Vec<String>,
}

impl PropertyGroup {
    pub fn is_main(&self, property_id: &str) -> bool {
        self.main_property_id == property_id
    }

    /// True when runs of `property_id` must propagate to the members
    pub fn propagates_from(&self, property_id: &str) -> bool {
        self.sync_prices && self.is_main(property_id)
    }
}

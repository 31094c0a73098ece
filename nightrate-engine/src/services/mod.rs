//! Collaborators of the pricing orchestrator

pub mod feature_store;
pub mod group_propagator;
pub mod pms_handoff;
pub mod quota_gate;

pub use feature_store::{FeatureSource, SqliteFeatureSource, FEATURE_READ_TIMEOUT};
pub use group_propagator::{propagate, PropagationReport};
pub use pms_handoff::{EventBusHandoff, PmsHandoff};
pub use quota_gate::QuotaGate;

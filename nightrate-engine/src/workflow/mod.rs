//! Pricing run workflow
//!
//! [`PricingEngine`] drives one calendar run; [`scheduler`] fans runs out
//! across subjects once per hour.

pub mod clock;
pub mod orchestrator;
pub mod scheduler;

pub use clock::{Clock, FixedClock, SystemClock};
pub use orchestrator::{price_grid, PricingEngine};
pub use scheduler::{AutoPricingScheduler, Subject, TickReport};

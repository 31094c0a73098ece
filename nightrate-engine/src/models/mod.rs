//! Domain types for pricing runs

pub mod calendar;
pub mod features;
pub mod group;
pub mod overrides;
pub mod property;
pub mod quota;

pub use calendar::{
    CalendarDay, CalendarResult, GenerateOptions, IssueCode, PricingMethod, RunIssue, RunStatus,
    Trigger, DEFAULT_HORIZON_DAYS, MAX_HORIZON_DAYS,
};
pub use features::MarketFeatures;
pub use group::PropertyGroup;
pub use overrides::{OverrideWrite, PriceOverride, UpsertReport, SYSTEM_USER};
pub use property::{
    Location, PriceEnvelope, Property, PropertyType, StayRules, Strategy, SurfaceBucket,
};
pub use quota::{QuotaCaps, QuotaDecision, QuotaUsage, SubscriptionStatus};

//! HTTP surface of nightrate-engine (health only)

pub mod health;

pub use health::health_routes;

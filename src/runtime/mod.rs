//! Runtime surface of a running scheduler.

pub mod health;

pub use health::{HealthCounters, HealthReport};

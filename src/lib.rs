//! # Prometheus Call Budget
//!
//! A rate-limited scheduler for calls against an external, quota-enforcing
//! API, driven by one persisted budget per (resource, operation type) pair.
//!
//! Each budget decides on its own when its next call may happen. It moves
//! from a short cadence into a reduced daily quota once a resource gets
//! heavy traffic. After a month in that mode it stops for good. Provider
//! rate-limit signals pause it outright.
//!
//! ## Key Features
//!
//! - **Budget state machine**: Normal, Reduced and Stopped modes with daily
//!   rollover, jittered cadence and hard cooldowns
//! - **Disjoint claims**: Due rows are leased under `FOR UPDATE SKIP LOCKED`,
//!   so any number of scheduler processes can share one table
//! - **Bounded worker pool**: Jobs run concurrently with a batch barrier
//!   providing back-pressure
//! - **Failure classification**: Missing credentials, unsupported operations,
//!   network errors and provider rate limits each get their own treatment
//! - **Graceful shutdown**: The loop observes a shutdown signal at every
//!   sleep and lets an in-flight batch finish
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_call_budget::builders::SchedulerBuilder;
//! use prometheus_call_budget::config::SchedulerConfig;
//! use prometheus_call_budget::core::BudgetKey;
//! use prometheus_call_budget::infra::{InMemoryBudgetStore, StaticCredentialRegistry};
//!
//! let registry = Arc::new(StaticCredentialRegistry::new());
//! registry.set(42, "token");
//!
//! let scheduler = SchedulerBuilder::new(SchedulerConfig::default())
//!     .store(Arc::new(InMemoryBudgetStore::new()))
//!     .registry(registry)
//!     .build()?;
//! scheduler.enroll(&[BudgetKey::new(42, 1), BudgetKey::new(42, 2)]).await?;
//!
//! let handle = scheduler.spawn();
//! // ...
//! handle.shutdown().await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions and budget accounting.
pub mod core;
/// Configuration models for the scheduler, worker pool and store.
pub mod config;
/// Builders to construct a scheduler from configuration.
pub mod builders;
/// Infrastructure adapters for storage, credentials and HTTP.
pub mod infra;
/// Runtime surface: health reporting.
pub mod runtime;
/// Shared utilities.
pub mod util;

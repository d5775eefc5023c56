//! Configuration models for the scheduler, its worker pool and its store.

pub mod pool;
pub mod scheduler;

pub use pool::WorkerPoolConfig;
pub use scheduler::{ConfigError, SchedulerConfig, StoreConfig};

//! Call log sinks backed by external storage.
//!
//! The bounded in-memory sink lives next to the trait in
//! [`crate::core::call_log`].

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "postgres")]
pub use postgres::PostgresCallLogSink;

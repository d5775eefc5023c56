//! Credential registries.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::StaticCredentialRegistry;
#[cfg(feature = "postgres")]
pub use postgres::PostgresCredentialRegistry;

//! Budget store backends.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryBudgetStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresBudgetStore;

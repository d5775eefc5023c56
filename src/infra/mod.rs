//! Infrastructure adapters: budget stores, call log sinks, credential
//! registries and HTTP invokers.

pub mod call_log;
#[cfg(feature = "http")]
pub mod http;
pub mod registry;
pub mod store;

#[cfg(feature = "http")]
pub use http::GraphInvoker;
pub use registry::StaticCredentialRegistry;
pub use store::InMemoryBudgetStore;

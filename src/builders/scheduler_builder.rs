//! Assemble a [`Scheduler`] from configuration plus collaborators.
//!
//! Every collaborator has an in-process default except the invoker, which
//! falls back to [`GraphInvoker`](crate::infra::GraphInvoker) when the
//! `http` feature is enabled.

use std::sync::Arc;

use crate::config::SchedulerConfig;
use crate::core::api_type::{ApiTypeCatalog, OperationCatalog};
use crate::core::call_log::{CallLogSink, InMemoryCallLogSink};
use crate::core::error::SchedulerError;
use crate::core::executor::{CallInvoker, CredentialRegistry};
use crate::core::scheduler::Scheduler;
use crate::core::store::BudgetStore;
use crate::infra::registry::StaticCredentialRegistry;
use crate::infra::store::InMemoryBudgetStore;

/// Entries kept by the default in-memory call log.
const DEFAULT_CALL_LOG_CAPACITY: usize = 10_000;

/// Step-by-step scheduler construction.
#[derive(Default)]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    store: Option<Arc<dyn BudgetStore>>,
    registry: Option<Arc<dyn CredentialRegistry>>,
    catalog: Option<Arc<dyn OperationCatalog>>,
    invoker: Option<Arc<dyn CallInvoker>>,
    call_log: Option<Arc<dyn CallLogSink>>,
}

impl SchedulerBuilder {
    /// Start from `config`.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Budget store (default: in-memory).
    #[must_use]
    pub fn store(mut self, store: Arc<dyn BudgetStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Credential registry (default: empty static registry).
    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn CredentialRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Operation catalog (default: built-in api types).
    #[must_use]
    pub fn catalog(mut self, catalog: Arc<dyn OperationCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// External call invoker.
    #[must_use]
    pub fn invoker(mut self, invoker: Arc<dyn CallInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    /// Call log sink (default: bounded in-memory).
    #[must_use]
    pub fn call_log(mut self, call_log: Arc<dyn CallLogSink>) -> Self {
        self.call_log = Some(call_log);
        self
    }

    /// Validate the configuration and build.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Config`] for invalid config or a missing invoker.
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        self.config.validate().map_err(SchedulerError::Config)?;
        let invoker = match self.invoker {
            Some(invoker) => invoker,
            None => default_invoker(&self.config)?,
        };
        Scheduler::new(
            self.config,
            self.store.unwrap_or_else(|| Arc::new(InMemoryBudgetStore::new())),
            self.registry
                .unwrap_or_else(|| Arc::new(StaticCredentialRegistry::new())),
            self.catalog
                .unwrap_or_else(|| Arc::new(ApiTypeCatalog::with_defaults())),
            invoker,
            self.call_log
                .unwrap_or_else(|| Arc::new(InMemoryCallLogSink::new(DEFAULT_CALL_LOG_CAPACITY))),
        )
    }
}

#[cfg(feature = "http")]
fn default_invoker(config: &SchedulerConfig) -> Result<Arc<dyn CallInvoker>, SchedulerError> {
    let invoker = crate::infra::http::GraphInvoker::new(
        config.graph_base_url.clone(),
        config.call_timeout(),
    )
    .map_err(|e| SchedulerError::Config(e.to_string()))?;
    Ok(Arc::new(invoker))
}

#[cfg(not(feature = "http"))]
fn default_invoker(_config: &SchedulerConfig) -> Result<Arc<dyn CallInvoker>, SchedulerError> {
    Err(SchedulerError::Config(
        "no invoker configured and the `http` feature is disabled".into(),
    ))
}

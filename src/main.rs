//! `call-budget-scheduler`: the scheduler daemon over PostgreSQL and the
//! Graph HTTP API.
//!
//! Configuration comes from the environment (a `.env` file is honored);
//! see [`SchedulerConfig::from_env`] and [`StoreConfig::from_env`].

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use prometheus_call_budget::builders::SchedulerBuilder;
use prometheus_call_budget::config::{SchedulerConfig, StoreConfig};
use prometheus_call_budget::core::{default_api_types, AppResult, ApiTypeCatalog, BudgetKey};
use prometheus_call_budget::infra::call_log::PostgresCallLogSink;
use prometheus_call_budget::infra::http::GraphInvoker;
use prometheus_call_budget::infra::registry::PostgresCredentialRegistry;
use prometheus_call_budget::infra::store::PostgresBudgetStore;
use prometheus_call_budget::util::init_tracing;

#[tokio::main]
async fn main() -> AppResult<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = SchedulerConfig::from_env().map_err(|e| {
        error!(error = %e, "configuration error");
        e
    })?;
    let store_config = StoreConfig::from_env()?;
    info!(
        workers = config.worker_count,
        batch_limit = config.effective_batch_limit(),
        call_timeout_secs = config.call_timeout_secs,
        "configuration loaded"
    );

    let store = PostgresBudgetStore::connect(&store_config)
        .await
        .context("connecting to the budget database")?;
    store.migrate().await.context("running migrations")?;
    let seeded = store.seed_api_types(&default_api_types()).await?;
    info!(seeded, "api types seeded");

    let mut catalog = ApiTypeCatalog::with_defaults();
    let api_types = store.api_types().await?;
    for ty in &api_types {
        catalog.insert(ty.clone());
    }

    let pool = store.pool().clone();
    let registry = Arc::new(PostgresCredentialRegistry::new(pool.clone()));
    let invoker = Arc::new(
        GraphInvoker::new(config.graph_base_url.clone(), config.call_timeout())
            .context("building the HTTP client")?,
    );
    let enroll_on_start = config.enroll_on_start;

    let scheduler = SchedulerBuilder::new(config)
        .store(Arc::new(store))
        .registry(Arc::clone(&registry) as _)
        .catalog(Arc::new(catalog))
        .invoker(invoker)
        .call_log(Arc::new(PostgresCallLogSink::new(pool.clone())))
        .build()?;

    if enroll_on_start {
        let keys: Vec<BudgetKey> = registry
            .resource_ids()
            .await?
            .into_iter()
            .flat_map(|r| api_types.iter().map(move |t| BudgetKey::new(r, t.id)))
            .collect();
        scheduler.enroll(&keys).await?;
    }

    let handle = scheduler.spawn();
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, waiting for the current batch");
    handle.shutdown().await?;

    pool.close().await;
    info!("shutdown complete");
    Ok(())
}

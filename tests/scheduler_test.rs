//! End-to-end scheduler scenarios over the in-memory store with scripted
//! collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use prometheus_call_budget::builders::SchedulerBuilder;
use prometheus_call_budget::config::SchedulerConfig;
use prometheus_call_budget::core::{
    ApiType, ApiTypeCatalog, BudgetJobExecutor, BudgetKey, BudgetStore, CallInvoker, CallLogEntry,
    ClaimedJob, Credential, InMemoryCallLogSink, InvokeError, InvokeResponse, OperationDescriptor,
    RetryPolicy, Scheduler, Tick,
};
use prometheus_call_budget::infra::{InMemoryBudgetStore, StaticCredentialRegistry};

/// Answers by operation name.
#[derive(Default)]
struct ScriptedInvoker {
    calls: AtomicUsize,
}

#[async_trait]
impl CallInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        operation: &OperationDescriptor,
        credential: &Credential,
    ) -> Result<InvokeResponse, InvokeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(credential.expose(), "tok-1");
        match operation.name.as_str() {
            "list_page_posts" => Ok(InvokeResponse::success(200, "{\"data\":[]}", "/1/posts")),
            "ads_insights" => Ok(InvokeResponse::failure(
                Some(400),
                Some(4),
                None,
                "{\"error\":{\"code\":4}}",
                "/act_1/insights",
            )),
            "server_error" => Ok(InvokeResponse::failure(
                Some(500),
                None,
                None,
                "oops",
                "/broken",
            )),
            "flaky" => Err(InvokeError::Network("connection reset".into())),
            "slow" => {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(InvokeResponse::success(200, "late", "/slow"))
            }
            other => panic!("unexpected operation {other}"),
        }
    }
}

struct Harness {
    scheduler: Scheduler,
    store: Arc<InMemoryBudgetStore>,
    call_log: Arc<InMemoryCallLogSink>,
    invoker: Arc<ScriptedInvoker>,
}

fn catalog() -> ApiTypeCatalog {
    let mut catalog = ApiTypeCatalog::with_defaults();
    for (id, name) in [(10, "flaky"), (11, "slow"), (12, "server_error")] {
        catalog.insert(ApiType {
            id,
            name: name.into(),
            description: None,
        });
        catalog.define(name, None, format!("/{name}"), Vec::new());
    }
    catalog
}

fn harness(config: SchedulerConfig) -> Harness {
    let store = Arc::new(InMemoryBudgetStore::new());
    let call_log = Arc::new(InMemoryCallLogSink::new(100));
    let invoker = Arc::new(ScriptedInvoker::default());
    let registry = Arc::new(StaticCredentialRegistry::new());
    registry.set(1, "tok-1");

    let scheduler = SchedulerBuilder::new(config)
        .store(store.clone())
        .registry(registry)
        .catalog(Arc::new(catalog()))
        .invoker(invoker.clone())
        .call_log(call_log.clone())
        .build()
        .unwrap();
    Harness {
        scheduler,
        store,
        call_log,
        invoker,
    }
}

fn small_config() -> SchedulerConfig {
    SchedulerConfig {
        worker_count: 2,
        call_timeout_secs: 1,
        store_retry_base_ms: 1,
        ..SchedulerConfig::default()
    }
}

fn log_for(entries: &[CallLogEntry], resource_id: i64) -> Vec<&CallLogEntry> {
    entries.iter().filter(|e| e.resource_id == resource_id).collect()
}

#[tokio::test]
async fn test_empty_store_is_idle() {
    let h = harness(small_config());
    assert_eq!(h.scheduler.tick().await.unwrap(), Tick::Empty);
    assert_eq!(h.scheduler.health().idle_ticks, 1);
}

#[tokio::test]
async fn test_batch_classifies_every_failure_kind() {
    let h = harness(small_config());
    let start = Utc::now();
    h.scheduler
        .enroll(&[
            BudgetKey::new(1, 1),
            BudgetKey::new(1, 2),
            BudgetKey::new(1, 3),
            BudgetKey::new(2, 1),
        ])
        .await
        .unwrap();

    let Tick::Ran(summary) = h.scheduler.tick_at(start).await.unwrap() else {
        panic!("expected a batch");
    };
    assert_eq!(summary.claimed, 4);
    assert_eq!(summary.dispatched, 3);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.credential_missing, 1);
    assert_eq!(summary.unpersisted, 0);
    // The unsupported operation never reaches the invoker.
    assert_eq!(h.invoker.calls.load(Ordering::SeqCst), 2);

    let ok = h.store.get(BudgetKey::new(1, 1)).await.unwrap().unwrap();
    assert_eq!((ok.total_calls, ok.total_success_calls), (1, 1));
    assert!(ok.cooldown_until.is_none());

    let limited = h.store.get(BudgetKey::new(1, 2)).await.unwrap().unwrap();
    assert_eq!(limited.last_error_code, Some(4));
    assert!(limited.cooldown_until.unwrap() >= start + chrono::Duration::seconds(900));
    assert_eq!(limited.next_eligible_at, limited.cooldown_until);

    let unsupported = h.store.get(BudgetKey::new(1, 3)).await.unwrap().unwrap();
    assert_eq!(unsupported.total_errors, 1);
    assert!(unsupported.cooldown_until.is_none());

    let no_token = h.store.get(BudgetKey::new(2, 1)).await.unwrap().unwrap();
    assert_eq!(no_token.total_errors, 1);
    assert!(no_token.cooldown_until.unwrap() >= start + chrono::Duration::seconds(300));

    let entries = h.call_log.entries();
    assert_eq!(entries.len(), 2);
    let limited_log = log_for(&entries, 1);
    assert_eq!(limited_log.len(), 1);
    assert_eq!(limited_log[0].endpoint, "/act_1/insights");
    assert_eq!(limited_log[0].http_status, Some(400));
    assert_eq!(limited_log[0].error_code, Some(4));
    assert_eq!(
        log_for(&entries, 2)[0].endpoint,
        "type:list_page_posts[credential-missing]"
    );

    let health = h.scheduler.health();
    assert_eq!(health.last_claimed, 4);
    assert_eq!(health.batches_run, 1);
    assert_eq!(health.pool.completed_tasks, 3);
}

#[tokio::test]
async fn test_nothing_due_sleeps_until_next_row() {
    let h = harness(small_config());
    let start = Utc::now();
    h.scheduler.enroll(&[BudgetKey::new(1, 1)]).await.unwrap();
    assert!(matches!(h.scheduler.tick_at(start).await.unwrap(), Tick::Ran(_)));

    match h.scheduler.tick_at(start).await.unwrap() {
        Tick::Idle(pause) => {
            assert!(pause >= Duration::from_secs(1));
            assert!(pause <= Duration::from_secs(5));
        }
        other => panic!("expected idle, got {other:?}"),
    }
}

#[tokio::test]
async fn test_network_failure_cools_down_two_minutes() {
    let h = harness(small_config());
    let start = Utc::now();
    h.scheduler.enroll(&[BudgetKey::new(1, 10)]).await.unwrap();
    h.scheduler.tick_at(start).await.unwrap();

    let b = h.store.get(BudgetKey::new(1, 10)).await.unwrap().unwrap();
    assert!(b.cooldown_until.unwrap() >= start + chrono::Duration::seconds(120));
    assert!(b.cooldown_until.unwrap() < start + chrono::Duration::seconds(300));
    let entries = h.call_log.entries();
    assert_eq!(entries[0].endpoint, "type:flaky[http-exception]");
    assert_eq!(entries[0].message, "network error: connection reset");
}

#[tokio::test]
async fn test_provider_error_without_code_has_no_cooldown() {
    let h = harness(small_config());
    h.scheduler.enroll(&[BudgetKey::new(1, 12)]).await.unwrap();
    h.scheduler.tick().await.unwrap();

    let b = h.store.get(BudgetKey::new(1, 12)).await.unwrap().unwrap();
    assert!(b.cooldown_until.is_none());
    assert_eq!(b.total_errors, 1);
    let entries = h.call_log.entries();
    assert_eq!(entries[0].endpoint, "/broken");
    assert_eq!(entries[0].http_status, Some(500));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_call_times_out_without_blocking_siblings() {
    let h = harness(small_config());
    h.scheduler
        .enroll(&[BudgetKey::new(1, 11), BudgetKey::new(1, 1)])
        .await
        .unwrap();

    let started = Instant::now();
    let Tick::Ran(summary) = h.scheduler.tick().await.unwrap() else {
        panic!("expected a batch");
    };
    // Deadline is twice the one-second call timeout.
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(summary.succeeded, 1);

    let slow = h.store.get(BudgetKey::new(1, 11)).await.unwrap().unwrap();
    assert_eq!(slow.total_errors, 1);
    assert!(slow.cooldown_until.is_some());
    let entries = h.call_log.entries();
    assert_eq!(entries[0].endpoint, "type:slow[http-exception]");
    assert_eq!(entries[0].message, "call timed out after 2s");

    let fast = h.store.get(BudgetKey::new(1, 1)).await.unwrap().unwrap();
    assert_eq!(fast.total_success_calls, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spawned_loop_runs_and_shuts_down() {
    let h = harness(small_config());
    h.scheduler.enroll(&[BudgetKey::new(1, 1)]).await.unwrap();
    let invoker = h.invoker.clone();
    let store = h.store.clone();

    let handle = h.scheduler.spawn();
    let deadline = Instant::now() + Duration::from_secs(3);
    while invoker.calls.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(handle.health().alive);

    let stopping = Instant::now();
    handle.shutdown().await.unwrap();
    assert!(stopping.elapsed() < Duration::from_secs(2));

    let b = store.get(BudgetKey::new(1, 1)).await.unwrap().unwrap();
    assert!(b.total_success_calls >= 1);
}

/// Sleeps briefly and records which resource each call ran for.
struct RecordingInvoker {
    pause: Duration,
    seen: parking_lot::Mutex<Vec<String>>,
}

#[async_trait]
impl CallInvoker for RecordingInvoker {
    async fn invoke(
        &self,
        _operation: &OperationDescriptor,
        credential: &Credential,
    ) -> Result<InvokeResponse, InvokeError> {
        tokio::time::sleep(self.pause).await;
        self.seen.lock().push(credential.expose().to_string());
        Ok(InvokeResponse::success(200, "{}", "/posts"))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queued_jobs_stay_leased_against_a_second_scheduler() {
    let store = Arc::new(InMemoryBudgetStore::new());
    let registry = Arc::new(StaticCredentialRegistry::new());
    let keys: Vec<BudgetKey> = (1..=20).map(|r| BudgetKey::new(r, 1)).collect();
    for key in &keys {
        registry.set(key.resource_id, &format!("tok-{}", key.resource_id));
    }
    let invoker = Arc::new(RecordingInvoker {
        pause: Duration::from_millis(100),
        seen: parking_lot::Mutex::new(Vec::new()),
    });
    // One worker, twenty rows: the last job waits for nineteen others.
    let config = SchedulerConfig {
        worker_count: 1,
        call_timeout_secs: 1,
        store_retry_base_ms: 1,
        ..SchedulerConfig::default()
    };
    let build = || {
        SchedulerBuilder::new(config.clone())
            .store(store.clone())
            .registry(registry.clone())
            .invoker(invoker.clone())
            .call_log(Arc::new(InMemoryCallLogSink::new(100)))
            .build()
            .unwrap()
    };
    let first = Arc::new(build());
    let second = build();
    first.enroll(&keys).await.unwrap();

    let runner = Arc::clone(&first);
    let batch = tokio::spawn(async move { runner.tick().await });
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(matches!(second.tick().await.unwrap(), Tick::Idle(_)));

    let Tick::Ran(summary) = batch.await.unwrap().unwrap() else {
        panic!("expected a batch");
    };
    assert_eq!(summary.claimed, 20);
    assert_eq!(summary.succeeded, 20);
    assert_eq!(summary.expired, 0);

    let mut seen = invoker.seen.lock().clone();
    assert_eq!(seen.len(), 20);
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 20);
}

fn executor(
    store: Arc<InMemoryBudgetStore>,
    invoker: Arc<ScriptedInvoker>,
    call_log: Arc<InMemoryCallLogSink>,
) -> BudgetJobExecutor {
    BudgetJobExecutor::new(
        Arc::new(catalog()),
        invoker,
        store,
        call_log,
        Duration::from_secs(2),
        RetryPolicy::default(),
    )
}

#[tokio::test]
async fn test_job_with_short_lease_is_not_started() {
    let store = Arc::new(InMemoryBudgetStore::new());
    let invoker = Arc::new(ScriptedInvoker::default());
    let call_log = Arc::new(InMemoryCallLogSink::new(10));
    let exec = executor(store.clone(), invoker.clone(), call_log.clone());
    let key = BudgetKey::new(1, 1);
    store.enroll(&[key], Utc::now()).await.unwrap();

    // One second of lease left, two seconds of deadline needed.
    let report = exec
        .run(ClaimedJob {
            key,
            credential: Credential::new("tok-1"),
            lease_until: Utc::now() + chrono::Duration::seconds(1),
        })
        .await;
    assert!(report.lease_expired);
    assert!(!report.is_success());
    assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
    let untouched = store.get(key).await.unwrap().unwrap();
    assert_eq!(untouched.total_calls, 0);

    let report = exec
        .run(ClaimedJob {
            key,
            credential: Credential::new("tok-1"),
            lease_until: Utc::now() + chrono::Duration::seconds(30),
        })
        .await;
    assert!(report.is_success());
    assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);
    assert!(call_log.entries().is_empty());
}

#[tokio::test]
async fn test_missing_credential_after_lease_leaves_row_alone() {
    let store = Arc::new(InMemoryBudgetStore::new());
    let call_log = Arc::new(InMemoryCallLogSink::new(10));
    let exec = executor(store.clone(), Arc::new(ScriptedInvoker::default()), call_log.clone());
    let key = BudgetKey::new(2, 1);
    store.enroll(&[key], Utc::now()).await.unwrap();

    let report = exec
        .reject_missing_credential(key, Utc::now() - chrono::Duration::seconds(1))
        .await;
    assert!(report.lease_expired);
    let b = store.get(key).await.unwrap().unwrap();
    assert!(b.cooldown_until.is_none());
    assert_eq!(b.total_errors, 0);
    assert!(call_log.entries().is_empty());
}

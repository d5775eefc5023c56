//! One scheduled call: resolve, invoke, classify, persist.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::core::api_type::OperationCatalog;
use crate::core::budget::{BudgetKey, CallOutcome, Cooldown};
use crate::core::call_log::{build_call_log_entry, CallLogEntry, CallLogSink};
use crate::core::cooldown::{cooldown_for_response, NETWORK_COOLDOWN_SECS};
use crate::core::error::{CallFailureKind, InvokeError, StoreError};
use crate::core::executor::{CallInvoker, Credential, WorkerExecutor};
use crate::core::retry::{retry_with_backoff, RetryPolicy};
use crate::core::store::BudgetStore;
use crate::util::clock;

/// Payload handed to a worker: a claimed row plus its resource's credential.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    /// Claimed row.
    pub key: BudgetKey,
    /// Credential resolved for `key.resource_id`.
    pub credential: Credential,
    /// Earliest moment the claim lease may lapse. After it another
    /// scheduler may claim the same row.
    pub lease_until: DateTime<Utc>,
}

/// What happened to one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    /// Row the job ran for.
    pub key: BudgetKey,
    /// `None` on success.
    pub failure: Option<CallFailureKind>,
    /// Cooldown applied, seconds.
    pub cooldown_secs: Option<u64>,
    /// Whether the outcome reached the store.
    pub persisted: bool,
    /// The lease ran short before the job could start; nothing was called
    /// or written and the row goes back to whoever claims it next.
    #[serde(default)]
    pub lease_expired: bool,
}

impl JobReport {
    /// Whether the external call succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failure.is_none() && !self.lease_expired
    }

    const fn expired(key: BudgetKey) -> Self {
        Self {
            key,
            failure: None,
            cooldown_secs: None,
            persisted: false,
            lease_expired: true,
        }
    }
}

/// Shared collaborators of every job.
struct Collaborators {
    catalog: Arc<dyn OperationCatalog>,
    invoker: Arc<dyn CallInvoker>,
    store: Arc<dyn BudgetStore>,
    call_log: Arc<dyn CallLogSink>,
}

/// Executes claimed jobs on the worker pool.
#[derive(Clone)]
pub struct BudgetJobExecutor {
    inner: Arc<Collaborators>,
    deadline: Duration,
    retry: RetryPolicy,
}

impl BudgetJobExecutor {
    /// Build an executor. `deadline` bounds the whole external call.
    pub fn new(
        catalog: Arc<dyn OperationCatalog>,
        invoker: Arc<dyn CallInvoker>,
        store: Arc<dyn BudgetStore>,
        call_log: Arc<dyn CallLogSink>,
        deadline: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Collaborators {
                catalog,
                invoker,
                store,
                call_log,
            }),
            deadline,
            retry,
        }
    }

    /// Run one job to completion and persist its outcome.
    ///
    /// A job whose lease cannot cover a full call deadline any more is
    /// dropped untouched.
    pub async fn run(&self, job: ClaimedJob) -> JobReport {
        let key = job.key;
        if !self.lease_covers_call(job.lease_until) {
            warn!(budget = %key, lease_until = %job.lease_until, "claim lease too short to start the call, skipping");
            return JobReport::expired(key);
        }
        let (outcome, failure, entry) = self.attempt(&job).await;
        let cooldown_secs = outcome.cooldown.map(|c| c.seconds);

        match failure {
            None => debug!(budget = %key, "call succeeded"),
            Some(kind) => warn!(budget = %key, failure = %kind, cooldown_secs, "call failed"),
        }

        let persisted = self.settle(key, &outcome, entry).await;
        JobReport {
            key,
            failure,
            cooldown_secs,
            persisted,
            lease_expired: false,
        }
    }

    /// Whether a call started now ends, at the latest, when the lease does.
    fn lease_covers_call(&self, lease_until: DateTime<Utc>) -> bool {
        chrono::Duration::from_std(self.deadline)
            .ok()
            .and_then(|deadline| clock::now().checked_add_signed(deadline))
            .is_some_and(|end| end <= lease_until)
    }

    /// Park a row whose resource has no usable credential. No external call
    /// is attempted. Nothing is written once `lease_until` has passed.
    pub async fn reject_missing_credential(
        &self,
        key: BudgetKey,
        lease_until: DateTime<Utc>,
    ) -> JobReport {
        if clock::now() >= lease_until {
            warn!(budget = %key, "claim lease lapsed before the row could be parked");
            return JobReport::expired(key);
        }
        let seconds = crate::core::cooldown::CREDENTIAL_MISSING_COOLDOWN_SECS;
        let outcome = CallOutcome::failure_with_cooldown(Cooldown::plain(seconds));
        let label = format!(
            "type:{}[{}]",
            self.inner.catalog.name_of(key.api_type_id),
            CallFailureKind::CredentialMissing.label()
        );
        let entry = build_call_log_entry(
            key.resource_id,
            label,
            None,
            None,
            None,
            "no credential for resource",
            clock::now(),
        );
        warn!(budget = %key, cooldown_secs = seconds, "credential missing");
        let persisted = self.settle(key, &outcome, Some(entry)).await;
        JobReport {
            key,
            failure: Some(CallFailureKind::CredentialMissing),
            cooldown_secs: Some(seconds),
            persisted,
            lease_expired: false,
        }
    }

    async fn attempt(
        &self,
        job: &ClaimedJob,
    ) -> (CallOutcome, Option<CallFailureKind>, Option<CallLogEntry>) {
        let key = job.key;
        let operation = match self.inner.catalog.resolve(key.api_type_id) {
            Ok(op) => op,
            Err(unsupported) => {
                warn!(budget = %key, endpoint = %unsupported.endpoint_label(), "unsupported operation");
                return (
                    CallOutcome::failure(),
                    Some(CallFailureKind::UnsupportedOperation),
                    None,
                );
            }
        };

        let invoked = tokio::time::timeout(
            self.deadline,
            self.inner.invoker.invoke(&operation, &job.credential),
        )
        .await
        .unwrap_or(Err(InvokeError::Timeout(self.deadline.as_secs())));
        let called_at = clock::now();

        match invoked {
            Ok(resp) if resp.ok => (CallOutcome::success(), None, None),
            Ok(resp) => {
                let cooldown = cooldown_for_response(resp.error_code, resp.error_subcode, resp.http_status);
                let kind = if cooldown.is_some() {
                    CallFailureKind::RateLimited
                } else {
                    CallFailureKind::ProviderError
                };
                let entry = build_call_log_entry(
                    key.resource_id,
                    resp.endpoint_label,
                    resp.http_status,
                    resp.error_code,
                    resp.error_subcode,
                    &resp.body,
                    called_at,
                );
                let outcome = cooldown.map_or_else(CallOutcome::failure, CallOutcome::failure_with_cooldown);
                (outcome, Some(kind), Some(entry))
            }
            Err(err) => {
                let entry = build_call_log_entry(
                    key.resource_id,
                    format!(
                        "type:{}[{}]",
                        operation.name,
                        CallFailureKind::NetworkOrTimeout.label()
                    ),
                    None,
                    None,
                    None,
                    &err.to_string(),
                    called_at,
                );
                (
                    CallOutcome::failure_with_cooldown(Cooldown::plain(NETWORK_COOLDOWN_SECS)),
                    Some(CallFailureKind::NetworkOrTimeout),
                    Some(entry),
                )
            }
        }
    }

    /// Write the outcome (with retries) and the log entry. Returns whether
    /// the budget row was updated.
    async fn settle(&self, key: BudgetKey, outcome: &CallOutcome, entry: Option<CallLogEntry>) -> bool {
        let store = &self.inner.store;
        let persisted = retry_with_backoff("apply-outcome", &self.retry, StoreError::is_retryable, || {
            store.apply_outcome(key, outcome, clock::now())
        })
        .await;
        if let Err(e) = &persisted {
            error!(budget = %key, error = %e, "failed to persist call outcome");
        }

        if let Some(entry) = entry {
            if let Err(e) = self.inner.call_log.append(entry).await {
                error!(budget = %key, error = %e, "failed to append call log entry");
            }
        }
        persisted.is_ok()
    }
}

#[async_trait]
impl WorkerExecutor<ClaimedJob, JobReport> for BudgetJobExecutor {
    async fn execute(&self, payload: ClaimedJob) -> JobReport {
        self.run(payload).await
    }
}

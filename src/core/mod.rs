//! Core scheduling abstractions and call budget accounting.

pub mod api_type;
pub mod budget;
pub mod call_log;
pub mod claim;
pub mod cooldown;
pub mod error;
pub mod executor;
pub mod job;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod worker_pool;

pub use api_type::{
    default_api_types, ApiType, ApiTypeCatalog, LookupStep, OperationCatalog, OperationDescriptor,
    Unsupported,
};
pub use budget::{
    ApiTypeId, BudgetKey, BudgetMode, CallBudget, CallOutcome, Cooldown, ResourceId,
    REDUCED_DAILY_CALLS, REDUCED_THRESHOLD, STOP_AFTER_REDUCED_DAYS,
};
pub use call_log::{build_call_log_entry, CallLogEntry, CallLogSink, InMemoryCallLogSink};
pub use claim::{claim_row, LeasePolicy};
pub use cooldown::{cooldown_for_response, cooldown_seconds};
pub use error::{AppResult, CallFailureKind, InvokeError, SchedulerError, StoreError};
pub use executor::{CallInvoker, Credential, CredentialRegistry, InvokeResponse, WorkerExecutor};
pub use job::{BudgetJobExecutor, ClaimedJob, JobReport};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use scheduler::{BatchSummary, Scheduler, SchedulerHandle, Tick};
pub use store::BudgetStore;
pub use worker_pool::{PoolError, PoolStats, WorkerPool};

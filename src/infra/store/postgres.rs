//! PostgreSQL budget store.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` inside a single transaction, so any
//! number of scheduler processes can share one table: a row locked by one
//! claimer is invisible to the others until its lease is committed.
//! Every transaction sets a short `lock_timeout`; a contended row surfaces
//! as [`StoreError::LockTimeout`] and is retried by the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::core::api_type::ApiType;
use crate::core::budget::{BudgetKey, BudgetMode, CallBudget, CallOutcome};
use crate::core::claim::{claim_row, LeasePolicy};
use crate::core::error::StoreError;
use crate::core::store::BudgetStore;

const SELECT_BUDGET: &str = "SELECT resource_id, api_type_id, last_checked_at, total_calls, \
    total_success_calls, total_errors, daily_calls, daily_success_calls, daily_reset_at, mode, \
    reduced_mode_start, reduced_days_count, cooldown_until, next_eligible_at, last_rate_limit_at, \
    last_error_code, last_error_subcode FROM call_budget";

/// Schema statements, applied in order. All are idempotent.
#[must_use]
pub fn migrations() -> &'static [&'static str] {
    &[
        r"
CREATE TABLE IF NOT EXISTS api_type (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT
)",
        r"
CREATE TABLE IF NOT EXISTS call_budget (
    resource_id BIGINT NOT NULL,
    api_type_id INTEGER NOT NULL,
    last_checked_at TIMESTAMPTZ,
    total_calls BIGINT NOT NULL DEFAULT 0,
    total_success_calls BIGINT NOT NULL DEFAULT 0,
    total_errors BIGINT NOT NULL DEFAULT 0,
    daily_calls BIGINT NOT NULL DEFAULT 0,
    daily_success_calls BIGINT NOT NULL DEFAULT 0,
    daily_reset_at TIMESTAMPTZ,
    mode TEXT NOT NULL DEFAULT 'normal' CHECK (mode IN ('normal', 'reduced', 'stopped')),
    reduced_mode_start TIMESTAMPTZ,
    reduced_days_count INTEGER NOT NULL DEFAULT 0,
    cooldown_until TIMESTAMPTZ,
    next_eligible_at TIMESTAMPTZ,
    last_rate_limit_at TIMESTAMPTZ,
    last_error_code BIGINT,
    last_error_subcode BIGINT,
    PRIMARY KEY (resource_id, api_type_id)
)",
        "CREATE INDEX IF NOT EXISTS idx_call_budget_next_eligible ON call_budget (next_eligible_at)",
        "CREATE INDEX IF NOT EXISTS idx_call_budget_mode_next ON call_budget (mode, next_eligible_at)",
        r"
CREATE TABLE IF NOT EXISTS call_log (
    id UUID PRIMARY KEY,
    resource_id BIGINT NOT NULL,
    endpoint TEXT NOT NULL,
    http_status INTEGER,
    error_code BIGINT,
    error_subcode BIGINT,
    message TEXT NOT NULL,
    called_at TIMESTAMPTZ NOT NULL
)",
        "CREATE INDEX IF NOT EXISTS idx_call_log_resource_called ON call_log (resource_id, called_at)",
        r"
CREATE TABLE IF NOT EXISTS resource_credential (
    resource_id BIGINT PRIMARY KEY,
    access_token TEXT,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)",
    ]
}

/// Apply [`migrations`] on `pool`.
///
/// # Errors
///
/// Returns the first failing statement's error.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    for stmt in migrations() {
        sqlx::query(stmt).execute(pool).await?;
    }
    info!(statements = migrations().len(), "call budget schema migrated");
    Ok(())
}

/// Budget store backed by the `call_budget` table.
#[derive(Clone)]
pub struct PostgresBudgetStore {
    pool: PgPool,
    lock_timeout_secs: u64,
}

impl PostgresBudgetStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool, lock_timeout_secs: u64) -> Self {
        Self {
            pool,
            lock_timeout_secs,
        }
    }

    /// Open a pool from config.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] or a backend error if the
    /// database cannot be reached.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await?;
        Ok(Self::from_pool(pool, config.lock_timeout_secs))
    }

    /// Underlying pool, shared with the call log sink and registry.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the schema.
    ///
    /// # Errors
    ///
    /// See [`run_migrations`].
    pub async fn migrate(&self) -> Result<(), StoreError> {
        run_migrations(&self.pool).await
    }

    /// Insert missing api type records; existing ids are left untouched.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub async fn seed_api_types(&self, types: &[ApiType]) -> Result<usize, StoreError> {
        let mut created = 0;
        for ty in types {
            let res = sqlx::query(
                "INSERT INTO api_type (id, name, description) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            )
            .bind(ty.id)
            .bind(&ty.name)
            .bind(&ty.description)
            .execute(&self.pool)
            .await?;
            created += usize::try_from(res.rows_affected()).unwrap_or(0);
        }
        Ok(created)
    }

    /// All api type records ordered by id.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub async fn api_types(&self) -> Result<Vec<ApiType>, StoreError> {
        let rows = sqlx::query("SELECT id, name, description FROM api_type ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<ApiType, StoreError> {
                Ok(ApiType {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    description: row.try_get("description")?,
                })
            })
            .collect()
    }

    async fn set_lock_timeout(&self, conn: &mut PgConnection) -> Result<(), StoreError> {
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}s", self.lock_timeout_secs))
            .execute(conn)
            .await?;
        Ok(())
    }
}

fn to_db(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

fn from_db(row: &PgRow, column: &str) -> Result<u64, StoreError> {
    let raw: i64 = row.try_get(column)?;
    u64::try_from(raw).map_err(|_| StoreError::Corrupt(format!("{column} is negative: {raw}")))
}

fn decode(row: &PgRow) -> Result<CallBudget, StoreError> {
    let mode: String = row.try_get("mode")?;
    let reduced_days: i32 = row.try_get("reduced_days_count")?;
    Ok(CallBudget {
        key: BudgetKey::new(row.try_get("resource_id")?, row.try_get("api_type_id")?),
        last_checked_at: row.try_get("last_checked_at")?,
        total_calls: from_db(row, "total_calls")?,
        total_success_calls: from_db(row, "total_success_calls")?,
        total_errors: from_db(row, "total_errors")?,
        daily_calls: from_db(row, "daily_calls")?,
        daily_success_calls: from_db(row, "daily_success_calls")?,
        daily_reset_at: row.try_get("daily_reset_at")?,
        mode: mode.parse::<BudgetMode>().map_err(StoreError::Corrupt)?,
        reduced_mode_start: row.try_get("reduced_mode_start")?,
        reduced_days_count: u32::try_from(reduced_days)
            .map_err(|_| StoreError::Corrupt(format!("reduced_days_count is negative: {reduced_days}")))?,
        cooldown_until: row.try_get("cooldown_until")?,
        next_eligible_at: row.try_get("next_eligible_at")?,
        last_rate_limit_at: row.try_get("last_rate_limit_at")?,
        last_error_code: row.try_get("last_error_code")?,
        last_error_subcode: row.try_get("last_error_subcode")?,
    })
}

async fn write_row(conn: &mut PgConnection, b: &CallBudget) -> Result<(), StoreError> {
    sqlx::query(
        r"
UPDATE call_budget SET
    last_checked_at = $3,
    total_calls = $4,
    total_success_calls = $5,
    total_errors = $6,
    daily_calls = $7,
    daily_success_calls = $8,
    daily_reset_at = $9,
    mode = $10,
    reduced_mode_start = $11,
    reduced_days_count = $12,
    cooldown_until = $13,
    next_eligible_at = $14,
    last_rate_limit_at = $15,
    last_error_code = $16,
    last_error_subcode = $17
WHERE resource_id = $1 AND api_type_id = $2",
    )
    .bind(b.key.resource_id)
    .bind(b.key.api_type_id)
    .bind(b.last_checked_at)
    .bind(to_db(b.total_calls))
    .bind(to_db(b.total_success_calls))
    .bind(to_db(b.total_errors))
    .bind(to_db(b.daily_calls))
    .bind(to_db(b.daily_success_calls))
    .bind(b.daily_reset_at)
    .bind(b.mode.as_str())
    .bind(b.reduced_mode_start)
    .bind(i32::try_from(b.reduced_days_count).unwrap_or(i32::MAX))
    .bind(b.cooldown_until)
    .bind(b.next_eligible_at)
    .bind(b.last_rate_limit_at)
    .bind(b.last_error_code)
    .bind(b.last_error_subcode)
    .execute(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl BudgetStore for PostgresBudgetStore {
    async fn enroll(&self, keys: &[BudgetKey], now: DateTime<Utc>) -> Result<usize, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let resources: Vec<i64> = keys.iter().map(|k| k.resource_id).collect();
        let types: Vec<i32> = keys.iter().map(|k| k.api_type_id).collect();
        let res = sqlx::query(
            r"
INSERT INTO call_budget (resource_id, api_type_id, daily_reset_at)
SELECT r, a, $3 FROM UNNEST($1::BIGINT[], $2::INTEGER[]) AS t(r, a)
ON CONFLICT (resource_id, api_type_id) DO NOTHING",
        )
        .bind(resources)
        .bind(types)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(usize::try_from(res.rows_affected()).unwrap_or(0))
    }

    async fn get(&self, key: BudgetKey) -> Result<Option<CallBudget>, StoreError> {
        let sql = format!("{SELECT_BUDGET} WHERE resource_id = $1 AND api_type_id = $2");
        let row = sqlx::query(&sql)
            .bind(key.resource_id)
            .bind(key.api_type_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode).transpose()
    }

    async fn has_any(&self) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM call_budget) AS present")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("present")?)
    }

    async fn earliest_next_eligible(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row = sqlx::query(
            "SELECT MIN(next_eligible_at) AS earliest FROM call_budget WHERE mode <> 'stopped'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("earliest")?)
    }

    async fn claim_due_jobs(
        &self,
        now: DateTime<Utc>,
        limit: usize,
        lease: &LeasePolicy,
    ) -> Result<Vec<BudgetKey>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut tx = self.pool.begin().await?;
        self.set_lock_timeout(&mut *tx).await?;

        let overdue_sql = format!(
            "{SELECT_BUDGET} WHERE mode <> 'stopped' AND next_eligible_at <= $1 \
             ORDER BY next_eligible_at ASC LIMIT $2 FOR UPDATE SKIP LOCKED"
        );
        let mut rows = sqlx::query(&overdue_sql)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&mut *tx)
            .await?;

        let left = limit.saturating_sub(rows.len());
        if left > 0 {
            let fresh_sql = format!(
                "{SELECT_BUDGET} WHERE mode <> 'stopped' AND next_eligible_at IS NULL \
                 LIMIT $1 FOR UPDATE SKIP LOCKED"
            );
            let fresh = sqlx::query(&fresh_sql)
                .bind(i64::try_from(left).unwrap_or(i64::MAX))
                .fetch_all(&mut *tx)
                .await?;
            rows.extend(fresh);
        }

        let mut claimed = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut budget = decode(row)?;
            if claim_row(&mut budget, now, lease) {
                claimed.push(budget.key);
            }
            write_row(&mut *tx, &budget).await?;
        }
        tx.commit().await?;

        debug!(selected = rows.len(), claimed = claimed.len(), "claim committed");
        Ok(claimed)
    }

    async fn apply_outcome(
        &self,
        key: BudgetKey,
        outcome: &CallOutcome,
        now: DateTime<Utc>,
    ) -> Result<CallBudget, StoreError> {
        let mut tx = self.pool.begin().await?;
        self.set_lock_timeout(&mut *tx).await?;

        sqlx::query(
            "INSERT INTO call_budget (resource_id, api_type_id, daily_reset_at) VALUES ($1, $2, $3) \
             ON CONFLICT (resource_id, api_type_id) DO NOTHING",
        )
        .bind(key.resource_id)
        .bind(key.api_type_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let sql = format!("{SELECT_BUDGET} WHERE resource_id = $1 AND api_type_id = $2 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(key.resource_id)
            .bind(key.api_type_id)
            .fetch_one(&mut *tx)
            .await?;
        let mut budget = decode(&row)?;
        budget.apply_outcome(outcome, now);
        write_row(&mut *tx, &budget).await?;
        tx.commit().await?;
        Ok(budget)
    }
}

//! # Session Catalog Operations
//!
//! The [`SessionControl`] trait is the governor's only seam to the monitored
//! database: one atomic telemetry read and three single-statement
//! terminate operations. Each termination query is a CTE that selects and
//! ranks candidate rows from `pg_stat_activity` and terminates them in the
//! same statement, so the ranking and the action observe one catalog
//! instant — never a select followed by a second round trip.
//!
//! Only `client backend` sessions are visible to any of these queries.
//! Internal and system backends are excluded by the `WHERE` clause, by
//! construction, so no post-filtering step can get it wrong.
//!
//! `pg_terminate_backend` returns `false` for a session that is already
//! gone; that is treated as success, which makes termination idempotent.

use crate::error::{CollectionError, ExecutionError};
use crate::telemetry::{ConnectionRecord, SaturationSnapshot, SessionState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};

/// Read-and-act boundary against the monitored database.
#[async_trait]
pub trait SessionControl: Send + Sync {
    /// One consistent snapshot of session state.
    async fn sample(&self) -> Result<SaturationSnapshot, CollectionError>;

    /// Terminate every idle client session older than the threshold.
    /// Unbounded: only idle sessions qualify, so the operation is
    /// zero-impact by construction.
    async fn terminate_idle(
        &self,
        older_than_seconds: i64,
    ) -> Result<Vec<ConnectionRecord>, ExecutionError>;

    /// Terminate the top `limit` sessions ranked safest-first:
    /// idle, then idle-in-transaction, then (only when `include_active`)
    /// active, longest duration first within each tier.
    async fn terminate_ranked(
        &self,
        limit: i64,
        include_active: bool,
    ) -> Result<Vec<ConnectionRecord>, ExecutionError>;

    /// Terminate active sessions whose current statement has run longer
    /// than the threshold.
    async fn terminate_long_queries(
        &self,
        min_duration_seconds: i64,
    ) -> Result<Vec<ConnectionRecord>, ExecutionError>;
}

/// Counts, max duration, and ratio from a single catalog read, so every
/// field reflects the same instant.
const TELEMETRY_QUERY: &str = r"
SELECT
    count(*) FILTER (WHERE state = 'active')                  AS active_count,
    count(*) FILTER (WHERE state = 'idle')                    AS idle_count,
    count(*) FILTER (WHERE state LIKE 'idle in transaction%') AS idle_in_transaction_count,
    COALESCE(max(EXTRACT(EPOCH FROM (now() - query_start)))
        FILTER (WHERE state = 'active'), 0)::bigint           AS max_query_duration_seconds,
    count(*)::float8
        / (SELECT setting::float8 FROM pg_settings
           WHERE name = 'max_connections')                    AS conn_usage_ratio,
    now()                                                     AS observed_at
FROM pg_stat_activity
WHERE backend_type = 'client backend'
  AND pid <> pg_backend_pid()
";

const TERMINATE_IDLE_QUERY: &str = r"
WITH candidates AS (
    SELECT pid, state, backend_type,
           EXTRACT(EPOCH FROM (now() - state_change))::bigint AS duration_seconds
    FROM pg_stat_activity
    WHERE backend_type = 'client backend'
      AND pid <> pg_backend_pid()
      AND state = 'idle'
      AND now() - state_change > make_interval(secs => $1)
)
SELECT pid, state, backend_type, duration_seconds,
       pg_terminate_backend(pid) AS terminated
FROM candidates
ORDER BY duration_seconds DESC
";

/// Ranked shed query: termination priority idle (1) < idle-in-transaction
/// (2) < active (3), longest-held first within a tier. `$2` gates whether
/// active sessions are candidates at all.
const TERMINATE_RANKED_QUERY: &str = r"
WITH ranked AS (
    SELECT pid, state, backend_type,
           GREATEST(
               COALESCE(EXTRACT(EPOCH FROM (now() - query_start)), 0),
               COALESCE(EXTRACT(EPOCH FROM (now() - xact_start)), 0),
               COALESCE(EXTRACT(EPOCH FROM (now() - state_change)), 0)
           )::bigint AS duration_seconds,
           CASE
               WHEN state = 'idle' THEN 1
               WHEN state LIKE 'idle in transaction%' THEN 2
               ELSE 3
           END AS termination_priority
    FROM pg_stat_activity
    WHERE backend_type = 'client backend'
      AND pid <> pg_backend_pid()
      AND (state IN ('idle', 'idle in transaction', 'idle in transaction (aborted)')
           OR (state = 'active' AND $2))
    ORDER BY termination_priority, duration_seconds DESC
    LIMIT $1
)
SELECT pid, state, backend_type, duration_seconds,
       pg_terminate_backend(pid) AS terminated
FROM ranked
ORDER BY termination_priority, duration_seconds DESC
";

const TERMINATE_LONG_QUERIES_QUERY: &str = r"
WITH long_running AS (
    SELECT pid, state, backend_type,
           EXTRACT(EPOCH FROM (now() - query_start))::bigint AS duration_seconds
    FROM pg_stat_activity
    WHERE backend_type = 'client backend'
      AND pid <> pg_backend_pid()
      AND state = 'active'
      AND now() - query_start > make_interval(secs => $1)
)
SELECT pid, state, backend_type, duration_seconds,
       pg_terminate_backend(pid) AS terminated
FROM long_running
ORDER BY duration_seconds DESC
";

#[derive(Debug, FromRow)]
struct SnapshotRow {
    active_count: i64,
    idle_count: i64,
    idle_in_transaction_count: i64,
    max_query_duration_seconds: i64,
    conn_usage_ratio: f64,
    observed_at: DateTime<Utc>,
}

impl From<SnapshotRow> for SaturationSnapshot {
    fn from(row: SnapshotRow) -> Self {
        SaturationSnapshot {
            conn_usage_ratio: row.conn_usage_ratio,
            max_query_duration_seconds: row.max_query_duration_seconds,
            active_count: row.active_count,
            idle_count: row.idle_count,
            idle_in_transaction_count: row.idle_in_transaction_count,
            observed_at: row.observed_at,
        }
    }
}

/// Production implementation over a live PostgreSQL pool.
#[derive(Clone)]
pub struct PgSessionControl {
    pool: PgPool,
}

impl PgSessionControl {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Stream a terminate statement's result rows, counting completed
    /// terminations so a mid-stream failure can report how far it got.
    async fn stream_terminations(
        &self,
        query: sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<Vec<ConnectionRecord>, ExecutionError> {
        let mut rows = query.fetch(&self.pool);
        let mut terminated: Vec<ConnectionRecord> = Vec::new();

        loop {
            match rows.try_next().await {
                Ok(Some(row)) => match parse_session_row(&row) {
                    Ok(record) => terminated.push(record),
                    Err(reason) => {
                        return Err(ExecutionError::PartialFailure {
                            terminated_so_far: terminated.len() as u64,
                            reason,
                        })
                    }
                },
                Ok(None) => return Ok(terminated),
                Err(err) if terminated.is_empty() => {
                    return Err(ExecutionError::Unreachable(err.to_string()))
                }
                Err(err) => {
                    return Err(ExecutionError::PartialFailure {
                        terminated_so_far: terminated.len() as u64,
                        reason: err.to_string(),
                    })
                }
            }
        }
    }
}

#[async_trait]
impl SessionControl for PgSessionControl {
    async fn sample(&self) -> Result<SaturationSnapshot, CollectionError> {
        let row: SnapshotRow = sqlx::query_as(TELEMETRY_QUERY)
            .fetch_one(&self.pool)
            .await
            .map_err(CollectionError::from_sqlx)?;
        Ok(row.into())
    }

    async fn terminate_idle(
        &self,
        older_than_seconds: i64,
    ) -> Result<Vec<ConnectionRecord>, ExecutionError> {
        let query = sqlx::query(TERMINATE_IDLE_QUERY).bind(older_than_seconds as f64);
        self.stream_terminations(query).await
    }

    async fn terminate_ranked(
        &self,
        limit: i64,
        include_active: bool,
    ) -> Result<Vec<ConnectionRecord>, ExecutionError> {
        let query = sqlx::query(TERMINATE_RANKED_QUERY)
            .bind(limit)
            .bind(include_active);
        self.stream_terminations(query).await
    }

    async fn terminate_long_queries(
        &self,
        min_duration_seconds: i64,
    ) -> Result<Vec<ConnectionRecord>, ExecutionError> {
        let query = sqlx::query(TERMINATE_LONG_QUERIES_QUERY).bind(min_duration_seconds as f64);
        self.stream_terminations(query).await
    }
}

fn parse_session_row(row: &PgRow) -> Result<ConnectionRecord, String> {
    let process_id: i32 = row.try_get("pid").map_err(|e| e.to_string())?;
    let state_raw: String = row.try_get("state").map_err(|e| e.to_string())?;
    let duration_seconds: i64 = row.try_get("duration_seconds").map_err(|e| e.to_string())?;
    let backend_type: String = row.try_get("backend_type").map_err(|e| e.to_string())?;

    // false means the session was already gone; idempotent, still a success
    let already_gone: bool = !row.try_get::<bool, _>("terminated").unwrap_or(true);
    if already_gone {
        tracing::debug!(pid = process_id, "session already gone before termination");
    }

    let state = SessionState::from_catalog(&state_raw)
        .ok_or_else(|| format!("unrecognized session state '{state_raw}' for pid {process_id}"))?;

    Ok(ConnectionRecord {
        process_id,
        state,
        duration_seconds,
        backend_type,
    })
}

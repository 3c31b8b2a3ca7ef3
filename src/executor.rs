//! # Intervention Executor
//!
//! Executes the destructive tiers of the graduated response against the
//! session store, bounded by a per-operation timeout. Every operation
//! reports an [`InterventionResult`] whose termination count feeds the
//! circuit breaker and the observability sink even when the operation
//! failed partway.

use crate::database::sessions::SessionControl;
use crate::decision::ShedMode;
use crate::error::ExecutionError;
use crate::telemetry::{ConnectionRecord, SessionState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of one executed intervention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionResult {
    pub connections_terminated: u64,
    pub execution_time_ms: u64,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    /// Per-session detail for the emitted event.
    pub terminated: Vec<ConnectionRecord>,
}

impl InterventionResult {
    fn completed(terminated: Vec<ConnectionRecord>, elapsed: Duration) -> Self {
        Self {
            connections_terminated: terminated.len() as u64,
            execution_time_ms: elapsed.as_millis() as u64,
            succeeded: true,
            error_reason: None,
            terminated,
        }
    }

    /// A failed execution still reports how many terminations landed
    /// before the failure.
    pub fn from_error(error: &ExecutionError, elapsed: Duration) -> Self {
        Self {
            connections_terminated: error.terminated_so_far(),
            execution_time_ms: elapsed.as_millis() as u64,
            succeeded: false,
            error_reason: Some(error.to_string()),
            terminated: Vec::new(),
        }
    }
}

pub struct InterventionExecutor {
    sessions: Arc<dyn SessionControl>,
    timeout: Duration,
}

impl InterventionExecutor {
    pub fn new(sessions: Arc<dyn SessionControl>, timeout: Duration) -> Self {
        Self { sessions, timeout }
    }

    /// Optimize tier: clean up idle sessions older than the threshold.
    /// Unbounded on purpose; only idle sessions are eligible.
    pub async fn optimize(
        &self,
        idle_threshold_seconds: i64,
    ) -> Result<InterventionResult, ExecutionError> {
        let started = Instant::now();
        let terminated = self
            .bounded(self.sessions.terminate_idle(idle_threshold_seconds))
            .await?;
        tracing::info!(
            count = terminated.len(),
            idle_threshold_seconds,
            "🧹 idle connection cleanup complete"
        );
        Ok(InterventionResult::completed(terminated, started.elapsed()))
    }

    /// Shed-load tier: terminate up to `limit` sessions, safest first.
    pub async fn shed_load(
        &self,
        mode: ShedMode,
        limit: i64,
    ) -> Result<InterventionResult, ExecutionError> {
        let started = Instant::now();
        let terminated = self
            .bounded(self.sessions.terminate_ranked(limit, mode.includes_active()))
            .await?;
        tracing::warn!(
            count = terminated.len(),
            mode = ?mode,
            limit,
            "⚡ load shedding complete"
        );
        Ok(InterventionResult::completed(terminated, started.elapsed()))
    }

    /// Terminate active sessions whose statement outran the critical
    /// duration threshold.
    pub async fn terminate_long_queries(
        &self,
        threshold_seconds: i64,
    ) -> Result<InterventionResult, ExecutionError> {
        let started = Instant::now();
        let terminated = self
            .bounded(self.sessions.terminate_long_queries(threshold_seconds))
            .await?;
        tracing::warn!(
            count = terminated.len(),
            threshold_seconds,
            "⏱️ long-running query termination complete"
        );
        Ok(InterventionResult::completed(terminated, started.elapsed()))
    }

    async fn bounded<F>(&self, operation: F) -> Result<Vec<ConnectionRecord>, ExecutionError>
    where
        F: std::future::Future<Output = Result<Vec<ConnectionRecord>, ExecutionError>>,
    {
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::Timeout(self.timeout)),
        }
    }
}

/// Ranking contract of the shed-load statement, expressed over in-memory
/// records: candidates ordered by termination priority (idle first), then
/// by longest duration, truncated to `limit`. Active sessions are only
/// candidates when `include_active` is set. The in-memory mock used by the
/// loop tests routes through this same function, so the tests and the SQL
/// agree on one ordering.
pub fn termination_order(
    records: &[ConnectionRecord],
    limit: usize,
    include_active: bool,
) -> Vec<ConnectionRecord> {
    let mut candidates: Vec<ConnectionRecord> = records
        .iter()
        .filter(|r| include_active || r.state != SessionState::Active)
        .cloned()
        .collect();
    candidates.sort_by(|a, b| {
        a.state
            .termination_priority()
            .cmp(&b.state.termination_priority())
            .then(b.duration_seconds.cmp(&a.duration_seconds))
    });
    candidates.truncate(limit);
    candidates
}

/// Eligibility contract of the optimize statement: idle sessions strictly
/// older than the threshold, longest first.
pub fn idle_eligible(records: &[ConnectionRecord], older_than_seconds: i64) -> Vec<ConnectionRecord> {
    let mut eligible: Vec<ConnectionRecord> = records
        .iter()
        .filter(|r| r.state == SessionState::Idle && r.duration_seconds > older_than_seconds)
        .cloned()
        .collect();
    eligible.sort_by(|a, b| b.duration_seconds.cmp(&a.duration_seconds));
    eligible
}

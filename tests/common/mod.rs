//! Scripted in-memory session store for loop-level scenario tests.
//!
//! Snapshots are replayed in order; termination routes through the same
//! ranking contracts the SQL implements (`termination_order`,
//! `idle_eligible`), so the tests and the production queries agree on one
//! ordering.

use async_trait::async_trait;
use chrono::Utc;
use pg_governor::error::{CollectionError, ExecutionError};
use pg_governor::executor::{idle_eligible, termination_order};
use pg_governor::telemetry::{ConnectionRecord, SaturationSnapshot, SessionState};
use pg_governor::SessionControl;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// One scripted telemetry outcome.
pub enum Sample {
    Ratio(f64),
    RatioWithMaxDuration(f64, i64),
    Unreachable,
}

struct MockState {
    script: VecDeque<Sample>,
    sessions: Vec<ConnectionRecord>,
    /// Catalog rows whose sessions vanish before termination; terminated
    /// idempotently, never an error.
    ghost_pids: Vec<i32>,
    terminated: Vec<ConnectionRecord>,
    terminate_calls: u32,
}

pub struct MockSessionControl {
    state: Mutex<MockState>,
}

impl MockSessionControl {
    pub fn new(script: Vec<Sample>, sessions: Vec<ConnectionRecord>) -> Self {
        Self {
            state: Mutex::new(MockState {
                script: script.into(),
                sessions,
                ghost_pids: Vec::new(),
                terminated: Vec::new(),
                terminate_calls: 0,
            }),
        }
    }

    pub fn with_ghosts(self, pids: Vec<i32>) -> Self {
        self.state.lock().unwrap().ghost_pids = pids;
        self
    }

    pub fn terminate_calls(&self) -> u32 {
        self.state.lock().unwrap().terminate_calls
    }

    pub fn terminated(&self) -> Vec<ConnectionRecord> {
        self.state.lock().unwrap().terminated.clone()
    }

    pub fn remaining_sessions(&self) -> Vec<ConnectionRecord> {
        self.state.lock().unwrap().sessions.clone()
    }

    /// Ghost sessions vanish between the snapshot and the terminate
    /// statement; the statement simply no longer sees them, and the
    /// operation still succeeds (the terminate primitive is idempotent).
    fn purge_ghosts(state: &mut MockState) {
        let ghosts = std::mem::take(&mut state.ghost_pids);
        state.sessions.retain(|s| !ghosts.contains(&s.process_id));
    }

    fn apply_termination(
        state: &mut MockState,
        selected: Vec<ConnectionRecord>,
    ) -> Vec<ConnectionRecord> {
        state.terminate_calls += 1;
        for record in &selected {
            state.sessions.retain(|s| s.process_id != record.process_id);
        }
        state.terminated.extend(selected.clone());
        selected
    }
}

#[async_trait]
impl SessionControl for MockSessionControl {
    async fn sample(&self) -> Result<SaturationSnapshot, CollectionError> {
        let mut state = self.state.lock().unwrap();
        let (ratio, max_duration) = match state.script.pop_front() {
            Some(Sample::Ratio(ratio)) => (ratio, 0),
            Some(Sample::RatioWithMaxDuration(ratio, max)) => (ratio, max),
            Some(Sample::Unreachable) | None => {
                return Err(CollectionError::Unreachable(
                    "scripted collection failure".to_string(),
                ))
            }
        };

        let count = |wanted: SessionState| {
            state
                .sessions
                .iter()
                .filter(|s| s.state == wanted)
                .count() as i64
        };
        Ok(SaturationSnapshot {
            conn_usage_ratio: ratio,
            max_query_duration_seconds: max_duration,
            active_count: count(SessionState::Active),
            idle_count: count(SessionState::Idle),
            idle_in_transaction_count: count(SessionState::IdleInTransaction),
            observed_at: Utc::now(),
        })
    }

    async fn terminate_idle(
        &self,
        older_than_seconds: i64,
    ) -> Result<Vec<ConnectionRecord>, ExecutionError> {
        let mut state = self.state.lock().unwrap();
        Self::purge_ghosts(&mut state);
        let selected = idle_eligible(&state.sessions, older_than_seconds);
        Ok(Self::apply_termination(&mut state, selected))
    }

    async fn terminate_ranked(
        &self,
        limit: i64,
        include_active: bool,
    ) -> Result<Vec<ConnectionRecord>, ExecutionError> {
        let mut state = self.state.lock().unwrap();
        Self::purge_ghosts(&mut state);
        let selected = termination_order(&state.sessions, limit as usize, include_active);
        Ok(Self::apply_termination(&mut state, selected))
    }

    async fn terminate_long_queries(
        &self,
        min_duration_seconds: i64,
    ) -> Result<Vec<ConnectionRecord>, ExecutionError> {
        let mut state = self.state.lock().unwrap();
        Self::purge_ghosts(&mut state);
        let selected: Vec<ConnectionRecord> = state
            .sessions
            .iter()
            .filter(|s| s.state == SessionState::Active && s.duration_seconds > min_duration_seconds)
            .cloned()
            .collect();
        Ok(Self::apply_termination(&mut state, selected))
    }
}

/// A store that times out on every operation, for timeout-path tests.
pub struct StalledSessionControl {
    pub delay: Duration,
}

#[async_trait]
impl SessionControl for StalledSessionControl {
    async fn sample(&self) -> Result<SaturationSnapshot, CollectionError> {
        tokio::time::sleep(self.delay).await;
        Err(CollectionError::Unreachable("never reached".to_string()))
    }

    async fn terminate_idle(&self, _: i64) -> Result<Vec<ConnectionRecord>, ExecutionError> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }

    async fn terminate_ranked(
        &self,
        _: i64,
        _: bool,
    ) -> Result<Vec<ConnectionRecord>, ExecutionError> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }

    async fn terminate_long_queries(
        &self,
        _: i64,
    ) -> Result<Vec<ConnectionRecord>, ExecutionError> {
        tokio::time::sleep(self.delay).await;
        Ok(Vec::new())
    }
}

pub fn session(pid: i32, state: SessionState, duration_seconds: i64) -> ConnectionRecord {
    ConnectionRecord {
        process_id: pid,
        state,
        duration_seconds,
        backend_type: "client backend".to_string(),
    }
}

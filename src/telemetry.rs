//! # Telemetry Collection
//!
//! Samples live session state into a [`SaturationSnapshot`]. The entire
//! classification (state counts, max statement duration, usage ratio) comes
//! from one catalog read, so every field reflects a single consistent
//! instant. Snapshots are immutable and never merged across ticks.

use crate::database::sessions::SessionControl;
use crate::error::CollectionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Session state as reported by the catalog, restricted to the states the
/// governor acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    IdleInTransaction,
    Active,
}

impl SessionState {
    /// Termination priority: lower values are terminated first.
    pub fn termination_priority(self) -> u8 {
        match self {
            SessionState::Idle => 1,
            SessionState::IdleInTransaction => 2,
            SessionState::Active => 3,
        }
    }

    /// Parse the catalog's `state` column.
    pub fn from_catalog(state: &str) -> Option<Self> {
        match state {
            "idle" => Some(SessionState::Idle),
            "idle in transaction" | "idle in transaction (aborted)" => {
                Some(SessionState::IdleInTransaction)
            }
            "active" => Some(SessionState::Active),
            _ => None,
        }
    }
}

/// One live client-facing session. Internal/system backends are excluded at
/// the query level, never by post-filtering, so infrastructure sessions can
/// never appear in a termination candidate set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub process_id: i32,
    pub state: SessionState,
    pub duration_seconds: i64,
    pub backend_type: String,
}

/// Point-in-time saturation view produced fresh each tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaturationSnapshot {
    /// Active session count over the configured connection ceiling, 0–1.
    pub conn_usage_ratio: f64,
    pub max_query_duration_seconds: i64,
    pub active_count: i64,
    pub idle_count: i64,
    pub idle_in_transaction_count: i64,
    pub observed_at: DateTime<Utc>,
}

impl SaturationSnapshot {
    pub fn total_sessions(&self) -> i64 {
        self.active_count + self.idle_count + self.idle_in_transaction_count
    }
}

/// Bounded-timeout wrapper over the session store's atomic catalog read.
pub struct TelemetryCollector {
    sessions: Arc<dyn SessionControl>,
    timeout: Duration,
}

impl TelemetryCollector {
    pub fn new(sessions: Arc<dyn SessionControl>, timeout: Duration) -> Self {
        Self { sessions, timeout }
    }

    /// Produce one snapshot or fail with a `CollectionError`. A timeout is a
    /// collection failure for this tick, never a hang into the next one.
    pub async fn collect(&self) -> Result<SaturationSnapshot, CollectionError> {
        match tokio::time::timeout(self.timeout, self.sessions.sample()).await {
            Ok(result) => result,
            Err(_) => Err(CollectionError::Timeout(self.timeout)),
        }
    }
}

//! # Event System
//!
//! Structured events describing each meaningful tick outcome. The governor
//! emits; alerting, paging, and dashboard wiring subscribe through the
//! [`publisher::EventPublisher`] and are otherwise external collaborators.

pub mod publisher;

pub use publisher::EventPublisher;

use crate::decision::ShedMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event severity as seen by an operator watching the stream.
///
/// `Page` is reserved for the circuit breaker engaging and the memory
/// ceiling: the conditions where the autonomous layer has given up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Page,
}

/// One structured event per meaningful tick outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorEvent {
    pub event: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ShedMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connections_terminated: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_capacity_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl GovernorEvent {
    pub fn new(event: &str, severity: Severity) -> Self {
        Self {
            event: event.to_string(),
            severity,
            mode: None,
            connections_terminated: None,
            execution_time_ms: None,
            remaining_capacity_ratio: None,
            detail: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_mode(mut self, mode: ShedMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_terminations(mut self, count: u64, execution_time_ms: u64) -> Self {
        self.connections_terminated = Some(count);
        self.execution_time_ms = Some(execution_time_ms);
        self
    }

    pub fn with_remaining_capacity(mut self, conn_usage_ratio: f64) -> Self {
        self.remaining_capacity_ratio = Some(1.0 - conn_usage_ratio);
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

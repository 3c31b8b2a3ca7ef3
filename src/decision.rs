//! # Decision Engine
//!
//! Pure, stateless mapping from a fresh [`SaturationSnapshot`] to a
//! graduated [`Action`]. Evaluated top-down with a strict single winner per
//! tick; only the optimize and shed-load tiers ever take destructive action,
//! so a transient spike above the warn line that self-resolves within one
//! poll interval never costs a connection.

use crate::config::GovernorConfig;
use crate::telemetry::SaturationSnapshot;
use serde::{Deserialize, Serialize};

/// Load-shedding aggressiveness. Only `Critical` may reach active sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ShedMode {
    Intervention,
    Critical,
}

impl ShedMode {
    pub fn includes_active(self) -> bool {
        matches!(self, ShedMode::Critical)
    }
}

/// Corrective action for one tick, produced fresh and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Action {
    None,
    Warn,
    Optimize { idle_threshold_seconds: i64 },
    ShedLoad { mode: ShedMode, limit: i64 },
}

impl Action {
    /// Whether executing this action terminates sessions.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Action::Optimize { .. } | Action::ShedLoad { .. })
    }
}

/// Saturation tiers, strictly greater-than comparisons top-down.
pub fn evaluate(snapshot: &SaturationSnapshot, config: &GovernorConfig) -> Action {
    let ratio = snapshot.conn_usage_ratio;
    if ratio > config.critical_ratio {
        Action::ShedLoad {
            mode: ShedMode::Critical,
            limit: config.max_terminations_per_tick,
        }
    } else if ratio > config.optimize_ratio {
        Action::Optimize {
            idle_threshold_seconds: config.idle_termination_age_seconds,
        }
    } else if ratio > config.warn_ratio {
        Action::Warn
    } else {
        Action::None
    }
}

/// Slow-query response for the same snapshot, independent of the saturation
/// tiers: log above the warn duration, terminate above the critical one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryAction {
    None,
    Warn { max_duration_seconds: i64 },
    TerminateLong { threshold_seconds: i64 },
}

pub fn evaluate_queries(snapshot: &SaturationSnapshot, config: &GovernorConfig) -> QueryAction {
    let max = snapshot.max_query_duration_seconds;
    if max > config.query_critical_duration_seconds {
        QueryAction::TerminateLong {
            threshold_seconds: config.query_critical_duration_seconds,
        }
    } else if max > config.query_warn_duration_seconds {
        QueryAction::Warn {
            max_duration_seconds: max,
        }
    } else {
        QueryAction::None
    }
}

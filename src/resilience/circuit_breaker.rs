//! # Circuit Breaker Implementation
//!
//! Two-state breaker over the governor's own interventions: `Closed`
//! (autonomous action enabled) and `Open` (action suspended, escalation
//! emitted). Counters are owned exclusively by the single monitoring loop,
//! so state is plain fields rather than shared-memory primitives.
//!
//! Counting rule: `consecutive_failures` increments when an intervention
//! executes or errors. The next tick's ratio judges it — a drop of at least
//! the improvement epsilon resets the counter, and any tick at or below the
//! warn ratio resets it unconditionally (fast-path recovery). Three
//! consecutive ineffective interventions therefore trip the breaker on the
//! third tick, while a slowly recovering ratio never trips it.

use crate::config::GovernorConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation: interventions execute.
    Closed,
    /// Interventions suppressed; only warnings and escalations are emitted.
    Open,
}

/// State change produced by a breaker update, for event emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    None,
    /// Closed → Open. The one condition that should page a human.
    Opened,
    /// Open → Closed after the stability window.
    Closed,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    warn_ratio: f64,
    improvement_epsilon: f64,
    failure_trip_count: u32,
    stable_ticks_to_close: u32,

    consecutive_failures: u32,
    tripped: bool,
    tripped_at: Option<DateTime<Utc>>,
    last_stable_at: DateTime<Utc>,
    stable_ticks_while_open: u32,
    /// Ratio recorded when the last intervention executed, awaiting
    /// judgement by the next tick's snapshot.
    pending_intervention_ratio: Option<f64>,
}

impl CircuitBreaker {
    pub fn new(config: &GovernorConfig, now: DateTime<Utc>) -> Self {
        Self {
            warn_ratio: config.warn_ratio,
            improvement_epsilon: config.improvement_epsilon,
            failure_trip_count: config.failure_trip_count,
            stable_ticks_to_close: config.stable_ticks_to_close(),
            consecutive_failures: 0,
            tripped: false,
            tripped_at: None,
            last_stable_at: now,
            stable_ticks_while_open: 0,
            pending_intervention_ratio: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        if self.tripped {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.tripped
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn tripped_at(&self) -> Option<DateTime<Utc>> {
        self.tripped_at
    }

    pub fn last_stable_at(&self) -> DateTime<Utc> {
        self.last_stable_at
    }

    /// Start-of-tick assessment with the fresh ratio. Handles fast-path
    /// recovery while closed and the stability-window re-close while open.
    pub fn observe(&mut self, ratio: f64, now: DateTime<Utc>) -> BreakerTransition {
        if self.tripped {
            if ratio <= self.warn_ratio {
                self.stable_ticks_while_open += 1;
                self.last_stable_at = now;
                if self.stable_ticks_while_open >= self.stable_ticks_to_close {
                    self.reset(now);
                    info!(
                        stable_ticks = self.stable_ticks_to_close,
                        "🟢 circuit breaker closed after sustained stability"
                    );
                    return BreakerTransition::Closed;
                }
            } else {
                // Stability must be continuous; any hot tick restarts it.
                self.stable_ticks_while_open = 0;
            }
            return BreakerTransition::None;
        }

        if ratio <= self.warn_ratio {
            self.consecutive_failures = 0;
            self.pending_intervention_ratio = None;
            self.last_stable_at = now;
        } else if let Some(at_intervention) = self.pending_intervention_ratio.take() {
            if ratio <= at_intervention - self.improvement_epsilon {
                self.consecutive_failures = 0;
            }
        }
        BreakerTransition::None
    }

    /// Record an executed (or outright failed) intervention at the given
    /// saturation ratio. Returns `Opened` when this attempt trips the
    /// breaker.
    pub fn record_intervention(
        &mut self,
        ratio: f64,
        succeeded: bool,
        now: DateTime<Utc>,
    ) -> BreakerTransition {
        if self.tripped {
            warn!("intervention recorded while circuit is open");
            return BreakerTransition::None;
        }

        self.consecutive_failures += 1;
        self.pending_intervention_ratio = if succeeded { Some(ratio) } else { None };

        if self.consecutive_failures >= self.failure_trip_count {
            self.tripped = true;
            self.tripped_at = Some(now);
            self.stable_ticks_while_open = 0;
            self.pending_intervention_ratio = None;
            error!(
                consecutive_failures = self.consecutive_failures,
                trip_count = self.failure_trip_count,
                "🔴 circuit breaker opened: autonomous intervention suspended"
            );
            return BreakerTransition::Opened;
        }
        BreakerTransition::None
    }

    fn reset(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.tripped = false;
        self.tripped_at = None;
        self.stable_ticks_while_open = 0;
        self.pending_intervention_ratio = None;
        self.last_stable_at = now;
    }
}

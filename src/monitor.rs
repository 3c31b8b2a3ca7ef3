//! # Monitoring Loop
//!
//! Top-level scheduler: one Collector → Decision → Executor → Breaker pass
//! per tick, strictly linear, with at most one tick in flight. The next
//! tick is scheduled relative to completion rather than wall-clock slots,
//! so a slow tick can never race a second intervention onto the same
//! session set. All cross-tick state (breaker counters, collection-failure
//! streak) is owned exclusively by this loop.

use crate::config::GovernorConfig;
use crate::constants::events;
use crate::database::sessions::SessionControl;
use crate::decision::{self, Action, QueryAction, ShedMode};
use crate::error::{ExecutionError, GovernorError, Result};
use crate::events::{EventPublisher, GovernorEvent, Severity};
use crate::executor::{InterventionExecutor, InterventionResult};
use crate::resilience::{BreakerTransition, CircuitBreaker};
use crate::supervisor::{FailureStreak, MemoryWatchdog};
use crate::telemetry::{SaturationSnapshot, TelemetryCollector};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What one tick did, primarily for tests and diagnostics; the event stream
/// is the operator-facing record.
#[derive(Debug)]
pub enum TickOutcome {
    /// Collection failed; fail closed, nothing touched.
    Skipped { reason: String },
    /// Ratio at or below the warn line.
    Stable,
    /// Warn tier: informational only.
    Warned,
    /// Destructive tier wanted, but the breaker is open.
    Suppressed,
    /// An intervention ran to completion.
    Intervened {
        action: Action,
        result: InterventionResult,
    },
    /// An intervention failed; counted toward the breaker.
    InterventionFailed { action: Action, error: ExecutionError },
}

pub struct MonitoringLoop {
    config: GovernorConfig,
    collector: TelemetryCollector,
    executor: InterventionExecutor,
    breaker: CircuitBreaker,
    streak: FailureStreak,
    watchdog: MemoryWatchdog,
    publisher: EventPublisher,
}

impl MonitoringLoop {
    pub fn new(
        config: GovernorConfig,
        sessions: Arc<dyn SessionControl>,
        publisher: EventPublisher,
    ) -> Self {
        let collector = TelemetryCollector::new(Arc::clone(&sessions), config.db_timeout());
        let executor = InterventionExecutor::new(sessions, config.db_timeout());
        let breaker = CircuitBreaker::new(&config, Utc::now());
        let streak = FailureStreak::new(config.collection_failure_streak);
        let watchdog = MemoryWatchdog::new(config.memory_ceiling_bytes);
        Self {
            config,
            collector,
            executor,
            breaker,
            streak,
            watchdog,
            publisher,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Drive ticks until the shutdown flag flips. The in-flight tick always
    /// finishes (bounded by its own database timeouts) before the loop
    /// stops; only `ResourceExceeded` propagates out.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            poll_interval_seconds = self.config.poll_interval_seconds,
            "▶️ monitoring loop started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.tick().await {
                Ok(outcome) => debug!(outcome = ?outcome, "tick complete"),
                Err(fatal @ GovernorError::ResourceExceeded { .. }) => {
                    return Err(fatal);
                }
                Err(other) => warn!(error = %other, "tick failed"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
                _ = shutdown.changed() => {}
            }
        }
        info!("⏹️ monitoring loop stopped");
        Ok(())
    }

    /// One full governor pass. Public so scenario tests can drive ticks
    /// deterministically.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        // Self-preservation first: never run degraded.
        if let Err(fatal) = self.watchdog.check() {
            if let GovernorError::ResourceExceeded {
                rss_bytes,
                ceiling_bytes,
            } = &fatal
            {
                self.publisher.publish(
                    GovernorEvent::new(events::MEMORY_CEILING_EXCEEDED, Severity::Page)
                        .with_detail(serde_json::json!({
                            "rss_bytes": rss_bytes,
                            "ceiling_bytes": ceiling_bytes,
                        })),
                );
            }
            return Err(fatal);
        }

        // Fail closed: a failed collection skips decision and execution.
        let snapshot = match self.collector.collect().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let reason = err.to_string();
                let escalate = self.streak.record();
                self.publisher.publish(
                    GovernorEvent::new(events::TELEMETRY_GATHERING_FAILED, Severity::Warning)
                        .with_detail(serde_json::json!({
                            "error": reason,
                            "streak": self.streak.count(),
                        })),
                );
                if escalate {
                    self.publisher.publish(
                        GovernorEvent::new(events::TELEMETRY_FAILURE_STREAK, Severity::Warning)
                            .with_detail(serde_json::json!({ "streak": self.streak.count() })),
                    );
                }
                return Ok(TickOutcome::Skipped { reason });
            }
        };
        self.streak.reset();

        let now = Utc::now();
        if self.breaker.observe(snapshot.conn_usage_ratio, now) == BreakerTransition::Closed {
            self.publisher.publish(
                GovernorEvent::new(events::CIRCUIT_BREAKER_RESET, Severity::Info)
                    .with_remaining_capacity(snapshot.conn_usage_ratio),
            );
        }

        let action = decision::evaluate(&snapshot, &self.config);
        let outcome = self.act(action, &snapshot).await;

        // Slow-query axis, independent of the saturation tiers but gated by
        // the same breaker and the same fail-closed rule.
        self.handle_slow_queries(&snapshot).await;

        Ok(outcome)
    }

    async fn act(&mut self, action: Action, snapshot: &SaturationSnapshot) -> TickOutcome {
        match action {
            Action::None => TickOutcome::Stable,
            Action::Warn => {
                self.publisher.publish(
                    GovernorEvent::new(events::CONNECTION_SATURATION_WARNING, Severity::Warning)
                        .with_remaining_capacity(snapshot.conn_usage_ratio)
                        .with_detail(serde_json::json!({
                            "active": snapshot.active_count,
                            "idle": snapshot.idle_count,
                            "idle_in_transaction": snapshot.idle_in_transaction_count,
                        })),
                );
                TickOutcome::Warned
            }
            Action::Optimize {
                idle_threshold_seconds,
            } => {
                if self.breaker.is_open() {
                    return self.suppress(snapshot);
                }
                let attempt = self.executor.optimize(idle_threshold_seconds).await;
                self.settle(
                    action,
                    attempt,
                    events::POOL_OPTIMIZED,
                    Severity::Info,
                    None,
                    snapshot,
                )
            }
            Action::ShedLoad { mode, limit } => {
                if self.breaker.is_open() {
                    return self.suppress(snapshot);
                }
                let attempt = self.executor.shed_load(mode, limit).await;
                self.settle(
                    action,
                    attempt,
                    events::LOAD_SHEDDING_EXECUTED,
                    Severity::Warning,
                    Some(mode),
                    snapshot,
                )
            }
        }
    }

    /// Record an intervention attempt with the breaker and emit its event,
    /// including the breaker-engaged escalation when this attempt trips it.
    fn settle(
        &mut self,
        action: Action,
        attempt: std::result::Result<InterventionResult, ExecutionError>,
        event_name: &str,
        severity: Severity,
        mode: Option<ShedMode>,
        snapshot: &SaturationSnapshot,
    ) -> TickOutcome {
        let now = Utc::now();
        match attempt {
            Ok(result) => {
                let transition =
                    self.breaker
                        .record_intervention(snapshot.conn_usage_ratio, true, now);
                let mut event = GovernorEvent::new(event_name, severity)
                    .with_terminations(result.connections_terminated, result.execution_time_ms)
                    .with_remaining_capacity(snapshot.conn_usage_ratio)
                    .with_detail(
                        serde_json::to_value(&result.terminated)
                            .unwrap_or(serde_json::Value::Null),
                    );
                if let Some(mode) = mode {
                    event = event.with_mode(mode);
                }
                self.publisher.publish(event);
                self.escalate_if_opened(transition, snapshot);
                TickOutcome::Intervened { action, result }
            }
            Err(error) => {
                let transition =
                    self.breaker
                        .record_intervention(snapshot.conn_usage_ratio, false, now);
                let result = InterventionResult::from_error(&error, std::time::Duration::ZERO);
                self.publisher.publish(
                    GovernorEvent::new(events::INTERVENTION_FAILED, Severity::Warning)
                        .with_terminations(result.connections_terminated, result.execution_time_ms)
                        .with_remaining_capacity(snapshot.conn_usage_ratio)
                        .with_detail(serde_json::json!({ "error": error.to_string() })),
                );
                self.escalate_if_opened(transition, snapshot);
                TickOutcome::InterventionFailed { action, error }
            }
        }
    }

    fn suppress(&mut self, snapshot: &SaturationSnapshot) -> TickOutcome {
        self.publisher.publish(
            GovernorEvent::new(events::INTERVENTION_SUPPRESSED, Severity::Warning)
                .with_remaining_capacity(snapshot.conn_usage_ratio)
                .with_detail(serde_json::json!({
                    "consecutive_failures": self.breaker.consecutive_failures(),
                })),
        );
        TickOutcome::Suppressed
    }

    fn escalate_if_opened(&self, transition: BreakerTransition, snapshot: &SaturationSnapshot) {
        if transition == BreakerTransition::Opened {
            self.publisher.publish(
                GovernorEvent::new(events::CIRCUIT_BREAKER_ENGAGED, Severity::Page)
                    .with_remaining_capacity(snapshot.conn_usage_ratio)
                    .with_detail(serde_json::json!({
                        "consecutive_failures": self.breaker.consecutive_failures(),
                    })),
            );
        }
    }

    async fn handle_slow_queries(&mut self, snapshot: &SaturationSnapshot) {
        match decision::evaluate_queries(snapshot, &self.config) {
            QueryAction::None => {}
            QueryAction::Warn {
                max_duration_seconds,
            } => {
                self.publisher.publish(
                    GovernorEvent::new(events::LONG_QUERY_WARNING, Severity::Info).with_detail(
                        serde_json::json!({ "max_duration_seconds": max_duration_seconds }),
                    ),
                );
            }
            QueryAction::TerminateLong { threshold_seconds } => {
                if self.breaker.is_open() {
                    debug!("long-query termination suppressed while breaker is open");
                    return;
                }
                match self.executor.terminate_long_queries(threshold_seconds).await {
                    Ok(result) => {
                        self.publisher.publish(
                            GovernorEvent::new(events::LONG_QUERIES_TERMINATED, Severity::Warning)
                                .with_terminations(
                                    result.connections_terminated,
                                    result.execution_time_ms,
                                )
                                .with_detail(
                                    serde_json::to_value(&result.terminated)
                                        .unwrap_or(serde_json::Value::Null),
                                ),
                        );
                    }
                    Err(error) => {
                        self.publisher.publish(
                            GovernorEvent::new(events::INTERVENTION_FAILED, Severity::Warning)
                                .with_detail(serde_json::json!({ "error": error.to_string() })),
                        );
                    }
                }
            }
        }
    }
}

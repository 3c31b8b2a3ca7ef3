#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # PG Governor
//!
//! An autonomous connection-saturation governor for PostgreSQL: a control
//! loop that samples live session state, classifies database health into
//! graduated severity tiers, and executes bounded, priority-ordered
//! corrective actions while protecting itself from becoming an additional
//! failure source.
//!
//! ## Architecture
//!
//! Control flow is strictly linear per tick:
//!
//! ```text
//! loop → collector → decision engine → (conditionally) executor
//!      → circuit breaker → observability sink
//! ```
//!
//! No component calls back into an earlier one within a tick; the circuit
//! breaker counters and the collection-failure streak are the only
//! cross-tick state, owned exclusively by the single loop task.
//!
//! ## Graduated response
//!
//! - above 0.70 usage: warn (informational only)
//! - above 0.85: terminate long-idle sessions (zero impact by construction)
//! - above 0.95: shed load, safest sessions first, bounded per tick
//!
//! Repeated ineffective interventions trip a circuit breaker that suspends
//! autonomous action and escalates to a human; a failed telemetry read
//! fails closed and touches nothing.
//!
//! ## Module Organization
//!
//! - [`telemetry`] - atomic session-catalog snapshots
//! - [`decision`] - pure threshold tiers
//! - [`executor`] - ranked termination operations
//! - [`resilience`] - the circuit breaker
//! - [`supervisor`] - memory ceiling and fail-closed accounting
//! - [`monitor`] - the tick scheduler tying it all together
//! - [`database`] - the SQL boundary (one read, three terminate statements)
//! - [`events`] - structured events for external alerting
//! - [`config`] / [`error`] / [`logging`] / [`constants`] - ambient plumbing

pub mod config;
pub mod constants;
pub mod database;
pub mod decision;
pub mod error;
pub mod events;
pub mod executor;
pub mod logging;
pub mod monitor;
pub mod resilience;
pub mod supervisor;
pub mod telemetry;

pub use config::GovernorConfig;
pub use database::{DatabaseConnection, PgSessionControl, SessionControl};
pub use decision::{Action, QueryAction, ShedMode};
pub use error::{CollectionError, ExecutionError, GovernorError, Result};
pub use events::{EventPublisher, GovernorEvent, Severity};
pub use executor::{InterventionExecutor, InterventionResult};
pub use monitor::{MonitoringLoop, TickOutcome};
pub use resilience::{CircuitBreaker, CircuitState};
pub use supervisor::{FailureStreak, MemoryWatchdog};
pub use telemetry::{ConnectionRecord, SaturationSnapshot, SessionState, TelemetryCollector};

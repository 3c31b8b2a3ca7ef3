//! # System Constants
//!
//! Event names emitted to the observability sink and process exit codes used
//! to signal lifecycle outcomes to the external supervisor.

/// Structured event names, one per meaningful tick outcome or lifecycle step.
pub mod events {
    // Lifecycle events
    pub const GOVERNOR_STARTING: &str = "governor_starting";
    pub const GOVERNOR_STARTED: &str = "governor_started";
    pub const GOVERNOR_STARTUP_FAILED: &str = "governor_startup_failed";
    pub const GOVERNOR_STOPPING: &str = "governor_stopping";
    pub const GOVERNOR_STOPPED: &str = "governor_stopped";
    pub const RESOURCE_LIMITS_SET: &str = "resource_limits_set";

    // Tick outcome events
    pub const CONNECTION_SATURATION_WARNING: &str = "connection_saturation_warning";
    pub const POOL_OPTIMIZED: &str = "pool_optimized";
    pub const LOAD_SHEDDING_EXECUTED: &str = "load_shedding_executed";
    pub const LONG_QUERY_WARNING: &str = "long_query_warning";
    pub const LONG_QUERIES_TERMINATED: &str = "long_queries_terminated";
    pub const INTERVENTION_FAILED: &str = "intervention_failed";
    pub const INTERVENTION_SUPPRESSED: &str = "intervention_suppressed";
    pub const TELEMETRY_GATHERING_FAILED: &str = "telemetry_gathering_failed";
    pub const TELEMETRY_FAILURE_STREAK: &str = "telemetry_failure_streak";

    // Circuit breaker transitions; ENGAGED is the only event that should page
    pub const CIRCUIT_BREAKER_ENGAGED: &str = "circuit_breaker_engaged";
    pub const CIRCUIT_BREAKER_RESET: &str = "circuit_breaker_reset";

    // Self-preservation
    pub const MEMORY_CEILING_EXCEEDED: &str = "memory_ceiling_exceeded";
}

/// Process exit codes, distinguished so the external supervisor can tell
/// "asked to stop" from "crashed, restart a clean instance".
pub mod exit_codes {
    /// Normal shutdown after a stop signal.
    pub const SUCCESS: i32 = 0;
    /// Startup failed before the monitoring loop began.
    pub const STARTUP_FAILURE: i32 = 1;
    /// Self-terminated on the hard memory ceiling.
    pub const MEMORY_CEILING: i32 = 9;
}

//! # Resilience Module
//!
//! The circuit breaker that guards against runaway corrective loops: if
//! repeated interventions fail to lower saturation, autonomous action is
//! suspended and a human is escalated to, while monitoring itself never
//! stops.

pub mod circuit_breaker;

pub use circuit_breaker::{BreakerTransition, CircuitBreaker, CircuitState};

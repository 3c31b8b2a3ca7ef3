//! # Error Taxonomy
//!
//! Failure domains for the governor, split the way they propagate:
//! collection errors are recovered locally (skip the tick), execution errors
//! feed the circuit breaker, and resource-ceiling violations are fatal by
//! design.

use std::time::Duration;

/// Failures while sampling the session catalog.
///
/// Any of these means the governor's view of the database is unreliable for
/// the current tick, so the tick is skipped entirely (fail closed).
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    #[error("database unreachable during telemetry read: {0}")]
    Unreachable(String),

    #[error("telemetry read timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed session catalog row: {0}")]
    Malformed(String),
}

/// Failures while executing a termination operation.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("database unreachable during intervention: {0}")]
    Unreachable(String),

    #[error("intervention timed out after {0:?}")]
    Timeout(Duration),

    /// The rank-and-terminate statement failed mid-stream. The count of
    /// terminations observed before the failure still feeds the circuit
    /// breaker and the emitted event.
    #[error("intervention partially failed after {terminated_so_far} terminations: {reason}")]
    PartialFailure { terminated_so_far: u64, reason: String },
}

/// Top-level governor error.
#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("configuration error: {0}")]
    Configuration(String),

    /// The governor's own footprint crossed the hard ceiling. Never
    /// recovered: the process exits with a distinct status so the external
    /// supervisor restarts a clean instance.
    #[error("resident memory {rss_bytes} exceeds ceiling {ceiling_bytes}")]
    ResourceExceeded { rss_bytes: u64, ceiling_bytes: u64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, GovernorError>;

impl ExecutionError {
    /// Terminations that completed before the failure, if any.
    pub fn terminated_so_far(&self) -> u64 {
        match self {
            ExecutionError::PartialFailure {
                terminated_so_far, ..
            } => *terminated_so_far,
            _ => 0,
        }
    }
}

impl CollectionError {
    /// Classify an sqlx error from the telemetry read.
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::TypeNotFound { .. } => {
                CollectionError::Malformed(err.to_string())
            }
            sqlx::Error::RowNotFound => {
                CollectionError::Malformed("telemetry query returned no row".to_string())
            }
            other => CollectionError::Unreachable(other.to_string()),
        }
    }
}

//! # Database Boundary
//!
//! The governor's entire database surface: a pooled connection wrapper, one
//! atomic telemetry read, and single-statement rank-and-terminate
//! operations. The governor never manages schema; it reads the dynamic
//! session catalog and invokes the terminate primitive, nothing else.
//!
//! ## Key Components
//!
//! - [`connection`] - SQLx pool construction and health checking
//! - [`sessions`] - the [`sessions::SessionControl`] seam and its
//!   PostgreSQL implementation

pub mod connection;
pub mod sessions;

pub use connection::DatabaseConnection;
pub use sessions::{PgSessionControl, SessionControl};

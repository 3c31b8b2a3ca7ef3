//! # Self-Preservation Supervisor
//!
//! Two unconditional guarantees about the governor itself:
//!
//! 1. **Fail closed**: when telemetry collection fails, no decision is made
//!    and no session is touched for that tick. The [`FailureStreak`] tracks
//!    consecutive collection failures separately from intervention failures
//!    and flags when the streak warrants escalation.
//! 2. **Hard resource ceiling**: an `RLIMIT_AS` cap installed at startup
//!    plus a per-tick RSS check. Crossing the ceiling is fatal on purpose;
//!    the external process supervisor restarts a clean instance, and a
//!    malfunctioning governor never competes with the database for memory.

use crate::error::GovernorError;
use std::io;

/// Consecutive telemetry-collection failures. Owned by the monitoring loop;
/// reset on the first successful collection.
#[derive(Debug)]
pub struct FailureStreak {
    count: u32,
    threshold: u32,
}

impl FailureStreak {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold,
        }
    }

    /// Record one failure; true exactly when the streak reaches the
    /// escalation threshold.
    pub fn record(&mut self) -> bool {
        self.count += 1;
        self.count == self.threshold
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Hard memory ceiling for the governor process.
#[derive(Debug, Clone, Copy)]
pub struct MemoryWatchdog {
    ceiling_bytes: u64,
}

impl MemoryWatchdog {
    pub fn new(ceiling_bytes: u64) -> Self {
        Self { ceiling_bytes }
    }

    pub fn ceiling_bytes(&self) -> u64 {
        self.ceiling_bytes
    }

    /// Install the address-space rlimit (soft = ceiling, hard untouched).
    /// Failure here is logged and tolerated; the per-tick check still
    /// enforces the ceiling.
    pub fn install_rlimit(&self) -> io::Result<()> {
        let limit = libc::rlimit {
            rlim_cur: self.ceiling_bytes as libc::rlim_t,
            rlim_max: libc::RLIM_INFINITY,
        };
        // SAFETY: setrlimit only reads the provided struct.
        let rc = unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Per-tick check: fatal `ResourceExceeded` when resident memory is
    /// over the ceiling, otherwise the current RSS for logging. A platform
    /// where RSS cannot be read yields `Ok(None)` rather than a spurious
    /// crash.
    pub fn check(&self) -> Result<Option<u64>, GovernorError> {
        let Some(rss_bytes) = current_rss_bytes() else {
            return Ok(None);
        };
        if rss_bytes > self.ceiling_bytes {
            return Err(GovernorError::ResourceExceeded {
                rss_bytes,
                ceiling_bytes: self.ceiling_bytes,
            });
        }
        Ok(Some(rss_bytes))
    }
}

/// Resident set size of this process from `/proc/self/statm`.
fn current_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages = parse_statm_rss_pages(&statm)?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(pages * page_size as u64)
}

/// Second field of statm is resident pages.
fn parse_statm_rss_pages(statm: &str) -> Option<u64> {
    statm.split_whitespace().nth(1)?.parse().ok()
}

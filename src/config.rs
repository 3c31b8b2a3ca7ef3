//! # Governor Configuration
//!
//! Immutable process-start configuration. Values come from environment
//! variables layered over defaults; there is no runtime reconfiguration.
//! Each monitored target owns its own `GovernorConfig` instance, which is
//! what makes multi-target operation a construction-time concern rather than
//! a shared-state one.

use crate::error::{GovernorError, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GovernorConfig {
    pub database_url: String,

    /// Seconds between ticks, measured from tick completion.
    pub poll_interval_seconds: u64,

    /// Saturation thresholds; must be strictly ordered warn < optimize < critical.
    pub warn_ratio: f64,
    pub optimize_ratio: f64,
    pub critical_ratio: f64,

    /// Idle sessions older than this are eligible for the optimize tier.
    pub idle_termination_age_seconds: i64,
    /// Hard cap on load-shedding terminations per tick.
    pub max_terminations_per_tick: i64,

    /// Consecutive ineffective interventions before the breaker trips.
    pub failure_trip_count: u32,
    /// Continuous stable time required to close a tripped breaker.
    pub stability_window_seconds: u64,
    /// Minimum ratio drop between ticks that counts as improvement.
    pub improvement_epsilon: f64,

    /// Collection failures in a row before an escalation event is emitted.
    pub collection_failure_streak: u32,

    /// Slow-query thresholds (seconds of statement runtime).
    pub query_warn_duration_seconds: i64,
    pub query_critical_duration_seconds: i64,

    /// Hard address-space ceiling for the governor process itself.
    pub memory_ceiling_bytes: u64,

    /// Bound on every individual database operation.
    pub db_timeout_seconds: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/postgres".to_string(),
            poll_interval_seconds: 30,
            warn_ratio: 0.70,
            optimize_ratio: 0.85,
            critical_ratio: 0.95,
            idle_termination_age_seconds: 300,
            max_terminations_per_tick: 5,
            failure_trip_count: 3,
            stability_window_seconds: 300,
            improvement_epsilon: 0.01,
            collection_failure_streak: 3,
            query_warn_duration_seconds: 15,
            query_critical_duration_seconds: 25,
            memory_ceiling_bytes: 512 * 1024 * 1024,
            db_timeout_seconds: 10,
        }
    }
}

impl GovernorConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            config.database_url = db_url;
        }

        read_env("GOVERNOR_POLL_INTERVAL_SECS", &mut config.poll_interval_seconds)?;
        read_env("GOVERNOR_WARN_RATIO", &mut config.warn_ratio)?;
        read_env("GOVERNOR_OPTIMIZE_RATIO", &mut config.optimize_ratio)?;
        read_env("GOVERNOR_CRITICAL_RATIO", &mut config.critical_ratio)?;
        read_env("GOVERNOR_IDLE_AGE_SECS", &mut config.idle_termination_age_seconds)?;
        read_env("GOVERNOR_MAX_TERMINATIONS", &mut config.max_terminations_per_tick)?;
        read_env("GOVERNOR_FAILURE_TRIP_COUNT", &mut config.failure_trip_count)?;
        read_env("GOVERNOR_STABILITY_WINDOW_SECS", &mut config.stability_window_seconds)?;
        read_env("GOVERNOR_IMPROVEMENT_EPSILON", &mut config.improvement_epsilon)?;
        read_env(
            "GOVERNOR_COLLECTION_FAILURE_STREAK",
            &mut config.collection_failure_streak,
        )?;
        read_env("GOVERNOR_QUERY_WARN_SECS", &mut config.query_warn_duration_seconds)?;
        read_env(
            "GOVERNOR_QUERY_CRITICAL_SECS",
            &mut config.query_critical_duration_seconds,
        )?;
        read_env("GOVERNOR_MEMORY_CEILING_BYTES", &mut config.memory_ceiling_bytes)?;
        read_env("GOVERNOR_DB_TIMEOUT_SECS", &mut config.db_timeout_seconds)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let ordered = 0.0 < self.warn_ratio
            && self.warn_ratio < self.optimize_ratio
            && self.optimize_ratio < self.critical_ratio
            && self.critical_ratio < 1.0;
        if !ordered {
            return Err(GovernorError::Configuration(format!(
                "saturation thresholds must satisfy 0 < warn ({}) < optimize ({}) < critical ({}) < 1",
                self.warn_ratio, self.optimize_ratio, self.critical_ratio
            )));
        }
        if self.poll_interval_seconds == 0 {
            return Err(GovernorError::Configuration(
                "poll_interval_seconds must be nonzero".to_string(),
            ));
        }
        if self.max_terminations_per_tick <= 0 {
            return Err(GovernorError::Configuration(
                "max_terminations_per_tick must be positive".to_string(),
            ));
        }
        if self.failure_trip_count == 0 {
            return Err(GovernorError::Configuration(
                "failure_trip_count must be nonzero".to_string(),
            ));
        }
        if self.query_warn_duration_seconds > self.query_critical_duration_seconds {
            return Err(GovernorError::Configuration(
                "query warn duration must not exceed critical duration".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn db_timeout(&self) -> Duration {
        Duration::from_secs(self.db_timeout_seconds)
    }

    /// Stable ticks required to close a tripped breaker: the stability window
    /// expressed in whole poll intervals, never less than one tick.
    pub fn stable_ticks_to_close(&self) -> u32 {
        let ticks = self.stability_window_seconds / self.poll_interval_seconds;
        u32::try_from(ticks.max(1)).unwrap_or(u32::MAX)
    }
}

fn read_env<T: std::str::FromStr>(name: &str, target: &mut T) -> Result<()>
where
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = std::env::var(name) {
        *target = raw
            .parse()
            .map_err(|e| GovernorError::Configuration(format!("invalid {name}: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GovernorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval_seconds, 30);
        assert_eq!(config.max_terminations_per_tick, 5);
        assert_eq!(config.failure_trip_count, 3);
    }

    #[test]
    fn rejects_unordered_thresholds() {
        let config = GovernorConfig {
            warn_ratio: 0.9,
            optimize_ratio: 0.85,
            ..GovernorConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(GovernorError::Configuration(_))
        ));
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let config = GovernorConfig {
            poll_interval_seconds: 0,
            ..GovernorConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn stability_window_in_ticks() {
        let config = GovernorConfig::default();
        assert_eq!(config.stable_ticks_to_close(), 10);

        let coarse = GovernorConfig {
            poll_interval_seconds: 600,
            ..GovernorConfig::default()
        };
        assert_eq!(coarse.stable_ticks_to_close(), 1);
    }
}

//! Watch Policy
//!
//! Tick intervals of the two loops. These are fixed per deployment; the
//! agent builds the default policy and only tests shorten it.

use std::time::Duration;

/// Tick intervals for the health and discovery loops
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchPolicy {
    /// Resource health tick
    ///
    /// **Default:** 2 s
    pub health_interval: Duration,

    /// Controller discovery tick
    ///
    /// **Default:** 30 s
    pub discover_interval: Duration,
}

impl Default for WatchPolicy {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(2),
            discover_interval: Duration::from_secs(30),
        }
    }
}

impl WatchPolicy {
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.health_interval.is_zero() {
            return Err("health_interval must be greater than 0".to_string());
        }

        if self.discover_interval.is_zero() {
            return Err("discover_interval must be greater than 0".to_string());
        }

        Ok(())
    }
}

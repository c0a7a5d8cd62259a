//! Recovery configuration.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Recovery configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Run the full recovery protocol; when false every fault quiesces the device
    pub recovery_enabled: bool,
    /// Bound for the PBDMA vacate poll in milliseconds
    pub poll_timeout_ms: u64,
    /// First delay between polls in microseconds
    pub poll_delay_min_us: u64,
    /// Ceiling for the doubling delay between polls in microseconds
    pub poll_delay_max_us: u64,
    /// Accumulated ctxsw timeout before a stalled TSG is recovered
    pub ctxsw_timeout_limit_ms: u64,
    /// Time charged to a stalled TSG per ctxsw timeout interrupt
    pub ctxsw_timeout_period_ms: u64,
    /// Dump debug state when aborting contexts
    pub default_debug_dump: bool,
}

impl RecoveryConfig {
    /// Create a config with the default bounds
    #[must_use]
    pub fn new() -> Self {
        Self {
            recovery_enabled: true,
            poll_timeout_ms: 3000,
            poll_delay_min_us: 10,
            poll_delay_max_us: 200,
            ctxsw_timeout_limit_ms: 3000,
            ctxsw_timeout_period_ms: 100,
            default_debug_dump: true,
        }
    }

    /// Enable or disable the full protocol
    #[must_use]
    pub fn with_recovery_enabled(mut self, enabled: bool) -> Self {
        self.recovery_enabled = enabled;
        self
    }

    /// Set the PBDMA vacate poll bound
    #[must_use]
    pub fn with_poll_timeout(mut self, timeout_ms: u64) -> Self {
        self.poll_timeout_ms = timeout_ms;
        self
    }

    /// Set the poll backoff range
    #[must_use]
    pub fn with_poll_delay(mut self, min_us: u64, max_us: u64) -> Self {
        self.poll_delay_min_us = min_us;
        self.poll_delay_max_us = max_us;
        self
    }

    /// Set the ctxsw timeout budget and per-interrupt charge
    #[must_use]
    pub fn with_ctxsw_timeout(mut self, limit_ms: u64, period_ms: u64) -> Self {
        self.ctxsw_timeout_limit_ms = limit_ms;
        self.ctxsw_timeout_period_ms = period_ms;
        self
    }

    /// Set the default debug dump flag
    #[must_use]
    pub fn with_debug_dump(mut self, debug_dump: bool) -> Self {
        self.default_debug_dump = debug_dump;
        self
    }

    /// PBDMA vacate poll bound
    #[must_use]
    pub const fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Check that the bounds are usable
    ///
    /// # Errors
    ///
    /// Returns error if a bound is zero or the backoff range is inverted
    pub fn validate(&self) -> CoreResult<()> {
        if self.poll_timeout_ms == 0 {
            return Err(CoreError::Validation {
                field: "poll_timeout_ms".to_string(),
                reason: "poll must be bounded by a non-zero timeout".to_string(),
            });
        }
        if self.poll_delay_min_us == 0 || self.poll_delay_min_us > self.poll_delay_max_us {
            return Err(CoreError::Validation {
                field: "poll_delay_min_us".to_string(),
                reason: format!(
                    "backoff range {}..{}us is empty",
                    self.poll_delay_min_us, self.poll_delay_max_us
                ),
            });
        }
        if self.ctxsw_timeout_period_ms == 0 {
            return Err(CoreError::Validation {
                field: "ctxsw_timeout_period_ms".to_string(),
                reason: "period must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Parse and validate a config from JSON; missing fields take defaults
    ///
    /// # Errors
    ///
    /// Returns error if the JSON is malformed or the bounds are unusable
    pub fn from_json(json: &str) -> CoreResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self::new()
    }
}

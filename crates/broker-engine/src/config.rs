//! # config
//!
//! why: tune snapshotting and the leader's time based triggers
//! relations: owned by partition.rs, intervals read by trigger.rs
//! what: EngineConfig with defaults, builder and validation

use crate::error::EngineError;
use serde::{Deserialize, Serialize};

/// Engine configuration, all durations in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum time between two snapshots of the partition state.
    pub snapshot_period: u64,
    /// How often the leader looks for activated jobs past their deadline.
    pub job_timeout_check_interval: u64,
    /// How often the leader looks for due timers.
    pub timer_check_interval: u64,
    /// How often the leader looks for buffered messages past their time to live.
    pub message_ttl_check_interval: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_period: 60_000,
            job_timeout_check_interval: 1_000,
            timer_check_interval: 100,
            message_ttl_check_interval: 1_000,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), EngineError> {
        let intervals = [
            ("snapshot_period", self.snapshot_period),
            ("job_timeout_check_interval", self.job_timeout_check_interval),
            ("timer_check_interval", self.timer_check_interval),
            ("message_ttl_check_interval", self.message_ttl_check_interval),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(EngineError::Config(format!("{} must be > 0", name)));
            }
        }
        Ok(())
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn snapshot_period(mut self, ms: u64) -> Self {
        self.config.snapshot_period = ms;
        self
    }

    pub fn job_timeout_check_interval(mut self, ms: u64) -> Self {
        self.config.job_timeout_check_interval = ms;
        self
    }

    pub fn timer_check_interval(mut self, ms: u64) -> Self {
        self.config.timer_check_interval = ms;
        self
    }

    pub fn message_ttl_check_interval(mut self, ms: u64) -> Self {
        self.config.message_ttl_check_interval = ms;
        self
    }

    pub fn build(self) -> Result<EngineConfig, EngineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

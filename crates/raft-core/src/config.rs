//! # config
//!
//! why: one place for every raft timing and sizing knob
//! relations: owned by context.rs, read by every state and controller
//! what: RaftConfig with defaults, builder and validation

use crate::error::RaftError;
use serde::{Deserialize, Serialize};

/// Raft timing configuration, all durations in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaftConfig {
    /// Lower bound of the randomized election timeout.
    /// Also how long a follower trusts a silent leader before granting polls.
    pub election_timeout_min: u64,
    /// Upper bound of the randomized election timeout.
    pub election_timeout_max: u64,
    /// Interval between leader heartbeats when there is nothing to replicate.
    pub heartbeat_interval: u64,
    /// How long a controller waits for a response before resending.
    pub request_timeout: u64,
    /// Maximum entries shipped in one append request.
    pub max_append_entries: usize,
    /// Desired cluster size; a leader below it reports that it needs members.
    pub replication_factor: usize,
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
            request_timeout: 100,
            max_append_entries: 64,
            replication_factor: 3,
        }
    }
}

impl RaftConfig {
    pub fn builder() -> RaftConfigBuilder {
        RaftConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), RaftError> {
        if self.election_timeout_min == 0 {
            return Err(RaftError::Config(
                "election_timeout_min must be > 0".to_string(),
            ));
        }
        if self.election_timeout_max < self.election_timeout_min {
            return Err(RaftError::Config(format!(
                "election_timeout_max ({}) must not be below election_timeout_min ({})",
                self.election_timeout_max, self.election_timeout_min
            )));
        }
        // heartbeats must arrive well before followers give up on the leader
        if self.heartbeat_interval >= self.election_timeout_min {
            return Err(RaftError::Config(format!(
                "heartbeat_interval ({}) must be below election_timeout_min ({})",
                self.heartbeat_interval, self.election_timeout_min
            )));
        }
        if self.request_timeout == 0 {
            return Err(RaftError::Config("request_timeout must be > 0".to_string()));
        }
        if self.max_append_entries == 0 {
            return Err(RaftError::Config(
                "max_append_entries must be > 0".to_string(),
            ));
        }
        if self.replication_factor == 0 {
            return Err(RaftError::Config(
                "replication_factor must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for RaftConfig.
#[derive(Debug, Default)]
pub struct RaftConfigBuilder {
    config: RaftConfig,
}

impl RaftConfigBuilder {
    pub fn election_timeout(mut self, min: u64, max: u64) -> Self {
        self.config.election_timeout_min = min;
        self.config.election_timeout_max = max;
        self
    }

    pub fn heartbeat_interval(mut self, ms: u64) -> Self {
        self.config.heartbeat_interval = ms;
        self
    }

    pub fn request_timeout(mut self, ms: u64) -> Self {
        self.config.request_timeout = ms;
        self
    }

    pub fn max_append_entries(mut self, max: usize) -> Self {
        self.config.max_append_entries = max;
        self
    }

    pub fn replication_factor(mut self, factor: usize) -> Self {
        self.config.replication_factor = factor;
        self
    }

    /// Build and validate.
    pub fn build(self) -> Result<RaftConfig, RaftError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

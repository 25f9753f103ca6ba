//! # membership
//!
//! why: describe who takes part in a partition's replication group
//! relations: configurations travel in log entries (log.rs) and messages (message.rs)
//! what: Endpoint, Configuration

use serde::{Deserialize, Serialize};
use std::fmt;

/// Network identity of a cluster member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A cluster configuration as of a given log position.
///
/// Configurations are never mutated; a membership change produces a new one
/// with a higher position and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// log position of the entry that installed this configuration
    pub position: u64,
    /// incremented on every change
    pub version: u64,
    /// ordered member list, may include the local node
    pub members: Vec<Endpoint>,
}

impl Configuration {
    pub fn new(position: u64, version: u64, members: Vec<Endpoint>) -> Self {
        Self {
            position,
            version,
            members,
        }
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.members.iter().any(|m| m == endpoint)
    }

    /// the configuration that results from adding `endpoint` at `position`
    pub fn with_member(&self, position: u64, endpoint: &Endpoint) -> Self {
        let mut members = self.members.clone();
        if !members.contains(endpoint) {
            members.push(endpoint.clone());
        }
        Self::new(position, self.version + 1, members)
    }

    /// the configuration that results from removing `endpoint` at `position`
    pub fn without_member(&self, position: u64, endpoint: &Endpoint) -> Self {
        let members = self
            .members
            .iter()
            .filter(|m| *m != endpoint)
            .cloned()
            .collect();
        Self::new(position, self.version + 1, members)
    }
}

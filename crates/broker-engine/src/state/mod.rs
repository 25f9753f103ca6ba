//! # state
//!
//! why: everything a partition derives from its records, in one serializable value
//! relations: mutated only by processors through engine.rs, snapshotted by snapshot.rs
//! what: PartitionState and its column families

mod column;
mod incident;
mod job;
mod key;
mod message;
mod subscription;
mod timer;
mod workflow;

pub use column::Column;
pub use incident::IncidentState;
pub use job::{JobLifecycle, JobState};
pub use key::KeyGenerator;
pub use message::{MessageState, StoredMessage};
pub use subscription::{Subscription, SubscriptionLifecycle, SubscriptionState};
pub use timer::TimerState;
pub use workflow::{
    DeployedWorkflowEntry, ElementInstance, ElementInstanceState, ElementLifecycle, WorkflowState,
};

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// all entity state of one partition
///
/// a pure function of the records applied so far; no clocks, no node identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionState {
    pub keys: KeyGenerator,
    pub jobs: JobState,
    pub workflows: WorkflowState,
    pub elements: ElementInstanceState,
    pub incidents: IncidentState,
    pub timers: TimerState,
    pub messages: MessageState,
    pub subscriptions: SubscriptionState,
}

impl PartitionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// canonical encoding, equal on every replica that applied the same records
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

//! # broker-engine
//!
//! why: run workflows on top of raft: every committed record is applied to partition state and may write follow-up records
//! relations: drives raft-core's RaftNode per partition, persists through raft-storage
//! what: records and workflow model, partition state, processors, stream processor, triggers, snapshots, partition actor

pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod partition;
pub mod processor;
pub mod record;
pub mod snapshot;
pub mod state;
pub mod trigger;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use engine::StreamProcessor;
pub use error::{EngineError, Result};
pub use model::{Element, ElementKind, ElementType, SequenceFlow, Workflow, WorkflowBuilder};
pub use partition::{
    ClientCommand, ClientResponse, Partition, PartitionHandle, PartitionTask, ResponseReceiver,
};
pub use processor::{CommandControl, CommandProcessor, ProcessorRegistry, RecordProcessor, RecordWriter};
pub use record::{
    DeployedWorkflow, DeploymentRecord, ErrorType, IncidentRecord, Intent, JobBatchRecord,
    JobHeaders, JobRecord, MessageRecord, Payload, Record, RecordKind, RecordMetadata, RecordType,
    RecordValue, RejectionType, SubscriptionRecord, TimerRecord, WorkflowInstanceRecord,
};
pub use snapshot::{FileSnapshotStore, InMemorySnapshotStore, Snapshot, SnapshotStore};
pub use state::PartitionState;
pub use trigger::TimeTriggers;

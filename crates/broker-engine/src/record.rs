//! # record
//!
//! why: give every entry the engine reads or writes a typed, deterministic shape
//! relations: encoded into raft-core's EntryPayload::Record, dispatched by processor/mod.rs
//! what: RecordType, Intent, RecordKind, RejectionType, RecordMetadata, value records, Record

use crate::error::Result;
use crate::model::{ElementType, Workflow};
use serde::{Deserialize, Serialize};
use std::fmt;

/// variables carried by jobs, instances and messages; always a json object
pub type Payload = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordType {
    Job,
    JobBatch,
    Incident,
    Deployment,
    WorkflowInstance,
    Timer,
    Message,
    WorkflowInstanceSubscription,
}

/// what a record asks for (command) or reports (event)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Intent {
    Create,
    Created,
    Activate,
    Activated,
    Complete,
    Completed,
    Fail,
    Failed,
    TimeOut,
    TimedOut,
    UpdateRetries,
    RetriesUpdated,
    Cancel,
    Canceled,
    Resolve,
    Resolved,
    ElementReady,
    ElementActivated,
    ElementCompleting,
    ElementCompleted,
    ElementTerminating,
    ElementTerminated,
    EventTriggered,
    SequenceFlowTaken,
    UpdatePayload,
    PayloadUpdated,
    Trigger,
    Triggered,
    Publish,
    Published,
    Delete,
    Deleted,
    Open,
    Opened,
    Correlate,
    Correlated,
    Close,
    Closed,
}

impl Intent {
    pub fn is_command(self) -> bool {
        use Intent::*;
        matches!(
            self,
            Create
                | Activate
                | Complete
                | Fail
                | TimeOut
                | UpdateRetries
                | Cancel
                | Resolve
                | UpdatePayload
                | Trigger
                | Publish
                | Delete
                | Open
                | Correlate
                | Close
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    Command,
    Event,
    Rejection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionType {
    NotFound,
    InvalidState,
    AlreadyExists,
    InvalidArgument,
}

impl fmt::Display for RejectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RejectionType::NotFound => "NOT_FOUND",
            RejectionType::InvalidState => "INVALID_STATE",
            RejectionType::AlreadyExists => "ALREADY_EXISTS",
            RejectionType::InvalidArgument => "INVALID_ARGUMENT",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub record_type: RecordType,
    pub intent: Intent,
    pub rejection_type: Option<RejectionType>,
    pub rejection_reason: String,
    /// set on client commands, answered through the partition's responses
    pub request_id: Option<u64>,
}

impl RecordMetadata {
    pub fn kind(&self) -> RecordKind {
        if self.rejection_type.is_some() {
            RecordKind::Rejection
        } else if self.intent.is_command() {
            RecordKind::Command
        } else {
            RecordKind::Event
        }
    }
}

// -- values --

/// where a job belongs when it was created by a service task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHeaders {
    pub workflow_instance_key: u64,
    pub element_instance_key: u64,
    pub element_id: String,
    pub workflow_key: u64,
    pub process_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_type: String,
    pub worker: String,
    pub retries: u32,
    /// activation deadline, 0 while not activated
    pub deadline: u64,
    pub error_message: String,
    pub payload: Payload,
    pub headers: JobHeaders,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobBatchRecord {
    pub job_type: String,
    pub worker: String,
    pub timeout: i64,
    pub amount: i32,
    pub job_keys: Vec<u64>,
    pub jobs: Vec<JobRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorType {
    #[default]
    Unknown,
    JobNoRetries,
    ExtractValueError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub error_type: ErrorType,
    pub error_message: String,
    pub process_id: String,
    pub workflow_instance_key: u64,
    pub element_id: String,
    pub element_instance_key: u64,
    /// 0 for element incidents
    pub job_key: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedWorkflow {
    pub key: u64,
    pub process_id: String,
    pub version: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub workflows: Vec<Workflow>,
    /// filled in by the engine once the deployment is created
    pub deployed: Vec<DeployedWorkflow>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInstanceRecord {
    pub process_id: String,
    /// 0 selects the latest version on create
    pub version: u32,
    pub workflow_key: u64,
    pub workflow_instance_key: u64,
    pub element_id: String,
    /// key of the enclosing process element instance, 0 for the process itself
    pub flow_scope_key: u64,
    pub element_type: ElementType,
    pub payload: Payload,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerRecord {
    pub workflow_instance_key: u64,
    pub element_instance_key: u64,
    pub due_date: u64,
    pub handler_element_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub name: String,
    pub correlation_key: String,
    pub message_id: String,
    pub time_to_live: u64,
    pub payload: Payload,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub workflow_instance_key: u64,
    pub element_instance_key: u64,
    pub message_name: String,
    pub correlation_key: String,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordValue {
    Job(JobRecord),
    JobBatch(JobBatchRecord),
    Incident(IncidentRecord),
    Deployment(DeploymentRecord),
    WorkflowInstance(WorkflowInstanceRecord),
    Timer(TimerRecord),
    Message(MessageRecord),
    WorkflowInstanceSubscription(SubscriptionRecord),
}

impl RecordValue {
    pub fn record_type(&self) -> RecordType {
        match self {
            RecordValue::Job(_) => RecordType::Job,
            RecordValue::JobBatch(_) => RecordType::JobBatch,
            RecordValue::Incident(_) => RecordType::Incident,
            RecordValue::Deployment(_) => RecordType::Deployment,
            RecordValue::WorkflowInstance(_) => RecordType::WorkflowInstance,
            RecordValue::Timer(_) => RecordType::Timer,
            RecordValue::Message(_) => RecordType::Message,
            RecordValue::WorkflowInstanceSubscription(_) => RecordType::WorkflowInstanceSubscription,
        }
    }

    pub fn as_job(&self) -> Option<&JobRecord> {
        match self {
            RecordValue::Job(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_job_batch(&self) -> Option<&JobBatchRecord> {
        match self {
            RecordValue::JobBatch(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_incident(&self) -> Option<&IncidentRecord> {
        match self {
            RecordValue::Incident(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_deployment(&self) -> Option<&DeploymentRecord> {
        match self {
            RecordValue::Deployment(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_workflow_instance(&self) -> Option<&WorkflowInstanceRecord> {
        match self {
            RecordValue::WorkflowInstance(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_timer(&self) -> Option<&TimerRecord> {
        match self {
            RecordValue::Timer(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&MessageRecord> {
        match self {
            RecordValue::Message(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_subscription(&self) -> Option<&SubscriptionRecord> {
        match self {
            RecordValue::WorkflowInstanceSubscription(v) => Some(v),
            _ => None,
        }
    }
}

// -- record --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// log position, taken from the log entry and never encoded
    #[serde(skip)]
    pub position: u64,
    /// position of the record this one was written for, 0 for client and trigger commands
    pub source_position: u64,
    pub partition_id: u32,
    pub key: u64,
    pub timestamp: u64,
    pub metadata: RecordMetadata,
    pub value: RecordValue,
}

impl Record {
    /// a command as submitted by a client or a trigger
    pub fn command(key: u64, intent: Intent, value: RecordValue) -> Self {
        Self::new(key, intent, value)
    }

    /// an event; mostly useful to seed state in tests
    pub fn event(key: u64, intent: Intent, value: RecordValue) -> Self {
        Self::new(key, intent, value)
    }

    pub(crate) fn new(key: u64, intent: Intent, value: RecordValue) -> Self {
        Self {
            position: 0,
            source_position: 0,
            partition_id: 0,
            key,
            timestamp: 0,
            metadata: RecordMetadata {
                record_type: value.record_type(),
                intent,
                rejection_type: None,
                rejection_reason: String::new(),
                request_id: None,
            },
            value,
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.metadata.kind()
    }

    pub fn intent(&self) -> Intent {
        self.metadata.intent
    }

    pub fn record_type(&self) -> RecordType {
        self.metadata.record_type
    }

    pub fn is_rejection(&self) -> bool {
        self.metadata.rejection_type.is_some()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(position: u64, bytes: &[u8]) -> Result<Self> {
        let mut record: Record = serde_json::from_slice(bytes)?;
        record.position = position;
        Ok(record)
    }
}

//! # processor
//!
//! why: one processor per (record type, intent) decides what a committed record does to state
//! relations: invoked by engine.rs; command processors decide through CommandControl, all write through RecordWriter
//! what: CommandProcessor, RecordProcessor, CommandControl, RecordWriter, ProcessorRegistry

mod bpmn;
mod deployment;
mod incident;
mod job;
mod message;
mod subscription;
mod timer;
mod workflow_instance;

use crate::record::{Intent, Payload, Record, RecordType, RecordValue, RejectionType};
use crate::state::PartitionState;
use std::collections::BTreeMap;
use tracing::warn;

/// handles a command that is either accepted or rejected, never both
pub trait CommandProcessor: Send {
    fn on_command(
        &mut self,
        command: &Record,
        state: &mut PartitionState,
        control: &mut CommandControl,
        writer: &mut RecordWriter,
    );
}

/// reacts to a record, writing whatever follow-ups it needs
pub trait RecordProcessor: Send {
    fn process_record(&mut self, record: &Record, state: &mut PartitionState, writer: &mut RecordWriter);
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Decision {
    Accept { intent: Intent, value: RecordValue },
    Reject { rejection_type: RejectionType, reason: String },
}

/// the accept / reject decision of one command
#[derive(Debug)]
pub struct CommandControl {
    key: u64,
    decision: Option<Decision>,
}

impl CommandControl {
    pub(crate) fn new(key: u64) -> Self {
        Self { key, decision: None }
    }

    /// the command's key, or the key drawn for it when the command carried none
    pub fn key(&self) -> u64 {
        self.key
    }

    /// accept the command; the event written for it carries `intent` and `value`
    pub fn accept(&mut self, intent: Intent, value: RecordValue) -> u64 {
        if self.decision.is_some() {
            warn!(key = self.key, ?intent, "command already decided, ignoring accept");
            return self.key;
        }
        self.decision = Some(Decision::Accept { intent, value });
        self.key
    }

    pub fn reject(&mut self, rejection_type: RejectionType, reason: impl Into<String>) {
        if self.decision.is_some() {
            warn!(key = self.key, %rejection_type, "command already decided, ignoring reject");
            return;
        }
        self.decision = Some(Decision::Reject {
            rejection_type,
            reason: reason.into(),
        });
    }

    pub fn is_decided(&self) -> bool {
        self.decision.is_some()
    }

    pub(crate) fn take_decision(&mut self) -> Option<Decision> {
        self.decision.take()
    }
}

/// collects the follow-up records of the record being processed
///
/// follow-ups inherit the source's position as `source_position` and its timestamp
#[derive(Debug)]
pub struct RecordWriter {
    source_position: u64,
    partition_id: u32,
    timestamp: u64,
    records: Vec<Record>,
}

impl RecordWriter {
    pub(crate) fn new(source: &Record) -> Self {
        Self {
            source_position: source.position,
            partition_id: source.partition_id,
            timestamp: source.timestamp,
            records: Vec::new(),
        }
    }

    fn follow_up(&self, key: u64, intent: Intent, value: RecordValue) -> Record {
        let mut record = Record::new(key, intent, value);
        record.source_position = self.source_position;
        record.partition_id = self.partition_id;
        record.timestamp = self.timestamp;
        record
    }

    pub fn append_follow_up_event(&mut self, key: u64, intent: Intent, value: RecordValue) {
        let record = self.follow_up(key, intent, value);
        self.records.push(record);
    }

    /// a command for an entity that does not exist yet; its processor draws the key
    pub fn append_new_command(&mut self, intent: Intent, value: RecordValue) {
        self.append_command(0, intent, value);
    }

    pub fn append_command(&mut self, key: u64, intent: Intent, value: RecordValue) {
        let record = self.follow_up(key, intent, value);
        self.records.push(record);
    }

    pub fn append_rejection(&mut self, command: &Record, rejection_type: RejectionType, reason: impl Into<String>) {
        let record = self.rejection(command, rejection_type, reason.into());
        self.records.push(record);
    }

    pub(crate) fn rejection(&self, command: &Record, rejection_type: RejectionType, reason: String) -> Record {
        let mut record = self.follow_up(command.key, command.intent(), command.value.clone());
        record.metadata.rejection_type = Some(rejection_type);
        record.metadata.rejection_reason = reason;
        record
    }

    pub(crate) fn event(&self, key: u64, intent: Intent, value: RecordValue) -> Record {
        self.follow_up(key, intent, value)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn into_records(self) -> Vec<Record> {
        self.records
    }
}

pub(crate) enum Processor {
    Command(Box<dyn CommandProcessor>),
    Record(Box<dyn RecordProcessor>),
}

/// processors by (record type, intent)
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: BTreeMap<(RecordType, Intent), Processor>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_command(
        mut self,
        record_type: RecordType,
        intent: Intent,
        processor: impl CommandProcessor + 'static,
    ) -> Self {
        self.processors
            .insert((record_type, intent), Processor::Command(Box::new(processor)));
        self
    }

    pub fn on_record(
        mut self,
        record_type: RecordType,
        intent: Intent,
        processor: impl RecordProcessor + 'static,
    ) -> Self {
        self.processors
            .insert((record_type, intent), Processor::Record(Box::new(processor)));
        self
    }

    pub fn contains(&self, record_type: RecordType, intent: Intent) -> bool {
        self.processors.contains_key(&(record_type, intent))
    }

    pub(crate) fn get_mut(&mut self, record_type: RecordType, intent: Intent) -> Option<&mut Processor> {
        self.processors.get_mut(&(record_type, intent))
    }

    /// every processor of the broker
    pub fn standard() -> Self {
        let registry = Self::new();
        let registry = job::register(registry);
        let registry = incident::register(registry);
        let registry = deployment::register(registry);
        let registry = workflow_instance::register(registry);
        let registry = bpmn::register(registry);
        let registry = timer::register(registry);
        let registry = message::register(registry);
        subscription::register(registry)
    }
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("processors", &self.processors.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// top level merge of `source` into `target`
pub(crate) fn merge_payload(target: &mut Payload, source: &Payload) {
    for (name, value) in source {
        target.insert(name.clone(), value.clone());
    }
}

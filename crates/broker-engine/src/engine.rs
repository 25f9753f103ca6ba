//! # engine
//!
//! why: apply committed records to partition state, one at a time, in log order
//! relations: dispatches to processor/ through ProcessorRegistry, driven by partition.rs
//! what: StreamProcessor
//!
//! every replica runs the same processor over the same records, so the
//! resulting state and the produced follow-ups are equal everywhere. whether
//! the follow-ups are written is decided by the partition, not here.

use crate::processor::{CommandControl, Decision, Processor, ProcessorRegistry, RecordWriter};
use crate::record::{Record, RecordKind, RejectionType};
use crate::snapshot::Snapshot;
use crate::state::PartitionState;
use tracing::{debug, error, warn};

pub struct StreamProcessor {
    partition_id: u32,
    registry: ProcessorRegistry,
    state: PartitionState,
    last_processed: u64,
}

impl StreamProcessor {
    /// a processor with every standard processor registered
    pub fn new(partition_id: u32) -> Self {
        Self::with_registry(partition_id, ProcessorRegistry::standard())
    }

    pub fn with_registry(partition_id: u32, registry: ProcessorRegistry) -> Self {
        Self {
            partition_id,
            registry,
            state: PartitionState::new(),
            last_processed: 0,
        }
    }

    pub fn partition_id(&self) -> u32 {
        self.partition_id
    }

    pub fn state(&self) -> &PartitionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut PartitionState {
        &mut self.state
    }

    /// position of the last record applied, 0 before the first
    pub fn last_processed_position(&self) -> u64 {
        self.last_processed
    }

    /// continue from a snapshot, or from scratch without one
    pub fn restore(&mut self, snapshot: Option<Snapshot>) {
        match snapshot {
            Some(snapshot) => {
                debug!(partition = self.partition_id, position = snapshot.position, "restoring snapshot");
                self.state = snapshot.state;
                self.last_processed = snapshot.position;
            }
            None => {
                self.state = PartitionState::new();
                self.last_processed = 0;
            }
        }
    }

    /// account for a log entry that carries no record
    pub fn skip(&mut self, position: u64) {
        self.last_processed = self.last_processed.max(position);
    }

    /// apply `record` and return the records it produced, in write order
    pub fn process(&mut self, record: &Record) -> Vec<Record> {
        self.last_processed = self.last_processed.max(record.position);

        if record.kind() == RecordKind::Rejection {
            return Vec::new();
        }
        if record.value.record_type() != record.record_type() {
            warn!(
                partition = self.partition_id,
                position = record.position,
                "record value does not match its record type, skipping"
            );
            return Vec::new();
        }

        let mut writer = RecordWriter::new(record);
        let Some(processor) = self.registry.get_mut(record.record_type(), record.intent()) else {
            return Vec::new();
        };

        match processor {
            Processor::Command(processor) => {
                let key = match command_key(&mut self.state, record) {
                    Ok(key) => key,
                    Err(reason) => {
                        warn!(partition = self.partition_id, position = record.position, %reason, "command key refused");
                        return vec![writer.rejection(record, RejectionType::InvalidArgument, reason)];
                    }
                };
                let mut control = CommandControl::new(key);
                processor.on_command(record, &mut self.state, &mut control, &mut writer);

                let decision = control.take_decision().unwrap_or_else(|| {
                    error!(
                        partition = self.partition_id,
                        position = record.position,
                        record_type = ?record.record_type(),
                        intent = ?record.intent(),
                        "command was neither accepted nor rejected"
                    );
                    Decision::Reject {
                        rejection_type: RejectionType::InvalidState,
                        reason: format!(
                            "Expected to process command {:?} {:?}, but no decision was made",
                            record.record_type(),
                            record.intent()
                        ),
                    }
                });
                let decided = match decision {
                    Decision::Accept { intent, value } => writer.event(key, intent, value),
                    Decision::Reject {
                        rejection_type,
                        reason,
                    } => writer.rejection(record, rejection_type, reason),
                };

                let mut records = Vec::with_capacity(writer.len() + 1);
                records.push(decided);
                records.extend(writer.into_records());
                records
            }
            Processor::Record(processor) => {
                processor.process_record(record, &mut self.state, &mut writer);
                writer.into_records()
            }
        }
    }
}

/// the key a command is processed under; explicit keys are observed so drawn
/// keys never collide with them
fn command_key(state: &mut PartitionState, record: &Record) -> Result<u64, String> {
    if record.key == u64::MAX {
        return Err(format!(
            "Expected command key to be lower than {}, but it was {}",
            u64::MAX,
            record.key
        ));
    }
    if state.keys.is_exhausted() {
        return Err("Expected to draw a new key, but every key of this partition is used".to_string());
    }
    if record.key == 0 {
        return Ok(state.keys.next_key());
    }
    state.keys.observe(record.key);
    Ok(record.key)
}

impl std::fmt::Debug for StreamProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamProcessor")
            .field("partition_id", &self.partition_id)
            .field("last_processed", &self.last_processed)
            .finish()
    }
}

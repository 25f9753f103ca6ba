//! # partition
//!
//! why: one actor per partition tying raft replication to the stream processor
//! relations: owns a raft-core RaftNode, an engine.rs StreamProcessor, a snapshot.rs store and trigger.rs triggers
//! what: ClientCommand, ClientResponse, PartitionTask, PartitionHandle, Partition
//!
//! every replica applies every committed record. only the leader appends the
//! resulting follow-ups, and only for records whose follow-ups are not in the
//! log yet, so a record's follow-ups are written exactly once across leaders.

use crate::config::EngineConfig;
use crate::engine::StreamProcessor;
use crate::error::{EngineError, Result};
use crate::record::{Intent, Record, RecordKind, RecordValue};
use crate::snapshot::{FileSnapshotStore, InMemorySnapshotStore, Snapshot, SnapshotStore};
use crate::state::PartitionState;
use crate::trigger::TimeTriggers;
use futures::channel::{mpsc, oneshot};
use futures::{FutureExt, StreamExt};
use raft_core::{
    Configuration, Endpoint, EntryPayload, Envelope, RaftConfig, RaftError, RaftMessage, RaftNode,
};
use raft_storage::FileStorage;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// a command as a client submits it; key 0 asks the partition to assign one
#[derive(Debug, Clone, PartialEq)]
pub struct ClientCommand {
    pub key: u64,
    pub intent: Intent,
    pub value: RecordValue,
}

impl ClientCommand {
    pub fn new(intent: Intent, value: RecordValue) -> Self {
        Self::with_key(0, intent, value)
    }

    pub fn with_key(key: u64, intent: Intent, value: RecordValue) -> Self {
        Self { key, intent, value }
    }
}

/// the one event or rejection a client command produced
#[derive(Debug, Clone, PartialEq)]
pub struct ClientResponse {
    pub request_id: u64,
    pub partition_id: u32,
    pub record: Record,
}

impl ClientResponse {
    pub fn is_rejection(&self) -> bool {
        self.record.is_rejection()
    }
}

pub type ResponseReceiver = oneshot::Receiver<Result<ClientResponse>>;

/// work handed to the partition from other actors, drained once per do_work
#[derive(Debug)]
pub enum PartitionTask {
    Submit {
        command: ClientCommand,
        reply: oneshot::Sender<Result<ClientResponse>>,
    },
    TakeSnapshot,
}

/// cloneable sender side of a partition's task queue
#[derive(Debug, Clone)]
pub struct PartitionHandle {
    partition_id: u32,
    tasks: mpsc::UnboundedSender<PartitionTask>,
}

impl PartitionHandle {
    pub fn partition_id(&self) -> u32 {
        self.partition_id
    }

    /// the receiver resolves once the command's event or rejection is written,
    /// or with an error if this partition is not leading
    pub fn submit(&self, command: ClientCommand) -> Result<ResponseReceiver> {
        let (reply, receiver) = oneshot::channel();
        self.send(PartitionTask::Submit { command, reply })?;
        Ok(receiver)
    }

    pub fn request_snapshot(&self) -> Result<()> {
        self.send(PartitionTask::TakeSnapshot)
    }

    fn send(&self, task: PartitionTask) -> Result<()> {
        self.tasks
            .unbounded_send(task)
            .map_err(|_| EngineError::Closed(self.partition_id))
    }
}

pub struct Partition {
    config: EngineConfig,
    raft: RaftNode,
    processor: StreamProcessor,
    snapshots: Box<dyn SnapshotStore>,
    tasks: mpsc::UnboundedReceiver<PartitionTask>,
    handle: PartitionHandle,
    pending: BTreeMap<u64, oneshot::Sender<Result<ClientResponse>>>,
    responses: Vec<ClientResponse>,
    triggers: TimeTriggers,
    /// term in which recovery ran for the current leadership
    leading: Option<u64>,
    /// highest source position among the records in the log
    last_written_source: u64,
    next_request: u64,
    snapshot_position: u64,
    last_snapshot_at: u64,
    now: u64,
}

impl Partition {
    /// a partition over `raft`, resuming from the latest snapshot in `snapshots`
    pub fn new(config: EngineConfig, raft: RaftNode, snapshots: Box<dyn SnapshotStore>) -> Result<Self> {
        config.validate()?;
        let partition_id = raft.partition_id();
        let mut processor = StreamProcessor::new(partition_id);
        let latest = snapshots.latest()?;
        let snapshot_position = latest.as_ref().map_or(0, |s| s.position);
        processor.restore(latest);

        let (sender, tasks) = mpsc::unbounded();
        Ok(Self {
            config,
            raft,
            processor,
            snapshots,
            tasks,
            handle: PartitionHandle {
                partition_id,
                tasks: sender,
            },
            pending: BTreeMap::new(),
            responses: Vec::new(),
            triggers: TimeTriggers::new(),
            leading: None,
            last_written_source: 0,
            next_request: 0,
            snapshot_position,
            last_snapshot_at: 0,
            now: 0,
        })
    }

    /// raft log, meta store and snapshots all in memory
    pub fn in_memory(
        config: EngineConfig,
        raft_config: RaftConfig,
        partition_id: u32,
        local: Endpoint,
    ) -> Result<Self> {
        let raft = RaftNode::in_memory(raft_config, partition_id, local)?;
        Self::new(config, raft, Box::new(InMemorySnapshotStore::new()))
    }

    /// a partition persisted under `storage`; snapshots live beside its log
    pub fn open(
        config: EngineConfig,
        raft_config: RaftConfig,
        storage: &FileStorage,
        partition_id: u32,
        local: Endpoint,
    ) -> Result<Self> {
        let (log, meta) = storage.open_partition(partition_id)?;
        let raft = RaftNode::new(raft_config, partition_id, local, Box::new(log), Box::new(meta))?;
        let snapshots = FileSnapshotStore::open(storage.partition_dir(partition_id).join("snapshots"))?;
        Self::new(config, raft, Box::new(snapshots))
    }

    // -- lifecycle --

    pub fn bootstrap(&mut self) -> Result<()> {
        Ok(self.raft.bootstrap()?)
    }

    pub fn bootstrap_with(&mut self, members: Vec<Endpoint>) -> Result<()> {
        Ok(self.raft.bootstrap_with(members)?)
    }

    pub fn start(&mut self) -> Result<()> {
        Ok(self.raft.start()?)
    }

    pub fn join(&mut self, members: Vec<Endpoint>) -> Result<oneshot::Receiver<Configuration>> {
        Ok(self.raft.join(members)?)
    }

    pub fn leave(&mut self) -> Result<oneshot::Receiver<()>> {
        Ok(self.raft.leave()?)
    }

    pub fn close(&mut self) -> Result<()> {
        self.step_down();
        Ok(self.raft.close()?)
    }

    // -- messaging --

    pub fn handle(&self) -> PartitionHandle {
        self.handle.clone()
    }

    pub fn receive(&mut self, from: Endpoint, message: RaftMessage) {
        self.raft.receive(from, message);
    }

    pub fn receive_frame(&mut self, from: Endpoint, frame: &[u8]) {
        self.raft.receive_frame(from, frame);
    }

    pub fn take_outbox(&mut self) -> Vec<Envelope> {
        self.raft.take_outbox()
    }

    /// append a client command at the leader; its response is answered under
    /// the returned request id through `take_responses`
    pub fn submit(&mut self, command: ClientCommand) -> Result<u64> {
        if !self.raft.is_leader() {
            return Err(EngineError::NotLeader {
                partition_id: self.partition_id(),
                leader: self.raft.leader().cloned(),
            });
        }
        self.next_request += 1;
        let request_id = (self.raft.term() << 32) | (self.next_request & 0xffff_ffff);

        let mut record = Record::command(command.key, command.intent, command.value);
        record.partition_id = self.partition_id();
        record.timestamp = self.now;
        record.metadata.request_id = Some(request_id);
        let position = self.raft.append(record.encode()?)?;
        debug!(partition = self.partition_id(), position, request_id, intent = ?command.intent, "command submitted");
        Ok(request_id)
    }

    /// responses of submitted commands nobody waits on through a handle
    pub fn take_responses(&mut self) -> Vec<ClientResponse> {
        std::mem::take(&mut self.responses)
    }

    // -- work --

    /// one tick at time `now` (ms): tasks, raft, committed records, triggers, snapshots
    pub fn do_work(&mut self, now: u64) -> Result<usize> {
        self.now = now;
        let mut work = self.drain_tasks();
        work += self.raft.do_work(now)?;
        work += self.track_leadership(now)?;
        work += self.apply_committed()?;
        if self.is_writing() {
            work += self.fire_triggers(now)?;
        }
        if now.saturating_sub(self.last_snapshot_at) >= self.config.snapshot_period
            && self.processor.last_processed_position() > self.snapshot_position
        {
            self.take_snapshot()?;
            work += 1;
        }
        Ok(work)
    }

    /// store the current state as of the last applied record
    pub fn take_snapshot(&mut self) -> Result<u64> {
        let position = self.processor.last_processed_position();
        let snapshot = Snapshot {
            position,
            state: self.processor.state().clone(),
        };
        self.snapshots.store(&snapshot)?;
        self.snapshot_position = position;
        self.last_snapshot_at = self.now;
        info!(partition = self.partition_id(), position, "snapshot taken");
        Ok(position)
    }

    fn drain_tasks(&mut self) -> usize {
        let mut drained = 0;
        while let Some(Some(task)) = self.tasks.next().now_or_never() {
            drained += 1;
            match task {
                PartitionTask::Submit { command, reply } => match self.submit(command) {
                    Ok(request_id) => {
                        self.pending.insert(request_id, reply);
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                },
                PartitionTask::TakeSnapshot => {
                    if let Err(e) = self.take_snapshot() {
                        error!(partition = self.partition_id(), error = %e, "requested snapshot failed");
                    }
                }
            }
        }
        drained
    }

    fn track_leadership(&mut self, now: u64) -> Result<usize> {
        let term = self.raft.term();
        match (self.raft.is_leader(), self.leading) {
            (true, Some(leading_term)) if leading_term == term => Ok(0),
            (true, previous) => {
                if previous.is_some() {
                    self.step_down();
                }
                self.recover(now)?;
                self.leading = Some(term);
                Ok(1)
            }
            (false, Some(_)) => {
                self.step_down();
                Ok(1)
            }
            (false, None) => Ok(0),
        }
    }

    /// restart processing from the latest snapshot and find out which records
    /// already have their follow-ups in the log
    fn recover(&mut self, now: u64) -> Result<()> {
        let latest = self.snapshots.latest()?;
        self.snapshot_position = latest.as_ref().map_or(0, |s| s.position);
        self.processor.restore(latest);
        self.last_written_source = self.scan_written_sources();
        self.triggers.reset(now);
        info!(
            partition = self.partition_id(),
            term = self.raft.term(),
            position = self.processor.last_processed_position(),
            last_written_source = self.last_written_source,
            "leading, reprocessing from snapshot"
        );
        Ok(())
    }

    fn step_down(&mut self) {
        if self.leading.take().is_some() {
            info!(partition = self.partition_id(), pending = self.pending.len(), "no longer leading");
        }
        // dropping the senders cancels the waiting receivers
        self.pending.clear();
    }

    fn scan_written_sources(&self) -> u64 {
        let log = self.raft.log();
        let mut highest = 0;
        for position in 1..=log.last_position() {
            let Some(entry) = log.read(position) else {
                continue;
            };
            if let EntryPayload::Record(bytes) = entry.payload {
                match Record::decode(position, &bytes) {
                    Ok(record) => highest = highest.max(record.source_position),
                    Err(e) => warn!(partition = self.partition_id(), position, error = %e, "undecodable record in log"),
                }
            }
        }
        highest
    }

    fn is_writing(&self) -> bool {
        self.leading.is_some() && self.raft.is_leader()
    }

    fn apply_committed(&mut self) -> Result<usize> {
        let commit = self.raft.commit_position();
        let mut applied = 0;
        while self.processor.last_processed_position() < commit {
            let position = self.processor.last_processed_position() + 1;
            let Some(entry) = self.raft.log().read(position) else {
                error!(partition = self.partition_id(), position, commit, "committed entry missing from log");
                break;
            };
            applied += 1;

            let EntryPayload::Record(bytes) = entry.payload else {
                self.processor.skip(position);
                continue;
            };
            let record = match Record::decode(position, &bytes) {
                Ok(record) => record,
                Err(e) => {
                    error!(partition = self.partition_id(), position, error = %e, "skipping undecodable record");
                    self.processor.skip(position);
                    continue;
                }
            };

            let follow_ups = self.processor.process(&record);
            if self.is_writing() && position > self.last_written_source {
                self.write_follow_ups(&record, follow_ups)?;
            }
        }
        Ok(applied)
    }

    fn write_follow_ups(&mut self, source: &Record, follow_ups: Vec<Record>) -> Result<()> {
        let response = match source.metadata.request_id {
            Some(request_id) if source.kind() == RecordKind::Command => follow_ups
                .iter()
                .find(|r| r.kind() != RecordKind::Command)
                .map(|r| ClientResponse {
                    request_id,
                    partition_id: self.partition_id(),
                    record: r.clone(),
                }),
            _ => None,
        };

        for record in &follow_ups {
            match self.raft.append(record.encode()?) {
                Ok(_) => {}
                Err(RaftError::NotLeader { .. }) => {
                    warn!(partition = self.partition_id(), position = source.position, "lost leadership while writing");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
        if !follow_ups.is_empty() {
            self.last_written_source = source.position;
        }

        if let Some(response) = response {
            self.respond(response);
        }
        Ok(())
    }

    fn respond(&mut self, response: ClientResponse) {
        match self.pending.remove(&response.request_id) {
            Some(reply) => {
                let _ = reply.send(Ok(response));
            }
            None => self.responses.push(response),
        }
    }

    fn fire_triggers(&mut self, now: u64) -> Result<usize> {
        let commands = self
            .triggers
            .due_commands(&self.config, self.processor.state(), now);
        let fired = commands.len();
        for mut command in commands {
            command.partition_id = self.partition_id();
            command.timestamp = now;
            self.raft.append(command.encode()?)?;
        }
        if fired > 0 {
            debug!(partition = self.partition_id(), fired, "time triggers fired");
        }
        Ok(fired)
    }

    // -- accessors --

    pub fn partition_id(&self) -> u32 {
        self.raft.partition_id()
    }

    pub fn is_leader(&self) -> bool {
        self.raft.is_leader()
    }

    pub fn state(&self) -> &PartitionState {
        self.processor.state()
    }

    pub fn last_processed_position(&self) -> u64 {
        self.processor.last_processed_position()
    }

    pub fn snapshot_position(&self) -> u64 {
        self.snapshot_position
    }

    pub fn raft(&self) -> &RaftNode {
        &self.raft
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// committed records of the log, decoded; mostly for inspection and tests
    pub fn records(&self) -> Vec<Record> {
        let log = self.raft.log();
        (1..=self.raft.commit_position())
            .filter_map(|position| {
                let entry = log.read(position)?;
                match entry.payload {
                    EntryPayload::Record(bytes) => Record::decode(position, &bytes).ok(),
                    _ => None,
                }
            })
            .collect()
    }
}

impl std::fmt::Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition")
            .field("partition_id", &self.partition_id())
            .field("raft_state", &self.raft.state())
            .field("leading", &self.leading)
            .field("last_processed", &self.processor.last_processed_position())
            .field("last_written_source", &self.last_written_source)
            .finish()
    }
}

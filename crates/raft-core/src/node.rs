//! # node
//!
//! why: drive one partition's raft state machine from a single actor
//! relations: owns context.rs and the active state from state/, decodes frames with codec.rs
//! what: NodeState, StateChange, RaftNode (transitions, dispatch, do_work, outbox)

use crate::codec;
use crate::config::RaftConfig;
use crate::context::RaftContext;
use crate::controller::{JoinController, LeaveController};
use crate::error::{RaftError, Result};
use crate::log::{EntryPayload, InMemoryLog, Log};
use crate::membership::{Configuration, Endpoint};
use crate::message::*;
use crate::meta::{InMemoryMetaStore, MetaStore};
use crate::state::{self, RaftState};
use futures::channel::oneshot;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, error, info, warn};

/// upper bound of do_work polls spent draining a closing state
const CLOSE_DRAIN_LIMIT: usize = 16;

/// upper bound of chained transitions applied in one go
const TRANSITION_LIMIT: usize = 8;

/// The four states a Raft node can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NodeState {
    /// Not part of a replication group, answers everything neutrally
    #[default]
    Inactive,
    /// Passive state - accepts the leader's log, polls when the leader goes silent
    Follower,
    /// Transitional state - requesting votes to become leader
    Candidate,
    /// Active state - manages log replication, sends heartbeats
    Leader,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Inactive => "inactive",
            NodeState::Follower => "follower",
            NodeState::Candidate => "candidate",
            NodeState::Leader => "leader",
        };
        f.write_str(name)
    }
}

/// emitted to listeners once a new state is installed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub partition_id: u32,
    pub term: u64,
    pub state: NodeState,
}

pub type StateListener = Box<dyn FnMut(&StateChange) + Send>;

/// A single Raft node: the replication group member of one partition
///
/// sans-io: messages go in through `receive` / `receive_frame`, everything
/// happens in `do_work(now)`, outgoing messages are drained with `take_outbox`
pub struct RaftNode {
    ctx: RaftContext,
    state: Box<dyn RaftState>,
    inbox: VecDeque<(Endpoint, RaftMessage)>,
    listeners: Vec<StateListener>,
    join: Option<JoinController>,
    leave: Option<LeaveController>,
    stopped: bool,
}

impl RaftNode {
    /// Create an inactive node; term, vote and configuration are loaded from `meta`
    pub fn new(
        config: RaftConfig,
        partition_id: u32,
        local: Endpoint,
        log: Box<dyn Log>,
        meta: Box<dyn MetaStore>,
    ) -> Result<Self> {
        config.validate()?;
        let ctx = RaftContext::new(config, partition_id, local, log, meta)?;
        Ok(Self {
            ctx,
            state: state::create(NodeState::Inactive),
            inbox: VecDeque::new(),
            listeners: Vec::new(),
            join: None,
            leave: None,
            stopped: false,
        })
    }

    /// Create a node backed by in-memory log and meta store
    pub fn in_memory(config: RaftConfig, partition_id: u32, local: Endpoint) -> Result<Self> {
        Self::new(
            config,
            partition_id,
            local,
            Box::new(InMemoryLog::new()),
            Box::new(InMemoryMetaStore::new()),
        )
    }

    // -- lifecycle --

    /// start a new single-member cluster with this node as its only member
    pub fn bootstrap(&mut self) -> Result<()> {
        let local = self.ctx.local.clone();
        self.bootstrap_with(vec![local])
    }

    /// start a cluster from a static member list shared by every node
    pub fn bootstrap_with(&mut self, members: Vec<Endpoint>) -> Result<()> {
        self.ensure_running()?;
        if self.ctx.configuration.is_none() {
            let mut members = members;
            if !members.contains(&self.ctx.local) {
                members.push(self.ctx.local.clone());
            }
            self.ctx.configure(Configuration::new(0, 0, members))?;
        }
        self.guarded(|node| node.transition(NodeState::Follower))
    }

    /// restart from the configuration found in the meta store or log
    pub fn start(&mut self) -> Result<()> {
        self.ensure_running()?;
        if self.ctx.configuration.is_none() {
            return Err(RaftError::Config(
                "no stored configuration to start from".to_string(),
            ));
        }
        self.guarded(|node| node.transition(NodeState::Follower))
    }

    /// join an existing cluster through any of `members`; the receiver
    /// resolves with the configuration that admitted us
    pub fn join(&mut self, members: Vec<Endpoint>) -> Result<oneshot::Receiver<Configuration>> {
        self.ensure_running()?;
        let members: Vec<Endpoint> = members
            .into_iter()
            .filter(|m| *m != self.ctx.local)
            .collect();
        if members.is_empty() {
            return Err(RaftError::EmptyCluster);
        }
        if self.ctx.configuration.is_none() {
            self.ctx
                .configure(Configuration::new(0, 0, members.clone()))?;
        }
        self.guarded(|node| node.transition(NodeState::Follower))?;

        let (done, receiver) = oneshot::channel();
        self.join = Some(JoinController::new(members, done));
        Ok(receiver)
    }

    /// leave the cluster; the receiver resolves once the removal is committed
    /// and the node went inactive
    pub fn leave(&mut self) -> Result<oneshot::Receiver<()>> {
        self.ensure_running()?;
        let (done, receiver) = oneshot::channel();
        match self.state.kind() {
            NodeState::Inactive => {
                let _ = done.send(());
            }
            NodeState::Leader => {
                self.guarded(|node| state::leader::leave_self(&mut node.ctx, done))?;
            }
            NodeState::Follower | NodeState::Candidate => {
                if let Some(join) = self.join.as_mut() {
                    join.close();
                }
                self.join = None;
                self.leave = Some(LeaveController::new(done));
            }
        }
        Ok(receiver)
    }

    /// stop taking part in replication; pending join / leave receivers are canceled
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut join) = self.join.take() {
            join.close();
        }
        if let Some(mut leave) = self.leave.take() {
            leave.close();
        }
        if self.stopped {
            return Ok(());
        }
        self.guarded(|node| node.transition(NodeState::Inactive))
    }

    /// register a listener invoked after every state transition
    pub fn on_state_change(&mut self, listener: impl FnMut(&StateChange) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    // -- messaging --

    /// queue a message for the next do_work
    pub fn receive(&mut self, from: Endpoint, message: RaftMessage) {
        self.inbox.push_back((from, message));
    }

    /// decode and queue a frame; undecodable frames are answered with an error response
    pub fn receive_frame(&mut self, from: Endpoint, frame: &[u8]) {
        match codec::decode(frame) {
            Ok(message) => self.receive(from, message),
            Err(e) => {
                warn!(partition = self.ctx.partition_id, from = %from, error = %e, "dropping undecodable frame");
                let response = codec::error_response(&e);
                self.ctx.send(from, RaftMessage::ErrorResponse(response));
            }
        }
    }

    /// drain everything queued for sending
    pub fn take_outbox(&mut self) -> Vec<Envelope> {
        std::mem::take(&mut self.ctx.outbox)
    }

    /// process queued messages, timers and controllers at time `now` (ms)
    pub fn do_work(&mut self, now: u64) -> Result<usize> {
        self.ensure_running()?;
        self.ctx.now = now;
        self.guarded(|node| node.run())
    }

    /// append a record at the leader; returns its log position
    pub fn append(&mut self, data: Vec<u8>) -> Result<u64> {
        self.ensure_running()?;
        if self.state.kind() != NodeState::Leader {
            return Err(RaftError::NotLeader {
                leader: self.ctx.leader.clone(),
            });
        }
        self.guarded(|node| node.ctx.append_entry(EntryPayload::Record(data)))
    }

    // -- accessors --

    pub fn state(&self) -> NodeState {
        self.state.kind()
    }

    pub fn is_leader(&self) -> bool {
        self.state.kind() == NodeState::Leader
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn partition_id(&self) -> u32 {
        self.ctx.partition_id
    }

    pub fn local(&self) -> &Endpoint {
        &self.ctx.local
    }

    pub fn term(&self) -> u64 {
        self.ctx.term
    }

    pub fn leader(&self) -> Option<&Endpoint> {
        self.ctx.leader.as_ref()
    }

    pub fn last_voted_for(&self) -> Option<&Endpoint> {
        self.ctx.last_voted_for.as_ref()
    }

    pub fn commit_position(&self) -> u64 {
        self.ctx.commit_position
    }

    pub fn configuration(&self) -> Option<&Configuration> {
        self.ctx.configuration.as_ref()
    }

    /// remote members of the current configuration
    pub fn members(&self) -> Vec<Endpoint> {
        self.ctx.members.iter().map(|m| m.endpoint.clone()).collect()
    }

    /// majority of the cluster including this node
    pub fn quorum_size(&self) -> usize {
        self.ctx.quorum()
    }

    pub fn log(&self) -> &dyn Log {
        self.ctx.log.as_ref()
    }

    pub fn config(&self) -> &RaftConfig {
        &self.ctx.config
    }

    /// a leader whose cluster is smaller than the replication factor
    pub fn need_members(&self) -> bool {
        self.is_leader() && self.ctx.members.len() + 1 < self.ctx.config.replication_factor
    }

    // -- internals --

    fn ensure_running(&self) -> Result<()> {
        if self.stopped {
            return Err(RaftError::Stopped(self.ctx.partition_id));
        }
        Ok(())
    }

    /// persistence failures are fatal for the partition
    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = f(self);
        if let Err(RaftError::Persistence(e)) = &result {
            error!(partition = self.ctx.partition_id, term = self.ctx.term, error = %e, "persistence failure, stopping raft");
            self.fail();
        }
        result
    }

    fn fail(&mut self) {
        self.stopped = true;
        self.ctx.pending_transition = None;
        self.state.close(&mut self.ctx);
        self.state = state::create(NodeState::Inactive);
        self.ctx.leader = None;
        if let Some(mut join) = self.join.take() {
            join.close();
        }
        if let Some(mut leave) = self.leave.take() {
            leave.close();
        }
        self.notify(NodeState::Inactive);
    }

    fn run(&mut self) -> Result<usize> {
        let mut work = 0;
        while let Some((from, message)) = self.inbox.pop_front() {
            self.dispatch(from, message)?;
            self.apply_transitions()?;
            work += 1;
        }

        work += self.state.do_work(&mut self.ctx)?;
        self.apply_transitions()?;

        if let Some(join) = self.join.as_mut() {
            work += join.do_work(&mut self.ctx);
            if join.is_closed() {
                self.join = None;
            }
        }
        if let Some(leave) = self.leave.as_mut() {
            work += leave.do_work(&mut self.ctx);
        }
        self.apply_transitions()?;
        Ok(work)
    }

    fn apply_transitions(&mut self) -> Result<()> {
        for _ in 0..TRANSITION_LIMIT {
            match self.ctx.pending_transition.take() {
                Some(next) => self.transition(next)?,
                None => return Ok(()),
            }
        }
        if self.ctx.pending_transition.is_some() {
            warn!(partition = self.ctx.partition_id, "transition limit reached, deferring to next tick");
        }
        Ok(())
    }

    /// the only way to change state: close, drain, install, open, notify
    fn transition(&mut self, next: NodeState) -> Result<()> {
        let current = self.state.kind();
        if current == next {
            return Ok(());
        }
        info!(
            partition = self.ctx.partition_id,
            term = self.ctx.term,
            from = %current,
            to = %next,
            "transition"
        );

        self.state.close(&mut self.ctx);
        for _ in 0..CLOSE_DRAIN_LIMIT {
            if self.state.is_closed() {
                break;
            }
            self.state.do_work(&mut self.ctx)?;
        }

        self.state = state::create(next);
        self.state.open(&mut self.ctx)?;

        if next == NodeState::Inactive {
            if let Some(mut leave) = self.leave.take() {
                leave.close();
            }
            if let Some(mut join) = self.join.take() {
                join.close();
            }
        }
        self.notify(next);
        Ok(())
    }

    fn notify(&mut self, state: NodeState) {
        let change = StateChange {
            partition_id: self.ctx.partition_id,
            term: self.ctx.term,
            state,
        };
        for listener in self.listeners.iter_mut() {
            listener(&change);
        }
    }

    fn dispatch(&mut self, from: Endpoint, message: RaftMessage) -> Result<()> {
        if let Some(partition_id) = message.partition_id() {
            if partition_id != self.ctx.partition_id {
                warn!(partition = self.ctx.partition_id, requested = partition_id, from = %from, "request for unknown partition");
                let response = ErrorResponse {
                    code: ErrorCode::PartitionNotFound,
                    message: format!("partition {} not found", partition_id),
                };
                self.ctx.send(from, RaftMessage::ErrorResponse(response));
                return Ok(());
            }
        }

        let kind = self.state.kind();
        if kind != NodeState::Inactive {
            if let Some(term) = message.term() {
                if term > self.ctx.term {
                    self.ctx.set_term(term)?;
                    self.transition(NodeState::Follower)?;
                } else if term == self.ctx.term
                    && kind == NodeState::Candidate
                    && matches!(
                        message,
                        RaftMessage::AppendRequest(_) | RaftMessage::ConfigureRequest(_)
                    )
                {
                    // another member won this term
                    self.transition(NodeState::Follower)?;
                }
            }
        }

        let ctx = &mut self.ctx;
        match message {
            RaftMessage::PollRequest(request) => {
                let response = self.state.poll(ctx, request)?;
                ctx.send(from, RaftMessage::PollResponse(response));
            }
            RaftMessage::PollResponse(response) => self.state.polled(ctx, &from, response)?,
            RaftMessage::VoteRequest(request) => {
                let response = self.state.vote(ctx, request)?;
                ctx.send(from, RaftMessage::VoteResponse(response));
            }
            RaftMessage::VoteResponse(response) => self.state.voted(ctx, &from, response)?,
            RaftMessage::AppendRequest(request) => {
                let response = self.state.append(ctx, request)?;
                ctx.send(from, RaftMessage::AppendResponse(response));
            }
            RaftMessage::AppendResponse(response) => self.state.appended(ctx, &from, response)?,
            RaftMessage::ConfigureRequest(request) => {
                let response = self.state.configure(ctx, request)?;
                ctx.send(from, RaftMessage::ConfigureResponse(response));
            }
            RaftMessage::ConfigureResponse(response) => {
                self.state.configured(ctx, &from, response)?
            }
            RaftMessage::JoinRequest(request) => {
                if let Some(response) = self.state.join(ctx, &from, request)? {
                    ctx.send(from, RaftMessage::JoinResponse(response));
                }
            }
            RaftMessage::JoinResponse(response) => {
                if let Some(join) = self.join.as_mut() {
                    join.on_response(ctx, &from, response)?;
                }
            }
            RaftMessage::LeaveRequest(request) => {
                if let Some(response) = self.state.leave(ctx, &from, request)? {
                    ctx.send(from, RaftMessage::LeaveResponse(response));
                }
            }
            RaftMessage::LeaveResponse(response) => {
                if let Some(leave) = self.leave.as_mut() {
                    leave.on_response(ctx, &from, response);
                }
            }
            RaftMessage::ErrorResponse(response) => {
                warn!(
                    partition = ctx.partition_id,
                    from = %from,
                    code = ?response.code,
                    message = %response.message,
                    "error response"
                );
            }
        }
        debug!(partition = self.ctx.partition_id, term = self.ctx.term, "message dispatched");
        Ok(())
    }
}

impl fmt::Debug for RaftNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RaftNode")
            .field("partition_id", &self.ctx.partition_id)
            .field("local", &self.ctx.local)
            .field("state", &self.state.kind())
            .field("term", &self.ctx.term)
            .field("commit_position", &self.ctx.commit_position)
            .finish()
    }
}

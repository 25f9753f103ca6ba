//! # controller
//!
//! why: track the per-peer request state each raft state needs
//! relations: one Member per remote peer in context.rs; join/leave controllers live on node.rs
//! what: Member, Ballot, poll / vote / replication / configure / join / leave controllers

pub mod configure;
pub mod join;
pub mod leave;
pub mod poll;
pub mod replication;
pub mod vote;

pub use configure::ConfigureController;
pub use join::JoinController;
pub use leave::LeaveController;
pub use poll::PollController;
pub use replication::ReplicationController;
pub use vote::VoteController;

use crate::membership::Endpoint;

/// a remote peer and the controllers that talk to it
#[derive(Debug)]
pub struct Member {
    pub endpoint: Endpoint,
    pub poll: PollController,
    pub vote: VoteController,
    pub replication: ReplicationController,
    pub configure: ConfigureController,
}

impl Member {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            poll: PollController::default(),
            vote: VoteController::default(),
            replication: ReplicationController::default(),
            configure: ConfigureController::default(),
        }
    }

    /// force-close every controller; late responses are ignored afterwards
    pub fn close(&mut self) {
        self.poll.close();
        self.vote.close();
        self.replication.close();
        self.configure.close();
    }

    pub fn is_closed(&self) -> bool {
        self.poll.is_closed()
            && self.vote.is_closed()
            && self.replication.is_closed()
            && self.configure.is_closed()
    }
}

/// one outstanding yes/no question to a single peer
#[derive(Debug, Default, Clone)]
pub struct Ballot {
    open: bool,
    term: u64,
    sent_at: Option<u64>,
    outcome: Option<bool>,
}

impl Ballot {
    pub fn open(&mut self, term: u64) {
        *self = Ballot {
            open: true,
            term,
            sent_at: None,
            outcome: None,
        };
    }

    pub fn close(&mut self) {
        self.open = false;
        self.sent_at = None;
    }

    pub fn is_closed(&self) -> bool {
        !self.open
    }

    pub fn term(&self) -> u64 {
        self.term
    }

    /// unanswered and either never sent or timed out
    pub fn is_due(&self, now: u64, request_timeout: u64) -> bool {
        self.open
            && self.outcome.is_none()
            && self
                .sent_at
                .map_or(true, |sent| now.saturating_sub(sent) >= request_timeout)
    }

    pub fn sent(&mut self, now: u64) {
        self.sent_at = Some(now);
    }

    /// record an answer; true only for a fresh grant
    pub fn record(&mut self, granted: bool) -> bool {
        if !self.open || self.sent_at.is_none() || self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(granted);
        granted
    }

    pub fn is_granted(&self) -> bool {
        self.open && self.outcome == Some(true)
    }
}

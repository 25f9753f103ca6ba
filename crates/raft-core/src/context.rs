//! # context
//!
//! why: the single owner of a partition's raft state, shared by whichever state is active
//! relations: owned by node.rs, handed to every handler in state/ and to the join / leave controllers
//! what: RaftContext (term, vote, leader, commit, configuration, members, outbox), PendingChange

use crate::config::RaftConfig;
use crate::controller::Member;
use crate::error::Result;
use crate::log::{EntryPayload, Log, LogEntry};
use crate::membership::{Configuration, Endpoint};
use crate::message::{Envelope, RaftMessage};
use crate::meta::MetaStore;
use crate::node::NodeState;
use futures::channel::oneshot;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::{debug, info, warn};

/// who is waiting for an uncommitted configuration entry
#[derive(Debug)]
pub(crate) enum ChangeReply {
    Join(Endpoint),
    Leave(Endpoint),
    /// the leader is removing itself
    SelfLeave(oneshot::Sender<()>),
}

/// a membership change appended by the leader and not yet committed
#[derive(Debug)]
pub(crate) struct PendingChange {
    pub position: u64,
    pub reply: ChangeReply,
}

pub(crate) struct RaftContext {
    pub config: RaftConfig,
    pub partition_id: u32,
    pub local: Endpoint,
    pub term: u64,
    pub last_voted_for: Option<Endpoint>,
    pub leader: Option<Endpoint>,
    pub commit_position: u64,
    /// when the current leader was last heard from
    pub last_contact: Option<u64>,
    pub now: u64,
    pub election_deadline: u64,
    pub configuration: Option<Configuration>,
    /// remote peers only, the local node is tracked by `local`
    pub members: Vec<Member>,
    pub log: Box<dyn Log>,
    pub meta: Box<dyn MetaStore>,
    pub outbox: Vec<Envelope>,
    pub pending_transition: Option<NodeState>,
    pub pending_change: Option<PendingChange>,
    rng: StdRng,
}

impl RaftContext {
    pub fn new(
        config: RaftConfig,
        partition_id: u32,
        local: Endpoint,
        log: Box<dyn Log>,
        meta: Box<dyn MetaStore>,
    ) -> Result<Self> {
        let term = meta.load_term()?;
        let last_voted_for = meta.load_vote()?;
        let stored = meta.load_configuration()?;

        let mut hasher = DefaultHasher::new();
        local.hash(&mut hasher);
        partition_id.hash(&mut hasher);

        let mut ctx = Self {
            config,
            partition_id,
            local,
            term,
            last_voted_for,
            leader: None,
            commit_position: 0,
            last_contact: None,
            now: 0,
            election_deadline: 0,
            configuration: None,
            members: Vec::new(),
            log,
            meta,
            outbox: Vec::new(),
            pending_transition: None,
            pending_change: None,
            rng: StdRng::seed_from_u64(hasher.finish()),
        };

        if let Some(configuration) = stored {
            ctx.configure(configuration)?;
        }
        // configuration entries appended after the last persisted one
        let floor = ctx.configuration.as_ref().map_or(0, |c| c.position);
        if let Some(latest) = ctx.latest_logged_configuration(floor) {
            ctx.configure(latest)?;
        }
        Ok(ctx)
    }

    fn latest_logged_configuration(&self, floor: u64) -> Option<Configuration> {
        let mut position = self.log.last_position();
        while position > floor {
            if let Some(LogEntry {
                payload: EntryPayload::Configuration(configuration),
                ..
            }) = self.log.read(position)
            {
                return Some(configuration);
            }
            position -= 1;
        }
        None
    }

    // -- persistent state --

    /// accept a strictly higher term; clears leader and vote
    pub fn set_term(&mut self, term: u64) -> Result<bool> {
        if term <= self.term {
            return Ok(false);
        }
        self.meta.store_term_and_vote(term, None)?;
        debug!(partition = self.partition_id, term, "term changed");
        self.term = term;
        self.leader = None;
        self.last_voted_for = None;
        Ok(true)
    }

    pub fn set_last_voted_for(&mut self, candidate: Endpoint) -> Result<()> {
        self.meta.store_term_and_vote(self.term, Some(&candidate))?;
        self.last_voted_for = Some(candidate);
        Ok(())
    }

    /// accept a strictly higher commit position; a configuration installed
    /// within the newly committed range is persisted
    pub fn set_commit_position(&mut self, position: u64) -> Result<bool> {
        if position <= self.commit_position {
            return Ok(false);
        }
        let previous = self.commit_position;
        if let Some(configuration) = &self.configuration {
            if configuration.position > previous && configuration.position <= position {
                self.meta.store_configuration(configuration)?;
            }
        }
        self.commit_position = position;
        debug!(partition = self.partition_id, term = self.term, position, "commit advanced");
        Ok(true)
    }

    /// install a configuration newer than the current one
    ///
    /// the member list is rebuilt aside and swapped in; members that are gone
    /// have their controllers closed
    pub fn configure(&mut self, configuration: Configuration) -> Result<bool> {
        if let Some(current) = &self.configuration {
            if configuration.position <= current.position {
                return Ok(false);
            }
        }
        self.install(configuration)?;
        Ok(true)
    }

    /// the log was truncated from `position`; a configuration read from the
    /// dropped range is replaced by the latest one still logged, or else the
    /// stored one
    pub fn rollback_configuration(&mut self, position: u64) -> Result<bool> {
        let truncated = self
            .configuration
            .as_ref()
            .map_or(false, |c| c.position >= position);
        if !truncated {
            return Ok(false);
        }

        let stored = self.meta.load_configuration()?;
        let floor = stored.as_ref().map_or(0, |c| c.position);
        let restored = self.latest_logged_configuration(floor).or(stored);
        warn!(
            partition = self.partition_id,
            position,
            restored = restored.as_ref().map(|c| c.position),
            "configuration entry truncated, rolling back"
        );
        match restored {
            Some(configuration) => self.install(configuration)?,
            None => {
                for mut removed in self.members.drain(..) {
                    removed.close();
                }
                self.configuration = None;
            }
        }
        Ok(true)
    }

    fn install(&mut self, configuration: Configuration) -> Result<()> {
        let mut previous = std::mem::take(&mut self.members);
        let mut members = Vec::with_capacity(configuration.members.len());
        for endpoint in configuration.members.iter().filter(|e| **e != self.local) {
            match previous.iter().position(|m| m.endpoint == *endpoint) {
                Some(index) => members.push(previous.swap_remove(index)),
                None => members.push(Member::new(endpoint.clone())),
            }
        }
        for mut removed in previous {
            removed.close();
            debug!(partition = self.partition_id, member = %removed.endpoint, "member removed");
        }
        self.members = members;

        if configuration.position <= self.commit_position {
            self.meta.store_configuration(&configuration)?;
        }
        info!(
            partition = self.partition_id,
            position = configuration.position,
            version = configuration.version,
            members = configuration.members.len(),
            "configuration installed"
        );
        self.configuration = Some(configuration);
        Ok(())
    }

    // -- derived state --

    /// majority of the cluster, the local node included
    pub fn quorum(&self) -> usize {
        (self.members.len() + 1) / 2 + 1
    }

    pub fn is_voting_member(&self) -> bool {
        self.configuration
            .as_ref()
            .map_or(false, |c| c.contains(&self.local))
    }

    /// whether a candidate log tail is at least as up to date as ours
    pub fn is_log_up_to_date(&self, last_term: u64, last_position: u64) -> bool {
        (last_term, last_position) >= (self.log.last_term(), self.log.last_position())
    }

    /// a leader was heard from within the minimum election timeout
    pub fn has_recent_leader(&self) -> bool {
        self.leader.is_some()
            && self.last_contact.map_or(false, |contact| {
                self.now.saturating_sub(contact) < self.config.election_timeout_min
            })
    }

    pub fn member_mut(&mut self, endpoint: &Endpoint) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.endpoint == *endpoint)
    }

    // -- timers --

    pub fn reset_election_deadline(&mut self) {
        let timeout = self
            .rng
            .gen_range(self.config.election_timeout_min..=self.config.election_timeout_max);
        self.election_deadline = self.now + timeout;
    }

    pub fn election_timed_out(&self) -> bool {
        self.now >= self.election_deadline
    }

    // -- log --

    /// append a locally created entry at the tail in the current term
    pub fn append_entry(&mut self, payload: EntryPayload) -> Result<u64> {
        let position = self.log.last_position() + 1;
        self.log.append(LogEntry::new(self.term, position, payload))?;
        Ok(position)
    }

    // -- messaging --

    pub fn send(&mut self, to: Endpoint, message: RaftMessage) {
        self.outbox.push(Envelope {
            from: self.local.clone(),
            to,
            message,
        });
    }

    pub fn request_transition(&mut self, state: NodeState) {
        self.pending_transition = Some(state);
    }
}

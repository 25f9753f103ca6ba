//! # poll controller
//!
//! why: pre-vote a peer before disrupting the cluster with a term increase
//! relations: driven by state/follower.rs
//! what: PollController

use super::Ballot;

#[derive(Debug, Default, Clone)]
pub struct PollController {
    ballot: Ballot,
    /// numbers every round so late answers to an earlier one are dropped
    round: u64,
}

impl PollController {
    /// start a poll round at the follower's current term
    pub fn open(&mut self, term: u64) {
        self.round += 1;
        self.ballot.open(term);
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn close(&mut self) {
        self.ballot.close();
    }

    pub fn is_closed(&self) -> bool {
        self.ballot.is_closed()
    }

    pub fn is_due(&self, now: u64, request_timeout: u64) -> bool {
        self.ballot.is_due(now, request_timeout)
    }

    pub fn sent(&mut self, now: u64) {
        self.ballot.sent(now);
    }

    /// the responder answers with its own term, which may be lower than ours,
    /// so only the round it answers is checked
    pub fn on_response(&mut self, round: u64, accepted: bool) -> bool {
        if round != self.round {
            return false;
        }
        self.ballot.record(accepted)
    }

    pub fn is_accepted(&self) -> bool {
        self.ballot.is_granted()
    }
}

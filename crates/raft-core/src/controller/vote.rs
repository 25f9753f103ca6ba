//! # vote controller
//!
//! why: collect one peer's vote for the current election round
//! relations: driven by state/candidate.rs
//! what: VoteController

use super::Ballot;

#[derive(Debug, Default, Clone)]
pub struct VoteController {
    ballot: Ballot,
}

impl VoteController {
    pub fn open(&mut self, term: u64) {
        self.ballot.open(term);
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

    /// answers from another term belong to an abandoned round
    pub fn on_response(&mut self, term: u64, granted: bool) -> bool {
        if term != self.ballot.term() {
            return false;
        }
        self.ballot.record(granted)
    }

    pub fn is_granted(&self) -> bool {
        self.ballot.is_granted()
    }
}

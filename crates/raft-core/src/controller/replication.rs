//! # replication controller
//!
//! why: ship the leader's log to one follower and remember how far it got
//! relations: driven by state/leader.rs
//! what: ReplicationController (next / match positions, heartbeat, resend)

#[derive(Debug, Default, Clone)]
pub struct ReplicationController {
    open: bool,
    next_position: u64,
    match_position: u64,
    in_flight: Option<u64>,
    last_sent: Option<u64>,
}

impl ReplicationController {
    /// start optimistic: assume the follower holds everything the leader holds
    pub fn open(&mut self, leader_tail: u64) {
        *self = ReplicationController {
            open: true,
            next_position: leader_tail + 1,
            match_position: 0,
            in_flight: None,
            last_sent: None,
        };
    }

    pub fn close(&mut self) {
        self.open = false;
        self.in_flight = None;
    }

    pub fn is_closed(&self) -> bool {
        !self.open
    }

    pub fn next_position(&self) -> u64 {
        self.next_position
    }

    pub fn match_position(&self) -> u64 {
        self.match_position
    }

    /// a request is owed when the previous one timed out, when entries are
    /// waiting, or when the heartbeat interval elapsed
    pub fn is_due(&self, now: u64, leader_tail: u64, heartbeat: u64, request_timeout: u64) -> bool {
        if !self.open {
            return false;
        }
        match self.in_flight {
            Some(sent) => now.saturating_sub(sent) >= request_timeout,
            None => {
                self.next_position <= leader_tail
                    || self
                        .last_sent
                        .map_or(true, |sent| now.saturating_sub(sent) >= heartbeat)
            }
        }
    }

    pub fn sent(&mut self, now: u64) {
        self.in_flight = Some(now);
        self.last_sent = Some(now);
    }

    /// `last_position` is the follower's reported tail;
    /// returns whether the match position advanced
    pub fn on_response(&mut self, succeeded: bool, last_position: u64) -> bool {
        if !self.open {
            return false;
        }
        self.in_flight = None;
        let floor = self.match_position + 1;
        if succeeded {
            let advanced = last_position > self.match_position;
            self.match_position = self.match_position.max(last_position);
            self.next_position = (last_position + 1).max(self.match_position + 1);
            advanced
        } else {
            self.next_position = (last_position + 1).max(floor);
            false
        }
    }
}

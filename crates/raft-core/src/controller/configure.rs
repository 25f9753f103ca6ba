//! # configure controller
//!
//! why: push the leader's configuration to a member until it confirms it
//! relations: driven by state/leader.rs
//! what: ConfigureController

#[derive(Debug, Default, Clone)]
pub struct ConfigureController {
    open: bool,
    acknowledged: Option<u64>,
    in_flight: Option<u64>,
}

impl ConfigureController {
    pub fn open(&mut self) {
        *self = ConfigureController {
            open: true,
            acknowledged: None,
            in_flight: None,
        };
    }

    pub fn close(&mut self) {
        self.open = false;
        self.in_flight = None;
    }

    pub fn is_closed(&self) -> bool {
        !self.open
    }

    /// owed while the member has not confirmed `version`
    pub fn is_due(&self, now: u64, version: u64, request_timeout: u64) -> bool {
        self.open
            && self.acknowledged.map_or(true, |acked| acked < version)
            && self
                .in_flight
                .map_or(true, |sent| now.saturating_sub(sent) >= request_timeout)
    }

    pub fn sent(&mut self, now: u64) {
        self.in_flight = Some(now);
    }

    pub fn on_response(&mut self, succeeded: bool, version: u64) {
        if !self.open {
            return;
        }
        self.in_flight = None;
        if succeeded {
            self.acknowledged = Some(self.acknowledged.map_or(version, |v| v.max(version)));
        }
    }
}

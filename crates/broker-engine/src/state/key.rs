//! # key
//!
//! why: hand out entity keys that every replica derives identically
//! relations: part of PartitionState, drawn by the engine and processors
//! what: KeyGenerator

use serde::{Deserialize, Serialize};

/// monotonic per partition key source, snapshotted with the state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyGenerator {
    next: u64,
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl KeyGenerator {
    pub fn next_key(&mut self) -> u64 {
        let key = self.next;
        self.next = self.next.saturating_add(1);
        key
    }

    /// never hand out a key at or below one already used by an explicit command
    pub fn observe(&mut self, key: u64) {
        if key >= self.next {
            self.next = key.saturating_add(1);
        }
    }

    pub fn peek(&self) -> u64 {
        self.next
    }

    /// `u64::MAX` is never handed out, so reaching it means no key is left
    pub fn is_exhausted(&self) -> bool {
        self.next == u64::MAX
    }
}

//! # log
//!
//! why: manage the append-only, position-addressed log that raft replicates
//! relations: written by node.rs / state handlers, persisted by raft-storage's FileLog
//! what: LogEntry, EntryPayload, Log trait, InMemoryLog

use crate::error::StorageError;
use crate::membership::Configuration;
use serde::{Deserialize, Serialize};

/// What a log entry carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPayload {
    /// appended by every new leader so entries of earlier terms can commit
    Initial,
    /// a membership change
    Configuration(Configuration),
    /// an opaque record written by the processing engine
    Record(Vec<u8>),
}

/// A single entry in the replicated log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// The term when this entry was created
    pub term: u64,
    /// The position of this entry in the log (1-based, 0 means "before the first entry")
    pub position: u64,
    pub payload: EntryPayload,
}

impl LogEntry {
    /// Create a new log entry
    pub fn new(term: u64, position: u64, payload: EntryPayload) -> Self {
        Self {
            term,
            position,
            payload,
        }
    }

    /// Shorthand for a record entry
    pub fn record(term: u64, position: u64, data: Vec<u8>) -> Self {
        Self::new(term, position, EntryPayload::Record(data))
    }
}

/// Ordered-append log of one partition.
///
/// Implementations must assign positions contiguously: an appended entry's
/// position is always `last_position() + 1`.
pub trait Log: Send {
    /// append an entry positioned right after the current tail
    fn append(&mut self, entry: LogEntry) -> Result<u64, StorageError>;

    /// read the entry at `position`
    fn read(&self, position: u64) -> Option<LogEntry>;

    /// position of the last entry, 0 when empty
    fn last_position(&self) -> u64;

    /// term of the entry at `position`; position 0 always has term 0
    fn term_at(&self, position: u64) -> Option<u64>;

    /// up to `max` entries starting at `position`
    fn entries_from(&self, position: u64, max: usize) -> Vec<LogEntry>;

    /// drop every entry at or after `position`
    fn truncate_from(&mut self, position: u64) -> Result<(), StorageError>;

    /// term of the last entry, 0 when empty
    fn last_term(&self) -> u64 {
        self.term_at(self.last_position()).unwrap_or(0)
    }
}

/// in-memory log for tests and ephemeral partitions
#[derive(Debug, Default, Clone)]
pub struct InMemoryLog {
    entries: Vec<LogEntry>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// all entries, in position order
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }
}

impl Log for InMemoryLog {
    fn append(&mut self, entry: LogEntry) -> Result<u64, StorageError> {
        let expected = self.last_position() + 1;
        if entry.position != expected {
            return Err(StorageError::NonContiguous {
                position: entry.position,
                expected,
            });
        }
        self.entries.push(entry);
        Ok(expected)
    }

    fn read(&self, position: u64) -> Option<LogEntry> {
        if position == 0 {
            return None;
        }
        self.entries.get(position as usize - 1).cloned()
    }

    fn last_position(&self) -> u64 {
        self.entries.len() as u64
    }

    fn term_at(&self, position: u64) -> Option<u64> {
        if position == 0 {
            return Some(0);
        }
        self.entries.get(position as usize - 1).map(|e| e.term)
    }

    fn entries_from(&self, position: u64, max: usize) -> Vec<LogEntry> {
        let start = position.max(1) as usize - 1;
        self.entries.iter().skip(start).take(max).cloned().collect()
    }

    fn truncate_from(&mut self, position: u64) -> Result<(), StorageError> {
        let keep = position.max(1) as usize - 1;
        self.entries.truncate(keep);
        Ok(())
    }
}

//! # error
//!
//! why: give every failure in the consensus core a typed, matchable shape
//! relations: returned by log.rs / meta.rs implementations, codec.rs and node.rs
//! what: StorageError, ProtocolError, RaftError

use crate::membership::Endpoint;
use thiserror::Error;

/// failure of a durable collaborator (log or meta store)
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("log position {position} is not writable, expected {expected}")]
    NonContiguous { position: u64, expected: u64 },

    #[error("cannot truncate committed position {0}")]
    TruncateCommitted(u64),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// failure to decode a protocol frame
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame of {0} bytes is shorter than the header")]
    Truncated(usize),

    #[error("unknown schema id {0}")]
    UnknownSchema(u16),

    #[error("unknown template id {template_id} for schema {schema_id}")]
    UnknownTemplate { schema_id: u16, template_id: u16 },

    #[error("malformed message body: {0}")]
    Malformed(String),
}

/// errors surfaced by the raft core to its driver
#[derive(Debug, Error)]
pub enum RaftError {
    /// the meta store or log failed; the partition cannot continue safely
    #[error("persistence failure: {0}")]
    Persistence(#[from] StorageError),

    #[error("not the leader, leader is {leader:?}")]
    NotLeader { leader: Option<Endpoint> },

    #[error("raft for partition {0} has stopped after a persistence failure")]
    Stopped(u32),

    #[error("cannot join an empty cluster")]
    EmptyCluster,

    #[error("a membership change is already in progress")]
    ChangeInProgress,

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RaftError>;

//! # error
//!
//! why: one error type for everything a partition can fail with outside of rejections
//! relations: wraps raft-core's RaftError / StorageError, returned by partition.rs and snapshot.rs
//! what: EngineError, Result

use raft_core::{Endpoint, RaftError, StorageError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// the raft core failed; persistence failures stop the partition
    #[error("raft error: {0}")]
    Raft(#[from] RaftError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("record encoding error: {0}")]
    Encoding(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("not the leader of partition {partition_id}, leader is {leader:?}")]
    NotLeader {
        partition_id: u32,
        leader: Option<Endpoint>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// the partition actor is gone; its task queue no longer accepts work
    #[error("partition {0} is closed")]
    Closed(u32),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Encoding(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Storage(StorageError::Io(e))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

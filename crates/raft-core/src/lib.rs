//! # raft-core
//!
//! why: replicate one partition's ordered log with raft and expose a monotonically advancing commit position
//! relations: raft-storage provides durable Log / MetaStore implementations, broker-engine drives RaftNode
//! what: membership, messages and codec, log and meta store abstractions, the raft state machine

pub mod codec;
pub mod config;
mod context;
pub(crate) mod controller;
pub mod error;
pub mod log;
pub mod membership;
pub mod message;
pub mod meta;
pub mod node;
mod state;

pub use config::{RaftConfig, RaftConfigBuilder};
pub use error::{ProtocolError, RaftError, Result, StorageError};
pub use log::{EntryPayload, InMemoryLog, Log, LogEntry};
pub use membership::{Configuration, Endpoint};
pub use message::{Envelope, ErrorCode, RaftMessage};
pub use meta::{InMemoryMetaStore, MetaStore};
pub use node::{NodeState, RaftNode, StateChange, StateListener};

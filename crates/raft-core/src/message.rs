//! # message
//!
//! why: define all raft rpc message types for node communication
//! relations: produced and consumed by the states in state/, framed by codec.rs
//! what: request/response structs, RaftMessage, ErrorCode, Envelope

use crate::log::LogEntry;
use crate::membership::{Configuration, Endpoint};
use serde::{Deserialize, Serialize};

/// pre-vote; carries the candidate's current term, not incremented
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollRequest {
    pub partition_id: u32,
    pub term: u64,
    pub candidate: Endpoint,
    pub last_position: u64,
    pub last_term: u64,
    /// echoed in the response
    #[serde(default)]
    pub round: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResponse {
    pub term: u64,
    pub accepted: bool,
    #[serde(default)]
    pub round: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub partition_id: u32,
    pub term: u64,
    pub candidate: Endpoint,
    pub last_position: u64,
    pub last_term: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: u64,
    pub granted: bool,
}

/// Replicate log entries (also serves as heartbeat when entries is empty)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendRequest {
    pub partition_id: u32,
    pub term: u64,
    pub leader: Endpoint,
    pub previous_position: u64,
    pub previous_term: u64,
    pub commit_position: u64,
    pub entries: Vec<LogEntry>,
}

/// `last_position` is the follower's verified tail; on rejection the leader
/// resumes from right after it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendResponse {
    pub term: u64,
    pub succeeded: bool,
    pub last_position: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureRequest {
    pub partition_id: u32,
    pub term: u64,
    pub leader: Endpoint,
    pub configuration: Configuration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureResponse {
    pub term: u64,
    pub succeeded: bool,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub partition_id: u32,
    pub member: Endpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    pub term: u64,
    pub succeeded: bool,
    /// leader hint when the receiver could not serve the request
    pub leader: Option<Endpoint>,
    pub configuration: Option<Configuration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub partition_id: u32,
    pub member: Endpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveResponse {
    pub term: u64,
    pub succeeded: bool,
    pub leader: Option<Endpoint>,
    pub configuration: Option<Configuration>,
}

/// why a frame could not be served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// schema or template id not understood
    UnsupportedMessage,
    /// header or body could not be decoded
    InvalidMessage,
    /// the receiver does not host the addressed partition
    PartitionNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

/// All possible Raft messages between nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RaftMessage {
    PollRequest(PollRequest),
    PollResponse(PollResponse),
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    AppendRequest(AppendRequest),
    AppendResponse(AppendResponse),
    ConfigureRequest(ConfigureRequest),
    ConfigureResponse(ConfigureResponse),
    JoinRequest(JoinRequest),
    JoinResponse(JoinResponse),
    LeaveRequest(LeaveRequest),
    LeaveResponse(LeaveResponse),
    ErrorResponse(ErrorResponse),
}

impl RaftMessage {
    /// partition a request is addressed to; responses carry none
    pub fn partition_id(&self) -> Option<u32> {
        match self {
            RaftMessage::PollRequest(r) => Some(r.partition_id),
            RaftMessage::VoteRequest(r) => Some(r.partition_id),
            RaftMessage::AppendRequest(r) => Some(r.partition_id),
            RaftMessage::ConfigureRequest(r) => Some(r.partition_id),
            RaftMessage::JoinRequest(r) => Some(r.partition_id),
            RaftMessage::LeaveRequest(r) => Some(r.partition_id),
            _ => None,
        }
    }

    /// term carried by messages that take part in term adoption;
    /// polls and join/leave traffic never move the term
    pub fn term(&self) -> Option<u64> {
        match self {
            RaftMessage::VoteRequest(r) => Some(r.term),
            RaftMessage::VoteResponse(r) => Some(r.term),
            RaftMessage::AppendRequest(r) => Some(r.term),
            RaftMessage::AppendResponse(r) => Some(r.term),
            RaftMessage::ConfigureRequest(r) => Some(r.term),
            RaftMessage::ConfigureResponse(r) => Some(r.term),
            _ => None,
        }
    }

    pub fn is_request(&self) -> bool {
        self.partition_id().is_some()
    }
}

/// a message in flight between two members
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub from: Endpoint,
    pub to: Endpoint,
    pub message: RaftMessage,
}

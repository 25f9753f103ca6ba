//! # codec
//!
//! why: frame raft messages for a transport that only moves bytes
//! relations: used by node.rs receive_frame, encodes message.rs types
//! what: frame header (schema id, template id), encode / decode

use crate::error::ProtocolError;
use crate::message::*;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// schema id of the raft protocol
pub const RAFT_SCHEMA_ID: u16 = 4;

/// header: schema id (u16 LE) followed by template id (u16 LE)
pub const HEADER_LENGTH: usize = 4;

pub mod template {
    pub const POLL_REQUEST: u16 = 1;
    pub const POLL_RESPONSE: u16 = 2;
    pub const VOTE_REQUEST: u16 = 3;
    pub const VOTE_RESPONSE: u16 = 4;
    pub const APPEND_REQUEST: u16 = 5;
    pub const APPEND_RESPONSE: u16 = 6;
    pub const CONFIGURE_REQUEST: u16 = 7;
    pub const CONFIGURE_RESPONSE: u16 = 8;
    pub const JOIN_REQUEST: u16 = 9;
    pub const JOIN_RESPONSE: u16 = 10;
    pub const LEAVE_REQUEST: u16 = 11;
    pub const LEAVE_RESPONSE: u16 = 12;
    pub const ERROR_RESPONSE: u16 = 13;
}

/// template id of a message
pub fn template_id(message: &RaftMessage) -> u16 {
    match message {
        RaftMessage::PollRequest(_) => template::POLL_REQUEST,
        RaftMessage::PollResponse(_) => template::POLL_RESPONSE,
        RaftMessage::VoteRequest(_) => template::VOTE_REQUEST,
        RaftMessage::VoteResponse(_) => template::VOTE_RESPONSE,
        RaftMessage::AppendRequest(_) => template::APPEND_REQUEST,
        RaftMessage::AppendResponse(_) => template::APPEND_RESPONSE,
        RaftMessage::ConfigureRequest(_) => template::CONFIGURE_REQUEST,
        RaftMessage::ConfigureResponse(_) => template::CONFIGURE_RESPONSE,
        RaftMessage::JoinRequest(_) => template::JOIN_REQUEST,
        RaftMessage::JoinResponse(_) => template::JOIN_RESPONSE,
        RaftMessage::LeaveRequest(_) => template::LEAVE_REQUEST,
        RaftMessage::LeaveResponse(_) => template::LEAVE_RESPONSE,
        RaftMessage::ErrorResponse(_) => template::ERROR_RESPONSE,
    }
}

/// encode a message into a frame
pub fn encode(message: &RaftMessage) -> Result<Vec<u8>, ProtocolError> {
    let body = match message {
        RaftMessage::PollRequest(m) => body(m),
        RaftMessage::PollResponse(m) => body(m),
        RaftMessage::VoteRequest(m) => body(m),
        RaftMessage::VoteResponse(m) => body(m),
        RaftMessage::AppendRequest(m) => body(m),
        RaftMessage::AppendResponse(m) => body(m),
        RaftMessage::ConfigureRequest(m) => body(m),
        RaftMessage::ConfigureResponse(m) => body(m),
        RaftMessage::JoinRequest(m) => body(m),
        RaftMessage::JoinResponse(m) => body(m),
        RaftMessage::LeaveRequest(m) => body(m),
        RaftMessage::LeaveResponse(m) => body(m),
        RaftMessage::ErrorResponse(m) => body(m),
    }?;

    let mut frame = Vec::with_capacity(HEADER_LENGTH + body.len());
    frame.extend_from_slice(&RAFT_SCHEMA_ID.to_le_bytes());
    frame.extend_from_slice(&template_id(message).to_le_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// decode a frame into a message
pub fn decode(frame: &[u8]) -> Result<RaftMessage, ProtocolError> {
    if frame.len() < HEADER_LENGTH {
        return Err(ProtocolError::Truncated(frame.len()));
    }
    let schema_id = u16::from_le_bytes([frame[0], frame[1]]);
    let template_id = u16::from_le_bytes([frame[2], frame[3]]);
    if schema_id != RAFT_SCHEMA_ID {
        return Err(ProtocolError::UnknownSchema(schema_id));
    }

    let bytes = &frame[HEADER_LENGTH..];
    let message = match template_id {
        template::POLL_REQUEST => RaftMessage::PollRequest(parse(bytes)?),
        template::POLL_RESPONSE => RaftMessage::PollResponse(parse(bytes)?),
        template::VOTE_REQUEST => RaftMessage::VoteRequest(parse(bytes)?),
        template::VOTE_RESPONSE => RaftMessage::VoteResponse(parse(bytes)?),
        template::APPEND_REQUEST => RaftMessage::AppendRequest(parse(bytes)?),
        template::APPEND_RESPONSE => RaftMessage::AppendResponse(parse(bytes)?),
        template::CONFIGURE_REQUEST => RaftMessage::ConfigureRequest(parse(bytes)?),
        template::CONFIGURE_RESPONSE => RaftMessage::ConfigureResponse(parse(bytes)?),
        template::JOIN_REQUEST => RaftMessage::JoinRequest(parse(bytes)?),
        template::JOIN_RESPONSE => RaftMessage::JoinResponse(parse(bytes)?),
        template::LEAVE_REQUEST => RaftMessage::LeaveRequest(parse(bytes)?),
        template::LEAVE_RESPONSE => RaftMessage::LeaveResponse(parse(bytes)?),
        template::ERROR_RESPONSE => RaftMessage::ErrorResponse(parse(bytes)?),
        _ => {
            return Err(ProtocolError::UnknownTemplate {
                schema_id,
                template_id,
            })
        }
    };
    Ok(message)
}

/// the answer owed to the sender of a frame that could not be decoded
pub fn error_response(error: &ProtocolError) -> ErrorResponse {
    let code = match error {
        ProtocolError::UnknownSchema(_) | ProtocolError::UnknownTemplate { .. } => {
            ErrorCode::UnsupportedMessage
        }
        ProtocolError::Truncated(_) | ProtocolError::Malformed(_) => ErrorCode::InvalidMessage,
    };
    ErrorResponse {
        code,
        message: error.to_string(),
    }
}

fn body<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

fn parse<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

//! # active
//!
//! why: poll, vote, append and configure handling shared by the roles that take part in replication
//! relations: called from follower.rs, candidate.rs and leader.rs
//! what: handle_poll, handle_vote, handle_append, handle_configure

use crate::context::RaftContext;
use crate::error::Result;
use crate::log::EntryPayload;
use crate::message::*;
use tracing::{debug, error, warn};

pub(crate) fn configuration_version(ctx: &RaftContext) -> u64 {
    ctx.configuration.as_ref().map_or(0, |c| c.version)
}

/// pre-vote: grant when the term is not behind, the log is not behind, and
/// no leader was heard from recently
pub(crate) fn handle_poll(ctx: &mut RaftContext, request: PollRequest) -> PollResponse {
    let accepted = request.term >= ctx.term
        && ctx.is_log_up_to_date(request.last_term, request.last_position)
        && !ctx.has_recent_leader();
    debug!(
        partition = ctx.partition_id,
        term = ctx.term,
        candidate = %request.candidate,
        accepted,
        "poll request"
    );
    PollResponse {
        term: ctx.term,
        accepted,
        round: request.round,
    }
}

/// higher terms were adopted before dispatch, so `request.term > ctx.term`
/// is not possible here
pub(crate) fn handle_vote(ctx: &mut RaftContext, request: VoteRequest) -> Result<VoteResponse> {
    if request.term < ctx.term {
        return Ok(VoteResponse {
            term: ctx.term,
            granted: false,
        });
    }

    let free = ctx
        .last_voted_for
        .as_ref()
        .map_or(true, |voted| *voted == request.candidate);
    let granted = free && ctx.is_log_up_to_date(request.last_term, request.last_position);
    if granted {
        ctx.set_last_voted_for(request.candidate.clone())?;
        ctx.reset_election_deadline();
    }
    debug!(
        partition = ctx.partition_id,
        term = ctx.term,
        candidate = %request.candidate,
        granted,
        "vote request"
    );
    Ok(VoteResponse {
        term: ctx.term,
        granted,
    })
}

fn reject_append(ctx: &RaftContext, last_position: u64) -> AppendResponse {
    AppendResponse {
        term: ctx.term,
        succeeded: false,
        last_position,
    }
}

/// follower side of replication
pub(crate) fn handle_append(ctx: &mut RaftContext, request: AppendRequest) -> Result<AppendResponse> {
    if request.term < ctx.term {
        return Ok(reject_append(ctx, ctx.log.last_position()));
    }

    ctx.leader = Some(request.leader.clone());
    ctx.last_contact = Some(ctx.now);
    ctx.reset_election_deadline();

    let last_position = ctx.log.last_position();
    if request.previous_position > last_position {
        debug!(
            partition = ctx.partition_id,
            previous = request.previous_position,
            tail = last_position,
            "append request past our tail"
        );
        return Ok(reject_append(ctx, last_position));
    }
    if ctx.log.term_at(request.previous_position) != Some(request.previous_term) {
        debug!(
            partition = ctx.partition_id,
            previous = request.previous_position,
            "append request term conflict"
        );
        return Ok(reject_append(ctx, request.previous_position.saturating_sub(1)));
    }

    let verified = request.previous_position + request.entries.len() as u64;
    for entry in request.entries {
        let position = entry.position;
        if position <= ctx.log.last_position() {
            if ctx.log.term_at(position) == Some(entry.term) {
                continue;
            }
            if position <= ctx.commit_position {
                error!(
                    partition = ctx.partition_id,
                    position,
                    commit = ctx.commit_position,
                    "leader sent an entry conflicting with a committed one"
                );
                return Ok(reject_append(ctx, ctx.commit_position));
            }
            warn!(partition = ctx.partition_id, position, "truncating divergent entries");
            ctx.log.truncate_from(position)?;
            ctx.rollback_configuration(position)?;
        }
        if position != ctx.log.last_position() + 1 {
            warn!(partition = ctx.partition_id, position, "append request is not contiguous");
            return Ok(reject_append(ctx, ctx.log.last_position()));
        }

        let configuration = match &entry.payload {
            EntryPayload::Configuration(configuration) => Some(configuration.clone()),
            _ => None,
        };
        ctx.log.append(entry)?;
        if let Some(configuration) = configuration {
            ctx.configure(configuration)?;
        }
    }

    ctx.set_commit_position(request.commit_position.min(verified))?;
    Ok(AppendResponse {
        term: ctx.term,
        succeeded: true,
        last_position: verified,
    })
}

pub(crate) fn handle_configure(
    ctx: &mut RaftContext,
    request: ConfigureRequest,
) -> Result<ConfigureResponse> {
    if request.term < ctx.term {
        return Ok(ConfigureResponse {
            term: ctx.term,
            succeeded: false,
            version: configuration_version(ctx),
        });
    }

    ctx.leader = Some(request.leader);
    ctx.last_contact = Some(ctx.now);
    ctx.reset_election_deadline();
    ctx.configure(request.configuration)?;

    Ok(ConfigureResponse {
        term: ctx.term,
        succeeded: true,
        version: configuration_version(ctx),
    })
}

//! # leader
//!
//! why: replicate the log, advance the commit position and serve membership changes
//! relations: replication / configure controllers per member, join / leave answers via context.rs PendingChange
//! what: LeaderState, leave_self

use super::{active, RaftState};
use crate::context::{ChangeReply, PendingChange, RaftContext};
use crate::error::{RaftError, Result};
use crate::log::EntryPayload;
use crate::membership::{Configuration, Endpoint};
use crate::message::*;
use crate::node::NodeState;
use futures::channel::oneshot;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub(crate) struct LeaderState {
    closed: bool,
}

impl LeaderState {
    fn replicate(&mut self, ctx: &mut RaftContext) -> usize {
        let tail = ctx.log.last_position();
        let mut sent = 0;
        for member in ctx.members.iter_mut() {
            // members added by a configuration change start here
            if member.replication.is_closed() {
                member.replication.open(tail);
            }
            if !member.replication.is_due(
                ctx.now,
                tail,
                ctx.config.heartbeat_interval,
                ctx.config.request_timeout,
            ) {
                continue;
            }

            let next = member.replication.next_position().min(tail + 1);
            let previous_position = next - 1;
            let request = AppendRequest {
                partition_id: ctx.partition_id,
                term: ctx.term,
                leader: ctx.local.clone(),
                previous_position,
                previous_term: ctx.log.term_at(previous_position).unwrap_or(0),
                commit_position: ctx.commit_position,
                entries: ctx.log.entries_from(next, ctx.config.max_append_entries),
            };
            member.replication.sent(ctx.now);
            ctx.outbox.push(Envelope {
                from: ctx.local.clone(),
                to: member.endpoint.clone(),
                message: RaftMessage::AppendRequest(request),
            });
            sent += 1;
        }
        sent
    }

    fn push_configuration(&mut self, ctx: &mut RaftContext) -> usize {
        let Some(configuration) = ctx.configuration.clone() else {
            return 0;
        };
        let mut sent = 0;
        for member in ctx.members.iter_mut() {
            if member.configure.is_closed() {
                member.configure.open();
            }
            if !member
                .configure
                .is_due(ctx.now, configuration.version, ctx.config.request_timeout)
            {
                continue;
            }
            member.configure.sent(ctx.now);
            ctx.outbox.push(Envelope {
                from: ctx.local.clone(),
                to: member.endpoint.clone(),
                message: RaftMessage::ConfigureRequest(ConfigureRequest {
                    partition_id: ctx.partition_id,
                    term: ctx.term,
                    leader: ctx.local.clone(),
                    configuration: configuration.clone(),
                }),
            });
            sent += 1;
        }
        sent
    }

    /// the quorum-th highest acknowledged position commits once its entry
    /// belongs to the current term; our own tail only counts while we are
    /// part of the configuration
    fn update_commit(&mut self, ctx: &mut RaftContext) -> Result<()> {
        let mut positions: Vec<u64> = ctx
            .members
            .iter()
            .map(|m| m.replication.match_position())
            .collect();
        let quorum = if ctx.is_voting_member() {
            positions.push(ctx.log.last_position());
            ctx.quorum()
        } else {
            // leaving: a majority of the remaining members decides
            ctx.members.len() / 2 + 1
        };
        positions.sort_unstable_by(|a, b| b.cmp(a));

        let Some(&candidate) = positions.get(quorum - 1) else {
            return Ok(());
        };
        if candidate > ctx.commit_position && ctx.log.term_at(candidate) == Some(ctx.term) {
            ctx.set_commit_position(candidate)?;
            complete_change(ctx);
        }
        Ok(())
    }
}

/// answer whoever waits for a membership change that is now committed
fn complete_change(ctx: &mut RaftContext) {
    let committed = ctx
        .pending_change
        .as_ref()
        .map_or(false, |change| change.position <= ctx.commit_position);
    if !committed {
        return;
    }
    let Some(change) = ctx.pending_change.take() else {
        return;
    };

    info!(partition = ctx.partition_id, position = change.position, "membership change committed");
    let configuration = ctx.configuration.clone();
    match change.reply {
        ChangeReply::Join(to) => {
            let response = JoinResponse {
                term: ctx.term,
                succeeded: true,
                leader: Some(ctx.local.clone()),
                configuration,
            };
            ctx.send(to, RaftMessage::JoinResponse(response));
        }
        ChangeReply::Leave(to) => {
            let response = LeaveResponse {
                term: ctx.term,
                succeeded: true,
                leader: Some(ctx.local.clone()),
                configuration,
            };
            ctx.send(to, RaftMessage::LeaveResponse(response));
        }
        ChangeReply::SelfLeave(done) => {
            let _ = done.send(());
            ctx.request_transition(NodeState::Inactive);
        }
    }
}

/// whether a new configuration entry may be appended now
fn change_allowed(ctx: &RaftContext) -> bool {
    ctx.pending_change.is_none()
        && ctx
            .configuration
            .as_ref()
            .map_or(true, |c| c.position <= ctx.commit_position)
}

fn append_configuration(
    ctx: &mut RaftContext,
    change: impl FnOnce(&Configuration, u64) -> Configuration,
) -> Result<u64> {
    let position = ctx.log.last_position() + 1;
    let current = ctx
        .configuration
        .clone()
        .unwrap_or_else(|| Configuration::new(0, 0, vec![ctx.local.clone()]));
    let next = change(&current, position);
    ctx.append_entry(EntryPayload::Configuration(next.clone()))?;
    ctx.configure(next)?;
    Ok(position)
}

fn join_rejected(ctx: &RaftContext) -> JoinResponse {
    JoinResponse {
        term: ctx.term,
        succeeded: false,
        leader: Some(ctx.local.clone()),
        configuration: None,
    }
}

fn leave_response(ctx: &RaftContext, succeeded: bool) -> LeaveResponse {
    LeaveResponse {
        term: ctx.term,
        succeeded,
        leader: Some(ctx.local.clone()),
        configuration: if succeeded {
            ctx.configuration.clone()
        } else {
            None
        },
    }
}

/// a leader leaving commits its own removal before going inactive
pub(crate) fn leave_self(ctx: &mut RaftContext, done: oneshot::Sender<()>) -> Result<()> {
    if !change_allowed(ctx) {
        return Err(RaftError::ChangeInProgress);
    }
    let local = ctx.local.clone();
    let position = append_configuration(ctx, |current, position| {
        current.without_member(position, &local)
    })?;
    info!(partition = ctx.partition_id, position, "leader is leaving the cluster");
    ctx.pending_change = Some(PendingChange {
        position,
        reply: ChangeReply::SelfLeave(done),
    });
    Ok(())
}

impl RaftState for LeaderState {
    fn kind(&self) -> NodeState {
        NodeState::Leader
    }

    fn open(&mut self, ctx: &mut RaftContext) -> Result<()> {
        self.closed = false;
        ctx.leader = Some(ctx.local.clone());
        ctx.pending_change = None;
        let position = ctx.append_entry(EntryPayload::Initial)?;
        info!(partition = ctx.partition_id, term = ctx.term, position, "became leader");

        let tail = ctx.log.last_position();
        for member in ctx.members.iter_mut() {
            member.replication.open(tail);
            member.configure.open();
        }
        // a single-member cluster commits right away
        self.update_commit(ctx)
    }

    fn close(&mut self, ctx: &mut RaftContext) {
        for member in ctx.members.iter_mut() {
            member.replication.close();
            member.configure.close();
        }
        // waiting joiners and leavers retry against the next leader
        ctx.pending_change = None;
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn do_work(&mut self, ctx: &mut RaftContext) -> Result<usize> {
        let mut work = self.replicate(ctx);
        work += self.push_configuration(ctx);
        self.update_commit(ctx)?;
        Ok(work)
    }

    fn append(&mut self, ctx: &mut RaftContext, _request: AppendRequest) -> Result<AppendResponse> {
        Ok(AppendResponse {
            term: ctx.term,
            succeeded: false,
            last_position: ctx.log.last_position(),
        })
    }

    fn appended(&mut self, ctx: &mut RaftContext, from: &Endpoint, response: AppendResponse) -> Result<()> {
        if response.term != ctx.term {
            return Ok(());
        }
        let Some(member) = ctx.member_mut(from) else {
            return Ok(());
        };
        member
            .replication
            .on_response(response.succeeded, response.last_position);
        if !response.succeeded {
            debug!(
                partition = ctx.partition_id,
                member = %from,
                tail = response.last_position,
                "append rejected, resuming from follower tail"
            );
        }
        self.update_commit(ctx)
    }

    fn poll(&mut self, ctx: &mut RaftContext, request: PollRequest) -> Result<PollResponse> {
        Ok(PollResponse {
            term: ctx.term,
            accepted: false,
            round: request.round,
        })
    }

    fn vote(&mut self, ctx: &mut RaftContext, request: VoteRequest) -> Result<VoteResponse> {
        active::handle_vote(ctx, request)
    }

    fn configured(
        &mut self,
        ctx: &mut RaftContext,
        from: &Endpoint,
        response: ConfigureResponse,
    ) -> Result<()> {
        if response.term != ctx.term {
            return Ok(());
        }
        if let Some(member) = ctx.member_mut(from) {
            member.configure.on_response(response.succeeded, response.version);
        }
        Ok(())
    }

    fn join(
        &mut self,
        ctx: &mut RaftContext,
        from: &Endpoint,
        request: JoinRequest,
    ) -> Result<Option<JoinResponse>> {
        if let Some(current) = ctx.configuration.clone() {
            if current.contains(&request.member) {
                if current.position <= ctx.commit_position {
                    return Ok(Some(JoinResponse {
                        term: ctx.term,
                        succeeded: true,
                        leader: Some(ctx.local.clone()),
                        configuration: Some(current),
                    }));
                }
                if ctx.pending_change.is_none() {
                    // already appended, answer once it commits
                    ctx.pending_change = Some(PendingChange {
                        position: current.position,
                        reply: ChangeReply::Join(from.clone()),
                    });
                    return Ok(None);
                }
                return Ok(Some(join_rejected(ctx)));
            }
        }
        if !change_allowed(ctx) {
            debug!(partition = ctx.partition_id, member = %request.member, "join rejected, change in progress");
            return Ok(Some(join_rejected(ctx)));
        }

        let member = request.member.clone();
        let position = append_configuration(ctx, |current, position| {
            current.with_member(position, &member)
        })?;
        info!(partition = ctx.partition_id, member = %request.member, position, "member joining");
        ctx.pending_change = Some(PendingChange {
            position,
            reply: ChangeReply::Join(from.clone()),
        });
        Ok(None)
    }

    fn leave(
        &mut self,
        ctx: &mut RaftContext,
        from: &Endpoint,
        request: LeaveRequest,
    ) -> Result<Option<LeaveResponse>> {
        let is_member = ctx
            .configuration
            .as_ref()
            .map_or(false, |c| c.contains(&request.member));
        if !is_member {
            let committed = ctx
                .configuration
                .as_ref()
                .map_or(true, |c| c.position <= ctx.commit_position);
            return Ok(Some(leave_response(ctx, committed)));
        }
        if !change_allowed(ctx) {
            return Ok(Some(leave_response(ctx, false)));
        }

        let member = request.member.clone();
        let position = append_configuration(ctx, |current, position| {
            current.without_member(position, &member)
        })?;
        info!(partition = ctx.partition_id, member = %request.member, position, "member leaving");
        ctx.pending_change = Some(PendingChange {
            position,
            reply: ChangeReply::Leave(from.clone()),
        });
        Ok(None)
    }
}

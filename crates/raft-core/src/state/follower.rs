//! # follower
//!
//! why: accept the leader's log and notice when the leader is gone
//! relations: uses active.rs handlers, polls through controller/poll.rs, hands over to candidate.rs
//! what: FollowerState

use super::{active, RaftState};
use crate::context::RaftContext;
use crate::error::Result;
use crate::membership::Endpoint;
use crate::message::*;
use crate::node::NodeState;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub(crate) struct FollowerState {
    closed: bool,
    polling: bool,
}

impl FollowerState {
    /// a poll round asks every member at our current term whether an
    /// election would stand a chance
    fn start_poll(&mut self, ctx: &mut RaftContext) {
        info!(partition = ctx.partition_id, term = ctx.term, "election timeout, polling members");
        self.polling = true;
        let term = ctx.term;
        for member in ctx.members.iter_mut() {
            member.poll.open(term);
        }
        self.check_poll_quorum(ctx);
    }

    fn stop_poll(&mut self, ctx: &mut RaftContext) {
        if !self.polling {
            return;
        }
        self.polling = false;
        for member in ctx.members.iter_mut() {
            member.poll.close();
        }
    }

    fn check_poll_quorum(&mut self, ctx: &mut RaftContext) {
        let accepted = 1 + ctx.members.iter().filter(|m| m.poll.is_accepted()).count();
        if accepted >= ctx.quorum() {
            debug!(partition = ctx.partition_id, accepted, "poll quorum reached");
            self.stop_poll(ctx);
            ctx.request_transition(NodeState::Candidate);
        }
    }

    fn send_polls(&mut self, ctx: &mut RaftContext) -> usize {
        let last_position = ctx.log.last_position();
        let last_term = ctx.log.last_term();
        let mut sent = 0;
        for member in ctx.members.iter_mut() {
            if member.poll.is_due(ctx.now, ctx.config.request_timeout) {
                member.poll.sent(ctx.now);
                let request = PollRequest {
                    partition_id: ctx.partition_id,
                    term: ctx.term,
                    candidate: ctx.local.clone(),
                    last_position,
                    last_term,
                    round: member.poll.round(),
                };
                ctx.outbox.push(Envelope {
                    from: ctx.local.clone(),
                    to: member.endpoint.clone(),
                    message: RaftMessage::PollRequest(request),
                });
                sent += 1;
            }
        }
        sent
    }
}

impl RaftState for FollowerState {
    fn kind(&self) -> NodeState {
        NodeState::Follower
    }

    fn open(&mut self, ctx: &mut RaftContext) -> Result<()> {
        self.closed = false;
        self.polling = false;
        ctx.reset_election_deadline();
        Ok(())
    }

    fn close(&mut self, ctx: &mut RaftContext) {
        self.stop_poll(ctx);
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn do_work(&mut self, ctx: &mut RaftContext) -> Result<usize> {
        let mut work = 0;
        if ctx.election_timed_out() {
            ctx.reset_election_deadline();
            self.stop_poll(ctx);
            // members that are not part of the configuration never start elections
            if ctx.is_voting_member() {
                self.start_poll(ctx);
                work += 1;
            }
        }
        if self.polling {
            work += self.send_polls(ctx);
        }
        Ok(work)
    }

    fn append(&mut self, ctx: &mut RaftContext, request: AppendRequest) -> Result<AppendResponse> {
        let response = active::handle_append(ctx, request)?;
        if ctx.has_recent_leader() {
            self.stop_poll(ctx);
        }
        Ok(response)
    }

    fn poll(&mut self, ctx: &mut RaftContext, request: PollRequest) -> Result<PollResponse> {
        Ok(active::handle_poll(ctx, request))
    }

    fn polled(&mut self, ctx: &mut RaftContext, from: &Endpoint, response: PollResponse) -> Result<()> {
        if !self.polling {
            return Ok(());
        }
        let fresh = match ctx.member_mut(from) {
            Some(member) => member.poll.on_response(response.round, response.accepted),
            None => false,
        };
        if fresh {
            self.check_poll_quorum(ctx);
        }
        Ok(())
    }

    fn vote(&mut self, ctx: &mut RaftContext, request: VoteRequest) -> Result<VoteResponse> {
        active::handle_vote(ctx, request)
    }

    fn configure(
        &mut self,
        ctx: &mut RaftContext,
        request: ConfigureRequest,
    ) -> Result<ConfigureResponse> {
        active::handle_configure(ctx, request)
    }
}

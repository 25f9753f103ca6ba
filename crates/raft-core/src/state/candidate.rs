//! # candidate
//!
//! why: run an election round after a successful poll
//! relations: uses active.rs handlers, votes through controller/vote.rs, hands over to leader.rs
//! what: CandidateState

use super::{active, RaftState};
use crate::context::RaftContext;
use crate::error::Result;
use crate::membership::Endpoint;
use crate::message::*;
use crate::node::NodeState;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub(crate) struct CandidateState {
    closed: bool,
}

impl CandidateState {
    fn start_election(&mut self, ctx: &mut RaftContext) -> Result<()> {
        let term = ctx.term + 1;
        ctx.set_term(term)?;
        ctx.set_last_voted_for(ctx.local.clone())?;
        ctx.reset_election_deadline();
        info!(partition = ctx.partition_id, term, "starting election");

        for member in ctx.members.iter_mut() {
            member.vote.open(term);
        }
        self.check_vote_quorum(ctx);
        Ok(())
    }

    fn check_vote_quorum(&mut self, ctx: &mut RaftContext) {
        let granted = 1 + ctx.members.iter().filter(|m| m.vote.is_granted()).count();
        if granted >= ctx.quorum() {
            debug!(partition = ctx.partition_id, term = ctx.term, granted, "vote quorum reached");
            ctx.request_transition(NodeState::Leader);
        }
    }

    fn send_votes(&mut self, ctx: &mut RaftContext) -> usize {
        let request = VoteRequest {
            partition_id: ctx.partition_id,
            term: ctx.term,
            candidate: ctx.local.clone(),
            last_position: ctx.log.last_position(),
            last_term: ctx.log.last_term(),
        };
        let mut sent = 0;
        for member in ctx.members.iter_mut() {
            if member.vote.is_due(ctx.now, ctx.config.request_timeout) {
                member.vote.sent(ctx.now);
                ctx.outbox.push(Envelope {
                    from: ctx.local.clone(),
                    to: member.endpoint.clone(),
                    message: RaftMessage::VoteRequest(request.clone()),
                });
                sent += 1;
            }
        }
        sent
    }
}

impl RaftState for CandidateState {
    fn kind(&self) -> NodeState {
        NodeState::Candidate
    }

    fn open(&mut self, ctx: &mut RaftContext) -> Result<()> {
        self.closed = false;
        self.start_election(ctx)
    }

    fn close(&mut self, ctx: &mut RaftContext) {
        for member in ctx.members.iter_mut() {
            member.vote.close();
        }
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn do_work(&mut self, ctx: &mut RaftContext) -> Result<usize> {
        let mut work = 0;
        if ctx.election_timed_out() && ctx.pending_transition.is_none() {
            debug!(partition = ctx.partition_id, term = ctx.term, "election round timed out");
            self.start_election(ctx)?;
            work += 1;
        }
        work += self.send_votes(ctx);
        Ok(work)
    }

    fn poll(&mut self, ctx: &mut RaftContext, request: PollRequest) -> Result<PollResponse> {
        Ok(active::handle_poll(ctx, request))
    }

    fn vote(&mut self, ctx: &mut RaftContext, request: VoteRequest) -> Result<VoteResponse> {
        active::handle_vote(ctx, request)
    }

    fn voted(&mut self, ctx: &mut RaftContext, from: &Endpoint, response: VoteResponse) -> Result<()> {
        let fresh = match ctx.member_mut(from) {
            Some(member) => member.vote.on_response(response.term, response.granted),
            None => false,
        };
        if fresh {
            self.check_vote_quorum(ctx);
        }
        Ok(())
    }
}

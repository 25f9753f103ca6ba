//! # state
//!
//! why: give each raft role its own handler set instead of one big match on the role
//! relations: node.rs holds exactly one boxed state and swaps it on transition
//! what: RaftState trait with neutral defaults, state factory

mod active;
mod candidate;
mod follower;
mod inactive;
pub(crate) mod leader;

use crate::context::RaftContext;
use crate::error::Result;
use crate::membership::Endpoint;
use crate::message::*;
use crate::node::NodeState;

pub(crate) use candidate::CandidateState;
pub(crate) use follower::FollowerState;
pub(crate) use inactive::InactiveState;
pub(crate) use leader::LeaderState;

/// Handlers of one raft role.
///
/// Every handler a role does not care about answers neutrally: requests are
/// rejected with the local term, responses are dropped.
pub(crate) trait RaftState: Send {
    fn kind(&self) -> NodeState;

    fn open(&mut self, ctx: &mut RaftContext) -> Result<()>;

    fn close(&mut self, ctx: &mut RaftContext);

    fn is_closed(&self) -> bool;

    /// timers and outgoing requests; returns the amount of work done
    fn do_work(&mut self, ctx: &mut RaftContext) -> Result<usize>;

    fn append(&mut self, ctx: &mut RaftContext, _request: AppendRequest) -> Result<AppendResponse> {
        Ok(AppendResponse {
            term: ctx.term,
            succeeded: false,
            last_position: ctx.log.last_position(),
        })
    }

    fn appended(
        &mut self,
        _ctx: &mut RaftContext,
        _from: &Endpoint,
        _response: AppendResponse,
    ) -> Result<()> {
        Ok(())
    }

    fn poll(&mut self, ctx: &mut RaftContext, request: PollRequest) -> Result<PollResponse> {
        Ok(PollResponse {
            term: ctx.term,
            accepted: false,
            round: request.round,
        })
    }

    fn polled(
        &mut self,
        _ctx: &mut RaftContext,
        _from: &Endpoint,
        _response: PollResponse,
    ) -> Result<()> {
        Ok(())
    }

    fn vote(&mut self, ctx: &mut RaftContext, _request: VoteRequest) -> Result<VoteResponse> {
        Ok(VoteResponse {
            term: ctx.term,
            granted: false,
        })
    }

    fn voted(
        &mut self,
        _ctx: &mut RaftContext,
        _from: &Endpoint,
        _response: VoteResponse,
    ) -> Result<()> {
        Ok(())
    }

    fn configure(
        &mut self,
        ctx: &mut RaftContext,
        _request: ConfigureRequest,
    ) -> Result<ConfigureResponse> {
        Ok(ConfigureResponse {
            term: ctx.term,
            succeeded: false,
            version: active::configuration_version(ctx),
        })
    }

    fn configured(
        &mut self,
        _ctx: &mut RaftContext,
        _from: &Endpoint,
        _response: ConfigureResponse,
    ) -> Result<()> {
        Ok(())
    }

    /// `None` defers the answer until the change commits
    fn join(
        &mut self,
        ctx: &mut RaftContext,
        _from: &Endpoint,
        _request: JoinRequest,
    ) -> Result<Option<JoinResponse>> {
        Ok(Some(JoinResponse {
            term: ctx.term,
            succeeded: false,
            leader: ctx.leader.clone(),
            configuration: None,
        }))
    }

    fn leave(
        &mut self,
        ctx: &mut RaftContext,
        _from: &Endpoint,
        _request: LeaveRequest,
    ) -> Result<Option<LeaveResponse>> {
        Ok(Some(LeaveResponse {
            term: ctx.term,
            succeeded: false,
            leader: ctx.leader.clone(),
            configuration: None,
        }))
    }
}

pub(crate) fn create(kind: NodeState) -> Box<dyn RaftState> {
    match kind {
        NodeState::Inactive => Box::new(InactiveState::default()),
        NodeState::Follower => Box::new(FollowerState::default()),
        NodeState::Candidate => Box::new(CandidateState::default()),
        NodeState::Leader => Box::new(LeaderState::default()),
    }
}

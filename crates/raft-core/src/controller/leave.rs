//! # leave controller
//!
//! why: remove this node from the replication group before shutting it down
//! relations: owned by node.rs, answered by state/leader.rs leave handling
//! what: LeaveController

use crate::context::RaftContext;
use crate::membership::Endpoint;
use crate::message::{LeaveRequest, LeaveResponse, RaftMessage};
use crate::node::NodeState;
use futures::channel::oneshot;
use tracing::{debug, info};

/// sends leave requests to the leader (or any member when none is known)
/// until the removal is committed, then requests the inactive state
#[derive(Debug)]
pub struct LeaveController {
    cursor: usize,
    target: Option<Endpoint>,
    sent_at: Option<u64>,
    done: Option<oneshot::Sender<()>>,
}

impl LeaveController {
    pub fn new(done: oneshot::Sender<()>) -> Self {
        Self {
            cursor: 0,
            target: None,
            sent_at: None,
            done: Some(done),
        }
    }

    pub fn close(&mut self) {
        self.done = None;
    }

    pub fn is_closed(&self) -> bool {
        self.done.is_none()
    }

    pub(crate) fn do_work(&mut self, ctx: &mut RaftContext) -> usize {
        if self.is_closed() {
            return 0;
        }
        let due = self
            .sent_at
            .map_or(true, |sent| ctx.now.saturating_sub(sent) >= ctx.config.request_timeout);
        if !due {
            return 0;
        }
        let target = match ctx.leader.clone().filter(|leader| *leader != ctx.local) {
            Some(leader) => Some(leader),
            None => self.next_member(ctx),
        };
        let Some(target) = target else {
            return 0;
        };
        debug!(partition = ctx.partition_id, target = %target, "sending leave request");
        let request = RaftMessage::LeaveRequest(LeaveRequest {
            partition_id: ctx.partition_id,
            member: ctx.local.clone(),
        });
        self.target = Some(target.clone());
        ctx.send(target, request);
        self.sent_at = Some(ctx.now);
        1
    }

    pub(crate) fn on_response(
        &mut self,
        ctx: &mut RaftContext,
        from: &Endpoint,
        response: LeaveResponse,
    ) {
        if self.is_closed() || self.target.as_ref() != Some(from) {
            return;
        }
        if response.succeeded {
            info!(partition = ctx.partition_id, "left cluster");
            self.complete(ctx);
            return;
        }
        if let Some(leader) = response.leader.filter(|leader| *leader != ctx.local) {
            ctx.leader = Some(leader);
            self.sent_at = None;
        }
    }

    /// removal observed; resolve the caller and go inactive
    pub(crate) fn complete(&mut self, ctx: &mut RaftContext) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
        ctx.request_transition(NodeState::Inactive);
    }

    fn next_member(&mut self, ctx: &RaftContext) -> Option<Endpoint> {
        if ctx.members.is_empty() {
            return None;
        }
        self.cursor = (self.cursor + 1) % ctx.members.len();
        Some(ctx.members[self.cursor].endpoint.clone())
    }
}

//! # inactive
//!
//! why: the role of a node that is not (or no longer) part of a replication group
//! relations: initial state of node.rs, entered after leaving or a persistence failure
//! what: InactiveState, every handler neutral

use super::RaftState;
use crate::context::RaftContext;
use crate::error::Result;
use crate::node::NodeState;

#[derive(Debug, Default)]
pub(crate) struct InactiveState {
    closed: bool,
}

impl RaftState for InactiveState {
    fn kind(&self) -> NodeState {
        NodeState::Inactive
    }

    fn open(&mut self, ctx: &mut RaftContext) -> Result<()> {
        self.closed = false;
        ctx.leader = None;
        Ok(())
    }

    fn close(&mut self, _ctx: &mut RaftContext) {
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn do_work(&mut self, _ctx: &mut RaftContext) -> Result<usize> {
        Ok(0)
    }
}

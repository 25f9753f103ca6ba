//! # join controller
//!
//! why: get a fresh node admitted into an existing replication group
//! relations: owned by node.rs, answered by state/leader.rs join handling
//! what: JoinController

use crate::context::RaftContext;
use crate::error::Result;
use crate::membership::{Configuration, Endpoint};
use crate::message::{JoinRequest, JoinResponse, RaftMessage};
use futures::channel::oneshot;
use tracing::{debug, info};

/// asks known members in turn, following leader hints, until one admits us
#[derive(Debug)]
pub struct JoinController {
    targets: Vec<Endpoint>,
    cursor: usize,
    target: Option<Endpoint>,
    sent_at: Option<u64>,
    done: Option<oneshot::Sender<Configuration>>,
}

impl JoinController {
    pub fn new(targets: Vec<Endpoint>, done: oneshot::Sender<Configuration>) -> Self {
        let target = targets.first().cloned();
        Self {
            targets,
            cursor: 0,
            target,
            sent_at: None,
            done: Some(done),
        }
    }

    /// dropping the sender cancels the caller's receiver
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
        if self.sent_at.is_some() {
            // the last target stayed silent
            self.advance();
        }
        let Some(target) = self.target.clone() else {
            return 0;
        };
        debug!(partition = ctx.partition_id, target = %target, "sending join request");
        let request = RaftMessage::JoinRequest(JoinRequest {
            partition_id: ctx.partition_id,
            member: ctx.local.clone(),
        });
        ctx.send(target, request);
        self.sent_at = Some(ctx.now);
        1
    }

    pub(crate) fn on_response(
        &mut self,
        ctx: &mut RaftContext,
        from: &Endpoint,
        response: JoinResponse,
    ) -> Result<()> {
        if self.is_closed() || self.target.as_ref() != Some(from) {
            return Ok(());
        }
        self.sent_at = None;

        if response.succeeded {
            if let Some(configuration) = response.configuration {
                ctx.configure(configuration)?;
            }
            let configuration = ctx.configuration.clone().unwrap_or_else(|| {
                Configuration::new(0, 0, vec![ctx.local.clone()])
            });
            info!(partition = ctx.partition_id, version = configuration.version, "joined cluster");
            if let Some(done) = self.done.take() {
                // the caller may have dropped its receiver
                let _ = done.send(configuration);
            }
            return Ok(());
        }

        match response.leader.filter(|leader| *leader != ctx.local) {
            Some(leader) => self.target = Some(leader),
            None => {
                // nobody knows a leader yet, ask the next member after a full timeout
                self.sent_at = Some(ctx.now);
            }
        }
        Ok(())
    }

    fn advance(&mut self) {
        if self.targets.is_empty() {
            self.target = None;
            return;
        }
        self.cursor = (self.cursor + 1) % self.targets.len();
        self.target = Some(self.targets[self.cursor].clone());
    }
}

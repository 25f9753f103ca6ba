//! # message
//!
//! why: publish messages, correlate them to waiting subscriptions and drop them once expired
//! relations: MessageState and SubscriptionState, correlation continues in processor/subscription.rs
//! what: PublishMessageProcessor, DeleteMessageProcessor, register

use super::{CommandControl, CommandProcessor, ProcessorRegistry, RecordWriter};
use crate::record::{Intent, Record, RecordType, RecordValue, RejectionType, SubscriptionRecord};
use crate::state::PartitionState;

pub(super) fn register(registry: ProcessorRegistry) -> ProcessorRegistry {
    registry
        .on_command(RecordType::Message, Intent::Publish, PublishMessageProcessor)
        .on_command(RecordType::Message, Intent::Delete, DeleteMessageProcessor)
}

struct PublishMessageProcessor;

impl CommandProcessor for PublishMessageProcessor {
    fn on_command(&mut self, command: &Record, state: &mut PartitionState, control: &mut CommandControl, writer: &mut RecordWriter) {
        let Some(message) = command.value.as_message() else {
            return;
        };
        if !message.message_id.is_empty()
            && state
                .messages
                .exists(&message.name, &message.correlation_key, &message.message_id)
        {
            control.reject(
                RejectionType::InvalidArgument,
                format!("message with id '{}' is already published", message.message_id),
            );
            return;
        }

        let deadline = match command.timestamp.checked_add(message.time_to_live) {
            Some(deadline) => deadline,
            None => {
                control.reject(
                    RejectionType::InvalidArgument,
                    format!(
                        "Expected message time to live to end before {}, but it was {}",
                        u64::MAX,
                        message.time_to_live
                    ),
                );
                return;
            }
        };

        let key = control.accept(Intent::Published, command.value.clone());
        if message.time_to_live > 0 {
            state.messages.put(key, message.clone(), deadline);
        }

        let waiting: Vec<SubscriptionRecord> = state
            .subscriptions
            .opened_for(&message.name, &message.correlation_key)
            .into_iter()
            .map(|s| s.record.clone())
            .collect();
        for subscription in waiting {
            let correlation = SubscriptionRecord {
                payload: message.payload.clone(),
                ..subscription
            };
            writer.append_command(
                correlation.element_instance_key,
                Intent::Correlate,
                RecordValue::WorkflowInstanceSubscription(correlation),
            );
        }
    }
}

struct DeleteMessageProcessor;

impl CommandProcessor for DeleteMessageProcessor {
    fn on_command(&mut self, command: &Record, state: &mut PartitionState, control: &mut CommandControl, _writer: &mut RecordWriter) {
        match state.messages.remove(command.key) {
            Some(stored) => {
                control.accept(Intent::Deleted, RecordValue::Message(stored.message));
            }
            None => control.reject(
                RejectionType::NotFound,
                format!(
                    "Expected to delete message with key {}, but no such message was found",
                    command.key
                ),
            ),
        }
    }
}

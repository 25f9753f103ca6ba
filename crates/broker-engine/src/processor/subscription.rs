//! # subscription
//!
//! why: open, correlate and close the subscriptions of message catch events
//! relations: SubscriptionState and MessageState, continues elements through processor/bpmn.rs
//! what: OpenSubscriptionProcessor, CorrelateSubscriptionProcessor, CloseSubscriptionProcessor, register

use super::{merge_payload, ProcessorRegistry, RecordProcessor, RecordWriter};
use crate::record::{Intent, Record, RecordType, RecordValue, RejectionType, SubscriptionRecord};
use crate::state::PartitionState;

pub(super) fn register(registry: ProcessorRegistry) -> ProcessorRegistry {
    registry
        .on_record(RecordType::WorkflowInstanceSubscription, Intent::Open, OpenSubscriptionProcessor)
        .on_record(
            RecordType::WorkflowInstanceSubscription,
            Intent::Correlate,
            CorrelateSubscriptionProcessor,
        )
        .on_record(RecordType::WorkflowInstanceSubscription, Intent::Close, CloseSubscriptionProcessor)
}

struct OpenSubscriptionProcessor;

impl RecordProcessor for OpenSubscriptionProcessor {
    fn process_record(&mut self, record: &Record, state: &mut PartitionState, writer: &mut RecordWriter) {
        let Some(request) = record.value.as_subscription() else {
            return;
        };
        let element_key = request.element_instance_key;
        let name = &request.message_name;

        let rejection = match state.subscriptions.get(element_key, name) {
            None => Some((
                RejectionType::NotFound,
                format!(
                    "Expected to open pre-existing workflow instance subscription with element {} and message {}, but none was found",
                    element_key, name
                ),
            )),
            Some(subscription) if !subscription.is_opening() => {
                let lifecycle = if subscription.is_closing() { "closing" } else { "opened" };
                Some((
                    RejectionType::InvalidState,
                    format!(
                        "Expected to complete opening workflow instance subscription with element {} and message {}, but it is already {}",
                        element_key, name, lifecycle
                    ),
                ))
            }
            Some(_) => None,
        };
        if let Some((rejection_type, reason)) = rejection {
            writer.append_rejection(record, rejection_type, reason);
            return;
        }

        state.subscriptions.open(element_key, name);
        writer.append_follow_up_event(record.key, Intent::Opened, record.value.clone());

        // a message published before the subscription opened is still buffered
        if let Some((_, stored)) =
            state
                .messages
                .first_alive(name, &request.correlation_key, record.timestamp)
        {
            let correlation = SubscriptionRecord {
                payload: stored.message.payload.clone(),
                ..request.clone()
            };
            writer.append_command(
                record.key,
                Intent::Correlate,
                RecordValue::WorkflowInstanceSubscription(correlation),
            );
        }
    }
}

struct CorrelateSubscriptionProcessor;

impl RecordProcessor for CorrelateSubscriptionProcessor {
    fn process_record(&mut self, record: &Record, state: &mut PartitionState, writer: &mut RecordWriter) {
        let Some(request) = record.value.as_subscription() else {
            return;
        };
        let element_key = request.element_instance_key;
        let name = &request.message_name;

        let opened = match state.subscriptions.get(element_key, name) {
            None => {
                writer.append_rejection(
                    record,
                    RejectionType::NotFound,
                    format!(
                        "Expected to correlate workflow instance subscription with element {} and message {}, but none was found",
                        element_key, name
                    ),
                );
                return;
            }
            Some(subscription) => subscription.is_opened(),
        };
        if !opened {
            writer.append_rejection(
                record,
                RejectionType::InvalidState,
                format!(
                    "Expected to correlate workflow instance subscription with element {} and message {}, but it is not opened",
                    element_key, name
                ),
            );
            return;
        }

        state.subscriptions.remove(element_key, name);
        writer.append_follow_up_event(record.key, Intent::Correlated, record.value.clone());

        if let Some(instance) = state.elements.get(element_key) {
            if instance.is_active() {
                let mut value = instance.value.clone();
                merge_payload(&mut value.payload, &request.payload);
                writer.append_follow_up_event(
                    element_key,
                    Intent::ElementCompleting,
                    RecordValue::WorkflowInstance(value),
                );
            }
        }
    }
}

struct CloseSubscriptionProcessor;

impl RecordProcessor for CloseSubscriptionProcessor {
    fn process_record(&mut self, record: &Record, state: &mut PartitionState, writer: &mut RecordWriter) {
        let Some(request) = record.value.as_subscription() else {
            return;
        };
        let element_key = request.element_instance_key;
        match state.subscriptions.remove(element_key, &request.message_name) {
            Some(_) => writer.append_follow_up_event(record.key, Intent::Closed, record.value.clone()),
            None => writer.append_rejection(
                record,
                RejectionType::NotFound,
                format!(
                    "Expected to close workflow instance subscription with element {} and message {}, but none was found",
                    element_key, request.message_name
                ),
            ),
        }
    }
}

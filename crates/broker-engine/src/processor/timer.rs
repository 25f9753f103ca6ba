//! # timer
//!
//! why: create, trigger and cancel the timers of timer catch events
//! relations: TimerState, continues elements through processor/bpmn.rs, triggered by trigger.rs
//! what: CreateTimerProcessor, TriggerTimerProcessor, CancelTimerProcessor, TimerCreatedProcessor, register

use super::{CommandControl, CommandProcessor, ProcessorRegistry, RecordProcessor, RecordWriter};
use crate::record::{Intent, Record, RecordType, RecordValue, RejectionType};
use crate::state::PartitionState;

pub(super) fn register(registry: ProcessorRegistry) -> ProcessorRegistry {
    registry
        .on_command(RecordType::Timer, Intent::Create, CreateTimerProcessor)
        .on_command(RecordType::Timer, Intent::Trigger, TriggerTimerProcessor)
        .on_record(RecordType::Timer, Intent::Cancel, CancelTimerProcessor)
        .on_record(RecordType::Timer, Intent::Created, TimerCreatedProcessor)
}

struct CreateTimerProcessor;

impl CommandProcessor for CreateTimerProcessor {
    fn on_command(&mut self, command: &Record, state: &mut PartitionState, control: &mut CommandControl, _writer: &mut RecordWriter) {
        let Some(timer) = command.value.as_timer() else {
            return;
        };
        let key = control.accept(Intent::Created, command.value.clone());
        state.timers.put(key, timer.clone());
    }
}

struct TriggerTimerProcessor;

impl CommandProcessor for TriggerTimerProcessor {
    fn on_command(&mut self, command: &Record, state: &mut PartitionState, control: &mut CommandControl, writer: &mut RecordWriter) {
        let key = command.key;
        let element_key = command.value.as_timer().map_or(0, |t| t.element_instance_key);
        let Some(timer) = state.timers.remove(element_key, key) else {
            control.reject(
                RejectionType::NotFound,
                format!(
                    "Expected to trigger timer with key '{}', but no such timer was found",
                    key
                ),
            );
            return;
        };
        control.accept(Intent::Triggered, RecordValue::Timer(timer));

        if let Some(instance) = state.elements.get_mut(element_key) {
            if instance.is_active() && instance.timer_key == key {
                instance.timer_key = 0;
                writer.append_follow_up_event(
                    element_key,
                    Intent::ElementCompleting,
                    RecordValue::WorkflowInstance(instance.value.clone()),
                );
            }
        }
    }
}

struct CancelTimerProcessor;

impl RecordProcessor for CancelTimerProcessor {
    fn process_record(&mut self, record: &Record, state: &mut PartitionState, writer: &mut RecordWriter) {
        let element_key = record.value.as_timer().map_or(0, |t| t.element_instance_key);
        match state.timers.remove(element_key, record.key) {
            Some(timer) => {
                writer.append_follow_up_event(record.key, Intent::Canceled, RecordValue::Timer(timer))
            }
            None => writer.append_rejection(
                record,
                RejectionType::NotFound,
                format!(
                    "Expected to cancel timer with key {}, but it does not exist",
                    record.key
                ),
            ),
        }
    }
}

/// links the timer to its catch event, or cancels it if the element is gone
struct TimerCreatedProcessor;

impl RecordProcessor for TimerCreatedProcessor {
    fn process_record(&mut self, record: &Record, state: &mut PartitionState, writer: &mut RecordWriter) {
        let Some(timer) = record.value.as_timer() else {
            return;
        };
        match state.elements.get_mut(timer.element_instance_key) {
            Some(instance) if instance.is_active() => instance.timer_key = record.key,
            _ => writer.append_command(record.key, Intent::Cancel, record.value.clone()),
        }
    }
}

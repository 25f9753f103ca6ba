//! # workflow_instance
//!
//! why: the client commands against workflow instances: create, cancel, update payload
//! relations: starts and stops the element lifecycle run by processor/bpmn.rs
//! what: CreateInstanceProcessor, CancelInstanceProcessor, UpdatePayloadProcessor, register

use super::{CommandControl, CommandProcessor, ProcessorRegistry, RecordWriter};
use crate::model::ElementType;
use crate::record::{Intent, Record, RecordType, RecordValue, RejectionType, WorkflowInstanceRecord};
use crate::state::{ElementLifecycle, PartitionState};

pub(super) fn register(registry: ProcessorRegistry) -> ProcessorRegistry {
    registry
        .on_command(RecordType::WorkflowInstance, Intent::Create, CreateInstanceProcessor)
        .on_command(RecordType::WorkflowInstance, Intent::Cancel, CancelInstanceProcessor)
        .on_command(RecordType::WorkflowInstance, Intent::UpdatePayload, UpdatePayloadProcessor)
}

struct CreateInstanceProcessor;

impl CommandProcessor for CreateInstanceProcessor {
    fn on_command(&mut self, command: &Record, state: &mut PartitionState, control: &mut CommandControl, _writer: &mut RecordWriter) {
        let Some(request) = command.value.as_workflow_instance() else {
            return;
        };

        let workflow = if request.workflow_key != 0 {
            match state.workflows.workflow_by_key(request.workflow_key) {
                Some(workflow) => workflow,
                None => {
                    control.reject(
                        RejectionType::NotFound,
                        format!(
                            "Expected to create instance of workflow with key '{}', but no such workflow was found",
                            request.workflow_key
                        ),
                    );
                    return;
                }
            }
        } else if !request.process_id.is_empty() {
            match state
                .workflows
                .workflow_by_process_id(&request.process_id, request.version)
            {
                Some(workflow) => workflow,
                None => {
                    control.reject(
                        RejectionType::NotFound,
                        format!(
                            "Expected to create instance of workflow with process id '{}', but no such workflow was found",
                            request.process_id
                        ),
                    );
                    return;
                }
            }
        } else {
            control.reject(
                RejectionType::InvalidArgument,
                "Expected at least a workflow key or a process id, but none given",
            );
            return;
        };

        let key = control.key();
        let value = WorkflowInstanceRecord {
            process_id: workflow.workflow.process_id.clone(),
            version: workflow.version,
            workflow_key: workflow.key,
            workflow_instance_key: key,
            element_id: workflow.workflow.process_id.clone(),
            flow_scope_key: 0,
            element_type: ElementType::Process,
            payload: request.payload.clone(),
        };
        control.accept(Intent::ElementReady, RecordValue::WorkflowInstance(value));
    }
}

struct CancelInstanceProcessor;

impl CommandProcessor for CancelInstanceProcessor {
    fn on_command(&mut self, command: &Record, state: &mut PartitionState, control: &mut CommandControl, _writer: &mut RecordWriter) {
        let key = command.key;
        let cancelable = state.elements.get_mut(key).filter(|instance| {
            instance.value.flow_scope_key == 0
                && matches!(
                    instance.lifecycle,
                    ElementLifecycle::Ready | ElementLifecycle::Activated
                )
        });
        let Some(instance) = cancelable else {
            control.reject(
                RejectionType::NotFound,
                format!(
                    "Expected to cancel workflow instance with key {}, but no such workflow instance was found",
                    key
                ),
            );
            return;
        };
        instance.lifecycle = ElementLifecycle::Terminating;
        let value = instance.value.clone();
        control.accept(Intent::ElementTerminating, RecordValue::WorkflowInstance(value));
    }
}

struct UpdatePayloadProcessor;

impl CommandProcessor for UpdatePayloadProcessor {
    fn on_command(&mut self, command: &Record, state: &mut PartitionState, control: &mut CommandControl, _writer: &mut RecordWriter) {
        let key = command.key;
        let payload = command
            .value
            .as_workflow_instance()
            .map(|v| v.payload.clone())
            .unwrap_or_default();
        let Some(instance) = state.elements.get_mut(key) else {
            control.reject(
                RejectionType::NotFound,
                format!(
                    "Expected to update payload for element with key {}, but no such element was found",
                    key
                ),
            );
            return;
        };
        instance.value.payload = payload.clone();
        let value = instance.value.clone();

        // a retried failed token picks up the new payload
        if let Some(token) = state.elements.failed_token_mut(key) {
            if let RecordValue::WorkflowInstance(failed) = &mut token.value {
                failed.payload = payload;
            }
        }
        control.accept(Intent::PayloadUpdated, RecordValue::WorkflowInstance(value));
    }
}

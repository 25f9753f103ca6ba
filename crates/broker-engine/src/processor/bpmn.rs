//! # bpmn
//!
//! why: walk workflow instances through the graph one element lifecycle event at a time
//! relations: reads model.rs graphs from WorkflowState, creates jobs, timers and subscriptions through commands
//! what: BpmnProcessor, token accounting of the process element, register
//!
//! a process element counts its live tokens: element instances, taken flows
//! and triggered events not yet consumed. it completes when the count drops
//! to zero while active and terminates when it drops to zero while terminating.

use super::{ProcessorRegistry, RecordProcessor, RecordWriter};
use crate::model::{ElementKind, ElementType, Workflow};
use crate::record::{
    ErrorType, IncidentRecord, Intent, JobHeaders, JobRecord, Record, RecordType, RecordValue,
    SubscriptionRecord, TimerRecord, WorkflowInstanceRecord,
};
use crate::state::{ElementInstance, ElementLifecycle, PartitionState};
use tracing::{debug, error, info};

const LIFECYCLE: [Intent; 8] = [
    Intent::ElementReady,
    Intent::ElementActivated,
    Intent::ElementCompleting,
    Intent::ElementCompleted,
    Intent::ElementTerminating,
    Intent::ElementTerminated,
    Intent::EventTriggered,
    Intent::SequenceFlowTaken,
];

pub(super) fn register(registry: ProcessorRegistry) -> ProcessorRegistry {
    LIFECYCLE.iter().fold(registry, |registry, intent| {
        registry.on_record(RecordType::WorkflowInstance, *intent, BpmnProcessor)
    })
}

struct BpmnProcessor;

impl RecordProcessor for BpmnProcessor {
    fn process_record(&mut self, record: &Record, state: &mut PartitionState, writer: &mut RecordWriter) {
        let Some(value) = record.value.as_workflow_instance() else {
            return;
        };
        let mut step = Step {
            record,
            value,
            state,
            writer,
        };
        match record.intent() {
            Intent::ElementReady => step.ready(),
            Intent::ElementActivated => step.activated(),
            Intent::ElementCompleting => step.completing(),
            Intent::ElementCompleted => step.completed(),
            Intent::ElementTerminating => step.terminating(),
            Intent::ElementTerminated => step.terminated(),
            Intent::EventTriggered => step.event_triggered(),
            Intent::SequenceFlowTaken => step.sequence_flow_taken(),
            _ => {}
        }
    }
}

/// one lifecycle event being applied
struct Step<'a> {
    record: &'a Record,
    value: &'a WorkflowInstanceRecord,
    state: &'a mut PartitionState,
    writer: &'a mut RecordWriter,
}

impl Step<'_> {
    fn key(&self) -> u64 {
        self.record.key
    }

    fn scope_key(&self) -> u64 {
        self.value.flow_scope_key
    }

    fn is_process(&self) -> bool {
        self.value.element_type == ElementType::Process
    }

    fn workflow(&self) -> Option<Workflow> {
        let workflow = self
            .state
            .workflows
            .workflow_by_key(self.value.workflow_key)
            .map(|entry| entry.workflow.clone());
        if workflow.is_none() {
            error!(
                workflow_key = self.value.workflow_key,
                key = self.key(),
                "workflow of instance is not deployed"
            );
        }
        workflow
    }

    fn scope_active(&self) -> bool {
        self.state.elements.is_active(self.scope_key())
    }

    fn scope_payload(&self) -> crate::record::Payload {
        self.state
            .elements
            .get(self.scope_key())
            .map(|scope| scope.value.payload.clone())
            .unwrap_or_else(|| self.value.payload.clone())
    }

    fn write(&mut self, key: u64, intent: Intent, value: WorkflowInstanceRecord) {
        self.writer
            .append_follow_up_event(key, intent, RecordValue::WorkflowInstance(value));
    }

    /// a value for `element_id` inside the current scope
    fn child_value(&self, element_id: &str, element_type: ElementType) -> WorkflowInstanceRecord {
        WorkflowInstanceRecord {
            element_id: element_id.to_string(),
            element_type,
            payload: self.scope_payload(),
            ..self.value.clone()
        }
    }

    /// one token of the scope is gone
    fn consume_token(&mut self) {
        let scope_key = self.scope_key();
        let Some(scope) = self.state.elements.get_mut(scope_key) else {
            return;
        };
        scope.active_tokens = scope.active_tokens.saturating_sub(1);
        if scope.active_tokens > 0 {
            return;
        }
        let value = scope.value.clone();
        let lifecycle = scope.lifecycle;
        match lifecycle {
            ElementLifecycle::Activated => self.write(scope_key, Intent::ElementCompleting, value),
            ElementLifecycle::Terminating => self.write(scope_key, Intent::ElementTerminated, value),
            _ => {}
        }
    }

    /// leave `element_id` through all of its outgoing flows; the element's own token moves on
    fn take_outgoing(&mut self, element_id: &str) {
        let Some(workflow) = self.workflow() else {
            return;
        };
        let flows: Vec<String> = workflow
            .outgoing(element_id)
            .into_iter()
            .map(|flow| flow.id.clone())
            .collect();
        if flows.is_empty() {
            self.consume_token();
            return;
        }

        let scope_key = self.scope_key();
        if let Some(scope) = self.state.elements.get_mut(scope_key) {
            scope.active_tokens += flows.len() as u64 - 1;
        }
        for flow in flows {
            let key = self.state.keys.next_key();
            let value = self.child_value(&flow, ElementType::SequenceFlow);
            self.write(key, Intent::SequenceFlowTaken, value);
        }
    }

    fn ready(&mut self) {
        if !self.is_process() && !self.scope_active() {
            self.consume_token();
            return;
        }
        let key = self.key();
        let value = self.value.clone();
        self.state
            .elements
            .insert(ElementInstance::new(key, value.clone()));
        self.write(key, Intent::ElementActivated, value);
    }

    fn activated(&mut self) {
        let key = self.key();
        let Some(instance) = self.state.elements.get_mut(key) else {
            return;
        };
        // an activated element is seen again when its failed token is retried
        if !matches!(
            instance.lifecycle,
            ElementLifecycle::Ready | ElementLifecycle::Activated
        ) {
            return;
        }
        instance.lifecycle = ElementLifecycle::Activated;

        let Some(workflow) = self.workflow() else {
            return;
        };
        if self.is_process() {
            let Some(start) = workflow.start_event() else {
                return;
            };
            if let Some(instance) = self.state.elements.get_mut(key) {
                instance.active_tokens = 1;
            }
            info!(workflow_instance = key, process_id = %self.value.process_id, "workflow instance started");
            let value = WorkflowInstanceRecord {
                element_id: start.id.clone(),
                element_type: ElementType::StartEvent,
                flow_scope_key: key,
                ..self.value.clone()
            };
            let start_key = self.state.keys.next_key();
            self.write(start_key, Intent::EventTriggered, value);
            return;
        }

        let Some(element) = workflow.element(&self.value.element_id) else {
            error!(element_id = %self.value.element_id, "element is not part of its workflow");
            return;
        };
        match &element.kind {
            ElementKind::ServiceTask { job_type, retries } => {
                let job = JobRecord {
                    job_type: job_type.clone(),
                    retries: *retries,
                    payload: self.value.payload.clone(),
                    headers: JobHeaders {
                        workflow_instance_key: self.value.workflow_instance_key,
                        element_instance_key: key,
                        element_id: self.value.element_id.clone(),
                        workflow_key: self.value.workflow_key,
                        process_id: self.value.process_id.clone(),
                    },
                    ..JobRecord::default()
                };
                self.writer
                    .append_new_command(Intent::Create, RecordValue::Job(job));
            }
            ElementKind::TimerCatchEvent { duration } => {
                let timer = TimerRecord {
                    workflow_instance_key: self.value.workflow_instance_key,
                    element_instance_key: key,
                    due_date: self.record.timestamp.saturating_add(*duration),
                    handler_element_id: self.value.element_id.clone(),
                };
                self.writer
                    .append_new_command(Intent::Create, RecordValue::Timer(timer));
            }
            ElementKind::MessageCatchEvent {
                message_name,
                correlation_key,
            } => self.subscribe(message_name, correlation_key),
            ElementKind::StartEvent | ElementKind::EndEvent => {
                error!(element_id = %element.id, "events are triggered, never activated");
            }
        }
    }

    fn subscribe(&mut self, message_name: &str, correlation_variable: &str) {
        let key = self.key();
        let correlation_key = match self.value.payload.get(correlation_variable) {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let Some(correlation_key) = correlation_key else {
            // park the activation until the incident is resolved
            self.state
                .elements
                .store_failed_token(key, self.record.clone());
            let incident = IncidentRecord {
                error_type: ErrorType::ExtractValueError,
                error_message: format!(
                    "Failed to extract the correlation-key by '{}': no value found",
                    correlation_variable
                ),
                process_id: self.value.process_id.clone(),
                workflow_instance_key: self.value.workflow_instance_key,
                element_id: self.value.element_id.clone(),
                element_instance_key: key,
                job_key: 0,
            };
            self.writer
                .append_new_command(Intent::Create, RecordValue::Incident(incident));
            return;
        };

        let subscription = SubscriptionRecord {
            workflow_instance_key: self.value.workflow_instance_key,
            element_instance_key: key,
            message_name: message_name.to_string(),
            correlation_key,
            payload: Default::default(),
        };
        self.state.subscriptions.put_opening(subscription.clone());
        self.writer.append_command(
            key,
            Intent::Open,
            RecordValue::WorkflowInstanceSubscription(subscription),
        );
    }

    fn completing(&mut self) {
        let key = self.key();
        let Some(instance) = self.state.elements.get_mut(key) else {
            return;
        };
        if !instance.is_active() {
            return;
        }
        instance.lifecycle = ElementLifecycle::Completing;
        instance.value.payload = self.value.payload.clone();
        let value = self.value.clone();
        self.write(key, Intent::ElementCompleted, value);
    }

    fn completed(&mut self) {
        let key = self.key();
        if self.state.elements.remove(key).is_none() {
            return;
        }
        if self.is_process() {
            info!(workflow_instance = key, "workflow instance completed");
            return;
        }

        let scope_key = self.scope_key();
        if let Some(scope) = self.state.elements.get_mut(scope_key) {
            super::merge_payload(&mut scope.value.payload, &self.value.payload);
        }
        if self.scope_active() {
            let element_id = self.value.element_id.clone();
            self.take_outgoing(&element_id);
        } else {
            self.consume_token();
        }
    }

    fn event_triggered(&mut self) {
        if !self.scope_active() {
            self.consume_token();
            return;
        }
        match self.value.element_type {
            ElementType::StartEvent => {
                let element_id = self.value.element_id.clone();
                self.take_outgoing(&element_id);
            }
            _ => self.consume_token(),
        }
    }

    fn sequence_flow_taken(&mut self) {
        if !self.scope_active() {
            self.consume_token();
            return;
        }
        let Some(workflow) = self.workflow() else {
            return;
        };
        let Some(target) = workflow
            .flow(&self.value.element_id)
            .and_then(|flow| workflow.element(&flow.target))
        else {
            error!(flow = %self.value.element_id, "sequence flow is not part of its workflow");
            self.consume_token();
            return;
        };

        let key = self.state.keys.next_key();
        let element_type = target.element_type();
        let value = self.child_value(&target.id, element_type);
        if target.kind == ElementKind::EndEvent {
            self.write(key, Intent::EventTriggered, value);
        } else {
            self.write(key, Intent::ElementReady, value);
        }
    }

    fn terminating(&mut self) {
        let key = self.key();
        let Some(instance) = self.state.elements.get_mut(key) else {
            return;
        };
        instance.lifecycle = ElementLifecycle::Terminating;
        let (job_key, timer_key, tokens) = (instance.job_key, instance.timer_key, instance.active_tokens);

        if self.is_process() {
            for child_key in self.state.elements.children(key) {
                let Some(child) = self.state.elements.get_mut(child_key) else {
                    continue;
                };
                if child.lifecycle == ElementLifecycle::Terminating {
                    continue;
                }
                child.lifecycle = ElementLifecycle::Terminating;
                let value = child.value.clone();
                self.write(child_key, Intent::ElementTerminating, value);
            }
            if tokens == 0 {
                let value = self.value.clone();
                self.write(key, Intent::ElementTerminated, value);
            }
            return;
        }

        // release whatever the element was waiting on
        if let Some(job) = self.state.jobs.get(job_key) {
            if let Some(incident_key) = self.state.incidents.job_incident_key(job_key) {
                if let Some(incident) = self.state.incidents.get(incident_key) {
                    self.writer.append_command(
                        incident_key,
                        Intent::Resolve,
                        RecordValue::Incident(incident.clone()),
                    );
                }
            }
            self.writer
                .append_command(job_key, Intent::Cancel, RecordValue::Job(job.clone()));
        }
        if let Some(timer) = self.state.timers.get(key, timer_key) {
            self.writer
                .append_command(timer_key, Intent::Cancel, RecordValue::Timer(timer.clone()));
        }
        let subscriptions: Vec<SubscriptionRecord> = self
            .state
            .subscriptions
            .of_element(key)
            .into_iter()
            .filter(|s| !s.is_closing())
            .map(|s| s.record.clone())
            .collect();
        for subscription in subscriptions {
            self.state
                .subscriptions
                .close(key, &subscription.message_name);
            self.writer.append_command(
                key,
                Intent::Close,
                RecordValue::WorkflowInstanceSubscription(subscription),
            );
        }
        if let Some(incident_key) = self.state.incidents.element_incident_key(key) {
            if let Some(incident) = self.state.incidents.get(incident_key) {
                self.writer.append_command(
                    incident_key,
                    Intent::Resolve,
                    RecordValue::Incident(incident.clone()),
                );
            }
        }
        self.state.elements.remove_failed_token(key);

        let value = self.value.clone();
        self.write(key, Intent::ElementTerminated, value);
    }

    fn terminated(&mut self) {
        let key = self.key();
        if self.state.elements.remove(key).is_none() {
            return;
        }
        if self.is_process() {
            info!(workflow_instance = key, "workflow instance terminated");
            return;
        }
        debug!(element = key, scope = self.scope_key(), "element terminated");
        self.consume_token();
    }
}

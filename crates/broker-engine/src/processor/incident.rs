//! # incident
//!
//! why: raise incidents for failed jobs and failed elements, and resolve them again
//! relations: IncidentState, JobState and the failed tokens of ElementInstanceState
//! what: CreateIncidentProcessor, ResolveIncidentProcessor, register

use super::{CommandControl, CommandProcessor, ProcessorRegistry, RecordWriter};
use crate::record::{Intent, Record, RecordType, RecordValue, RejectionType};
use crate::state::{IncidentState, JobLifecycle, PartitionState};
use tracing::debug;

pub(super) fn register(registry: ProcessorRegistry) -> ProcessorRegistry {
    registry
        .on_command(RecordType::Incident, Intent::Create, CreateIncidentProcessor)
        .on_command(RecordType::Incident, Intent::Resolve, ResolveIncidentProcessor)
}

struct CreateIncidentProcessor;

impl CommandProcessor for CreateIncidentProcessor {
    fn on_command(&mut self, command: &Record, state: &mut PartitionState, control: &mut CommandControl, _writer: &mut RecordWriter) {
        let Some(incident) = command.value.as_incident() else {
            return;
        };

        if IncidentState::is_job_incident(incident) {
            match state.jobs.lifecycle(incident.job_key) {
                Some(JobLifecycle::Failed) => {}
                Some(other) => {
                    control.reject(
                        RejectionType::InvalidState,
                        format!(
                            "Expected job {} to be in failed state, but it was {}",
                            incident.job_key, other
                        ),
                    );
                    return;
                }
                None => {
                    control.reject(
                        RejectionType::NotFound,
                        format!(
                            "Expected job {} to be in failed state, but it was not found",
                            incident.job_key
                        ),
                    );
                    return;
                }
            }
        } else if state
            .elements
            .failed_token(incident.element_instance_key)
            .is_none()
        {
            control.reject(
                RejectionType::NotFound,
                format!(
                    "Expected to have a failed event {}, but none was found",
                    incident.element_instance_key
                ),
            );
            return;
        }

        let key = control.accept(Intent::Created, command.value.clone());
        state.incidents.create(key, incident.clone());
    }
}

struct ResolveIncidentProcessor;

impl CommandProcessor for ResolveIncidentProcessor {
    fn on_command(&mut self, command: &Record, state: &mut PartitionState, control: &mut CommandControl, writer: &mut RecordWriter) {
        let key = command.key;
        let Some(incident) = state.incidents.delete(key) else {
            control.reject(
                RejectionType::NotFound,
                format!(
                    "Expected to resolve incident with key '{}', but no such incident was found",
                    key
                ),
            );
            return;
        };
        control.accept(Intent::Resolved, RecordValue::Incident(incident.clone()));

        if IncidentState::is_job_incident(&incident) {
            return;
        }
        // retry the element with the payload it has now
        let element_key = incident.element_instance_key;
        let Some(mut token) = state.elements.remove_failed_token(element_key) else {
            return;
        };
        let Some(instance) = state.elements.get(element_key) else {
            debug!(element = element_key, "element of resolved incident is gone");
            return;
        };
        if !instance.is_active() {
            return;
        }
        if let RecordValue::WorkflowInstance(value) = &mut token.value {
            value.payload = instance.value.payload.clone();
        }
        writer.append_follow_up_event(token.key, token.intent(), token.value);
    }
}

//! # job
//!
//! why: the job lifecycle workers drive: create, activate, complete, fail, time out, retry, cancel
//! relations: JobState / IncidentState from state/, hands completions to processor/bpmn.rs via ELEMENT_COMPLETING
//! what: job command processors, job event processors, register

use super::{merge_payload, CommandControl, CommandProcessor, ProcessorRegistry, RecordProcessor, RecordWriter};
use crate::record::{
    ErrorType, IncidentRecord, Intent, JobBatchRecord, Record, RecordType, RecordValue,
    RejectionType,
};
use crate::state::{JobLifecycle, PartitionState};
use tracing::error;

pub(super) fn register(registry: ProcessorRegistry) -> ProcessorRegistry {
    registry
        .on_command(RecordType::Job, Intent::Create, CreateProcessor)
        .on_command(RecordType::Job, Intent::Complete, CompleteProcessor)
        .on_command(RecordType::Job, Intent::Fail, FailProcessor)
        .on_command(RecordType::Job, Intent::TimeOut, TimeOutProcessor)
        .on_command(RecordType::Job, Intent::UpdateRetries, UpdateRetriesProcessor)
        .on_command(RecordType::Job, Intent::Cancel, CancelProcessor)
        .on_command(RecordType::JobBatch, Intent::Activate, BatchActivateProcessor)
        .on_record(RecordType::Job, Intent::Created, JobCreatedProcessor)
        .on_record(RecordType::Job, Intent::Completed, JobCompletedProcessor)
        .on_record(RecordType::Job, Intent::Failed, JobFailedProcessor)
}

struct CreateProcessor;

impl CommandProcessor for CreateProcessor {
    fn on_command(&mut self, command: &Record, state: &mut PartitionState, control: &mut CommandControl, _writer: &mut RecordWriter) {
        let Some(job) = command.value.as_job() else {
            return;
        };
        let mut job = job.clone();
        job.deadline = 0;
        job.worker.clear();
        let key = control.accept(Intent::Created, RecordValue::Job(job.clone()));
        state.jobs.create(key, job);
    }
}

struct CompleteProcessor;

impl CommandProcessor for CompleteProcessor {
    fn on_command(&mut self, command: &Record, state: &mut PartitionState, control: &mut CommandControl, _writer: &mut RecordWriter) {
        let key = command.key;
        let Some(stored) = state.jobs.get(key) else {
            control.reject(
                RejectionType::NotFound,
                format!("Expected to complete job {}, but no such job exists", key),
            );
            return;
        };

        if state.jobs.is_in_state(key, JobLifecycle::Failed) {
            match state.incidents.job_incident_key(key) {
                Some(incident_key) => control.reject(
                    RejectionType::InvalidState,
                    format!(
                        "Expected to complete job {}, but the job is failed; incident {} must be resolved first",
                        key, incident_key
                    ),
                ),
                None => {
                    let reason = format!(
                        "Expected to complete job {}, but the job is failed; no incident was created, an internal error was raised",
                        key
                    );
                    error!(job = key, "{}", reason);
                    control.reject(RejectionType::InvalidState, reason);
                }
            }
            return;
        }

        let mut job = stored.clone();
        job.payload = command.value.as_job().map(|j| j.payload.clone()).unwrap_or_default();
        state.jobs.delete(key);
        control.accept(Intent::Completed, RecordValue::Job(job));
    }
}

struct FailProcessor;

impl CommandProcessor for FailProcessor {
    fn on_command(&mut self, command: &Record, state: &mut PartitionState, control: &mut CommandControl, _writer: &mut RecordWriter) {
        let key = command.key;
        let Some(stored) = state.jobs.get(key) else {
            control.reject(
                RejectionType::NotFound,
                format!("Expected to fail job {}, but no such job exists", key),
            );
            return;
        };
        if !state.jobs.is_in_state(key, JobLifecycle::Activated) {
            control.reject(
                RejectionType::InvalidState,
                format!("Expected to fail job {}, but it is not activated", key),
            );
            return;
        }

        let mut job = stored.clone();
        if let Some(failure) = command.value.as_job() {
            job.retries = failure.retries;
            job.error_message = failure.error_message.clone();
        }
        state.jobs.fail(key, job.clone());
        control.accept(Intent::Failed, RecordValue::Job(job));
    }
}

struct TimeOutProcessor;

impl CommandProcessor for TimeOutProcessor {
    fn on_command(&mut self, command: &Record, state: &mut PartitionState, control: &mut CommandControl, _writer: &mut RecordWriter) {
        let key = command.key;
        match state.jobs.lifecycle(key) {
            Some(JobLifecycle::Activated) => {
                let Some(job) = state.jobs.get(key).cloned() else {
                    return;
                };
                state.jobs.timeout(key, job.clone());
                control.accept(Intent::TimedOut, RecordValue::Job(job));
            }
            Some(_) => control.reject(
                RejectionType::InvalidState,
                format!("Expected to time out job {}, but it was not activated yet", key),
            ),
            None => control.reject(
                RejectionType::NotFound,
                format!("Expected to time out job {}, but no such job exists", key),
            ),
        }
    }
}

struct UpdateRetriesProcessor;

impl CommandProcessor for UpdateRetriesProcessor {
    fn on_command(&mut self, command: &Record, state: &mut PartitionState, control: &mut CommandControl, writer: &mut RecordWriter) {
        let key = command.key;
        let retries = command.value.as_job().map_or(0, |j| j.retries);
        let Some(stored) = state.jobs.get(key) else {
            control.reject(
                RejectionType::NotFound,
                format!("Expected to update retries for job {}, but no such job exists", key),
            );
            return;
        };
        if retries < 1 {
            control.reject(
                RejectionType::InvalidArgument,
                format!(
                    "Expected to update retries for job {} with a positive amount of retries, but the amount given was {}",
                    key, retries
                ),
            );
            return;
        }
        if !state.jobs.is_in_state(key, JobLifecycle::Failed) {
            control.reject(
                RejectionType::InvalidState,
                format!("Expected to update retries for job {}, but the job is not failed", key),
            );
            return;
        }

        let mut job = stored.clone();
        job.retries = retries;
        state.jobs.update_retries(key, job.clone());
        control.accept(Intent::RetriesUpdated, RecordValue::Job(job));

        if let Some(incident_key) = state.incidents.job_incident_key(key) {
            if let Some(incident) = state.incidents.get(incident_key) {
                writer.append_command(incident_key, Intent::Resolve, RecordValue::Incident(incident.clone()));
            }
        }
    }
}

struct CancelProcessor;

impl CommandProcessor for CancelProcessor {
    fn on_command(&mut self, command: &Record, state: &mut PartitionState, control: &mut CommandControl, _writer: &mut RecordWriter) {
        let key = command.key;
        match state.jobs.delete(key) {
            Some(job) => {
                control.accept(Intent::Canceled, RecordValue::Job(job));
            }
            None => control.reject(
                RejectionType::NotFound,
                format!("Expected to cancel job {}, but no such job exists", key),
            ),
        }
    }
}

struct BatchActivateProcessor;

impl CommandProcessor for BatchActivateProcessor {
    fn on_command(&mut self, command: &Record, state: &mut PartitionState, control: &mut CommandControl, writer: &mut RecordWriter) {
        let Some(request) = command.value.as_job_batch() else {
            return;
        };
        if request.job_type.trim().is_empty() {
            control.reject(
                RejectionType::InvalidArgument,
                "Expected to activate job batch with type to be present, but it was blank",
            );
            return;
        }
        if request.amount < 1 {
            control.reject(
                RejectionType::InvalidArgument,
                format!(
                    "Expected to activate job batch with amount to be greater than zero, but it was {}",
                    request.amount
                ),
            );
            return;
        }
        if request.timeout < 1 {
            control.reject(
                RejectionType::InvalidArgument,
                format!(
                    "Expected to activate job batch with timeout to be greater than zero, but it was {}",
                    request.timeout
                ),
            );
            return;
        }

        let deadline = command.timestamp.saturating_add(request.timeout as u64);
        let mut batch = JobBatchRecord {
            job_keys: Vec::new(),
            jobs: Vec::new(),
            ..request.clone()
        };
        for key in state.jobs.activatable(&request.job_type, request.amount as usize) {
            let Some(mut job) = state.jobs.get(key).cloned() else {
                continue;
            };
            job.deadline = deadline;
            job.worker = request.worker.clone();
            state.jobs.activate(key, job.clone());
            batch.job_keys.push(key);
            batch.jobs.push(job);
        }

        let activated: Vec<_> = batch.job_keys.iter().copied().zip(batch.jobs.clone()).collect();
        control.accept(Intent::Activated, RecordValue::JobBatch(batch));
        for (key, job) in activated {
            writer.append_follow_up_event(key, Intent::Activated, RecordValue::Job(job));
        }
    }
}

/// links a job created by a service task to its element, or cancels it if the element is gone
struct JobCreatedProcessor;

impl RecordProcessor for JobCreatedProcessor {
    fn process_record(&mut self, record: &Record, state: &mut PartitionState, writer: &mut RecordWriter) {
        let Some(job) = record.value.as_job() else {
            return;
        };
        let element_key = job.headers.element_instance_key;
        if element_key == 0 {
            return;
        }
        match state.elements.get_mut(element_key) {
            Some(instance) if instance.is_active() => instance.job_key = record.key,
            _ => writer.append_command(record.key, Intent::Cancel, record.value.clone()),
        }
    }
}

/// continues the service task that waited on the job
struct JobCompletedProcessor;

impl RecordProcessor for JobCompletedProcessor {
    fn process_record(&mut self, record: &Record, state: &mut PartitionState, writer: &mut RecordWriter) {
        let Some(job) = record.value.as_job() else {
            return;
        };
        let element_key = job.headers.element_instance_key;
        let Some(instance) = state.elements.get_mut(element_key) else {
            return;
        };
        if !instance.is_active() || instance.job_key != record.key {
            return;
        }
        instance.job_key = 0;
        let mut value = instance.value.clone();
        merge_payload(&mut value.payload, &job.payload);
        writer.append_follow_up_event(element_key, Intent::ElementCompleting, RecordValue::WorkflowInstance(value));
    }
}

/// a job out of retries raises an incident
struct JobFailedProcessor;

impl RecordProcessor for JobFailedProcessor {
    fn process_record(&mut self, record: &Record, _state: &mut PartitionState, writer: &mut RecordWriter) {
        let Some(job) = record.value.as_job() else {
            return;
        };
        if job.retries > 0 {
            return;
        }
        let error_message = if job.error_message.is_empty() {
            "No more retries left.".to_string()
        } else {
            job.error_message.clone()
        };
        let incident = IncidentRecord {
            error_type: ErrorType::JobNoRetries,
            error_message,
            process_id: job.headers.process_id.clone(),
            workflow_instance_key: job.headers.workflow_instance_key,
            element_id: job.headers.element_id.clone(),
            element_instance_key: job.headers.element_instance_key,
            job_key: record.key,
        };
        writer.append_new_command(Intent::Create, RecordValue::Incident(incident));
    }
}

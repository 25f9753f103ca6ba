//! # deployment
//!
//! why: store deployments and version the workflows they carry
//! relations: WorkflowState from state/workflow.rs, workflow graphs validated by model.rs
//! what: DeploymentCreateProcessor, register

use super::{CommandControl, CommandProcessor, ProcessorRegistry, RecordWriter};
use crate::record::{DeployedWorkflow, Intent, Record, RecordType, RecordValue, RejectionType};
use crate::state::{DeployedWorkflowEntry, PartitionState};
use tracing::info;

pub(super) fn register(registry: ProcessorRegistry) -> ProcessorRegistry {
    registry.on_command(RecordType::Deployment, Intent::Create, DeploymentCreateProcessor)
}

struct DeploymentCreateProcessor;

impl CommandProcessor for DeploymentCreateProcessor {
    fn on_command(&mut self, command: &Record, state: &mut PartitionState, control: &mut CommandControl, _writer: &mut RecordWriter) {
        let Some(deployment) = command.value.as_deployment() else {
            return;
        };
        let key = control.key();
        if state.workflows.deployment_exists(key) {
            control.reject(
                RejectionType::AlreadyExists,
                format!("Expected to create a new deployment {}, but it already exists", key),
            );
            return;
        }
        if deployment.workflows.is_empty() {
            control.reject(
                RejectionType::InvalidArgument,
                "Expected to deploy at least one workflow, but none given",
            );
            return;
        }
        for workflow in &deployment.workflows {
            if let Err(reason) = workflow.validate() {
                control.reject(
                    RejectionType::InvalidArgument,
                    format!(
                        "Expected to deploy workflow '{}', but it is invalid: {}",
                        workflow.process_id, reason
                    ),
                );
                return;
            }
        }

        let mut deployment = deployment.clone();
        deployment.deployed.clear();
        for workflow in &deployment.workflows {
            let workflow_key = state.keys.next_key();
            let version = state.workflows.latest_version(&workflow.process_id) + 1;
            state.workflows.put_workflow(DeployedWorkflowEntry {
                key: workflow_key,
                version,
                deployment_key: key,
                workflow: workflow.clone(),
            });
            info!(process_id = %workflow.process_id, version, key = workflow_key, "workflow deployed");
            deployment.deployed.push(DeployedWorkflow {
                key: workflow_key,
                process_id: workflow.process_id.clone(),
                version,
            });
        }
        state.workflows.put_deployment(key, deployment.clone());
        control.accept(Intent::Created, RecordValue::Deployment(deployment));
    }
}

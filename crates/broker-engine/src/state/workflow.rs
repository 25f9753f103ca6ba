//! # workflow
//!
//! why: keep deployed workflows and the running element instances of every workflow instance
//! relations: written by processor/deployment.rs and processor/bpmn.rs, read by most processors
//! what: DeployedWorkflowEntry, WorkflowState, ElementLifecycle, ElementInstance, ElementInstanceState

use super::column::Column;
use crate::model::Workflow;
use crate::record::{DeploymentRecord, Record, WorkflowInstanceRecord};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedWorkflowEntry {
    pub key: u64,
    pub version: u32,
    pub deployment_key: u64,
    pub workflow: Workflow,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    deployments: Column<u64, DeploymentRecord>,
    workflows: Column<u64, DeployedWorkflowEntry>,
    /// (process id, version) -> workflow key
    versions: Column<(String, u32), u64>,
}

impl WorkflowState {
    pub fn deployment_exists(&self, key: u64) -> bool {
        self.deployments.contains(&key)
    }

    /// false if a deployment with this key was stored before
    pub fn put_deployment(&mut self, key: u64, deployment: DeploymentRecord) -> bool {
        if self.deployments.contains(&key) {
            return false;
        }
        self.deployments.insert(key, deployment);
        true
    }

    pub fn latest_version(&self, process_id: &str) -> u32 {
        self.versions
            .range((process_id.to_string(), 0)..)
            .take_while(|((id, _), _)| id == process_id)
            .map(|((_, version), _)| *version)
            .last()
            .unwrap_or(0)
    }

    pub fn put_workflow(&mut self, entry: DeployedWorkflowEntry) {
        let process_id = entry.workflow.process_id.clone();
        self.versions.insert((process_id, entry.version), entry.key);
        self.workflows.insert(entry.key, entry);
    }

    pub fn workflow_by_key(&self, key: u64) -> Option<&DeployedWorkflowEntry> {
        self.workflows.get(&key)
    }

    /// `version` 0 selects the latest
    pub fn workflow_by_process_id(&self, process_id: &str, version: u32) -> Option<&DeployedWorkflowEntry> {
        let version = if version == 0 {
            self.latest_version(process_id)
        } else {
            version
        };
        let key = self.versions.get(&(process_id.to_string(), version))?;
        self.workflows.get(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementLifecycle {
    Ready,
    Activated,
    Completing,
    Terminating,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInstance {
    pub key: u64,
    pub lifecycle: ElementLifecycle,
    pub value: WorkflowInstanceRecord,
    /// tokens alive inside a process element: instances, pending flows and events
    pub active_tokens: u64,
    pub job_key: u64,
    pub timer_key: u64,
}

impl ElementInstance {
    pub fn new(key: u64, value: WorkflowInstanceRecord) -> Self {
        Self {
            key,
            lifecycle: ElementLifecycle::Ready,
            value,
            active_tokens: 0,
            job_key: 0,
            timer_key: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle == ElementLifecycle::Activated
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInstanceState {
    instances: Column<u64, ElementInstance>,
    /// (flow scope key, element instance key)
    children: Column<(u64, u64), ()>,
    /// the record whose processing failed, kept until its incident is resolved
    failed_tokens: Column<u64, Record>,
}

impl ElementInstanceState {
    pub fn get(&self, key: u64) -> Option<&ElementInstance> {
        self.instances.get(&key)
    }

    pub fn get_mut(&mut self, key: u64) -> Option<&mut ElementInstance> {
        self.instances.get_mut(&key)
    }

    pub fn is_active(&self, key: u64) -> bool {
        self.get(key).map_or(false, ElementInstance::is_active)
    }

    pub fn insert(&mut self, instance: ElementInstance) {
        let scope = instance.value.flow_scope_key;
        if scope != 0 {
            self.children.insert((scope, instance.key), ());
        }
        self.instances.insert(instance.key, instance);
    }

    pub fn remove(&mut self, key: u64) -> Option<ElementInstance> {
        let instance = self.instances.remove(&key)?;
        let scope = instance.value.flow_scope_key;
        self.children.remove(&(scope, key));
        self.failed_tokens.remove(&key);
        Some(instance)
    }

    pub fn children(&self, scope_key: u64) -> Vec<u64> {
        self.children
            .range((scope_key, 0)..=(scope_key, u64::MAX))
            .map(|((_, key), _)| *key)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn store_failed_token(&mut self, key: u64, record: Record) {
        self.failed_tokens.insert(key, record);
    }

    pub fn failed_token(&self, key: u64) -> Option<&Record> {
        self.failed_tokens.get(&key)
    }

    pub fn failed_token_mut(&mut self, key: u64) -> Option<&mut Record> {
        self.failed_tokens.get_mut(&key)
    }

    pub fn remove_failed_token(&mut self, key: u64) -> Option<Record> {
        self.failed_tokens.remove(&key)
    }
}

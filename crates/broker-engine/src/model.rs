//! # model
//!
//! why: the already compiled, static workflow graph the engine executes
//! relations: carried in deployment records, stored by state/workflow.rs, walked by processor/bpmn.rs
//! what: ElementType, ElementKind, Element, SequenceFlow, Workflow (+ validation), WorkflowBuilder

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// element type as reported on workflow instance records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ElementType {
    #[default]
    Unspecified,
    Process,
    StartEvent,
    EndEvent,
    ServiceTask,
    TimerCatchEvent,
    MessageCatchEvent,
    SequenceFlow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementKind {
    StartEvent,
    EndEvent,
    /// creates a job of `job_type` and waits for its completion
    ServiceTask { job_type: String, retries: u32 },
    /// waits `duration` ms after activation
    TimerCatchEvent { duration: u64 },
    /// waits for a message; `correlation_key` names the payload variable holding the key
    MessageCatchEvent {
        message_name: String,
        correlation_key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub id: String,
    pub kind: ElementKind,
}

impl Element {
    pub fn element_type(&self) -> ElementType {
        match self.kind {
            ElementKind::StartEvent => ElementType::StartEvent,
            ElementKind::EndEvent => ElementType::EndEvent,
            ElementKind::ServiceTask { .. } => ElementType::ServiceTask,
            ElementKind::TimerCatchEvent { .. } => ElementType::TimerCatchEvent,
            ElementKind::MessageCatchEvent { .. } => ElementType::MessageCatchEvent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceFlow {
    pub id: String,
    pub source: String,
    pub target: String,
}

/// one executable process: flow nodes connected by sequence flows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub process_id: String,
    pub elements: Vec<Element>,
    pub flows: Vec<SequenceFlow>,
}

impl Workflow {
    pub fn builder(process_id: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(process_id)
    }

    pub fn element(&self, id: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.id == id)
    }

    pub fn flow(&self, id: &str) -> Option<&SequenceFlow> {
        self.flows.iter().find(|f| f.id == id)
    }

    pub fn start_event(&self) -> Option<&Element> {
        self.elements
            .iter()
            .find(|e| e.kind == ElementKind::StartEvent)
    }

    /// outgoing flows of `element_id` in declaration order
    pub fn outgoing(&self, element_id: &str) -> Vec<&SequenceFlow> {
        self.flows.iter().filter(|f| f.source == element_id).collect()
    }

    /// check the graph can be executed; the error names the first problem found
    pub fn validate(&self) -> Result<(), String> {
        if self.process_id.trim().is_empty() {
            return Err("process id must not be empty".to_string());
        }

        let mut ids = BTreeSet::new();
        for id in self
            .elements
            .iter()
            .map(|e| &e.id)
            .chain(self.flows.iter().map(|f| &f.id))
        {
            if id.trim().is_empty() {
                return Err("element ids must not be empty".to_string());
            }
            if id == &self.process_id || !ids.insert(id.as_str()) {
                return Err(format!("duplicate element id '{}'", id));
            }
        }

        let starts = self
            .elements
            .iter()
            .filter(|e| e.kind == ElementKind::StartEvent)
            .count();
        if starts != 1 {
            return Err(format!("expected exactly one start event, found {}", starts));
        }

        for flow in &self.flows {
            for end in [&flow.source, &flow.target] {
                if self.element(end).is_none() {
                    return Err(format!(
                        "sequence flow '{}' references unknown element '{}'",
                        flow.id, end
                    ));
                }
            }
        }

        for element in &self.elements {
            let incoming = self.flows.iter().filter(|f| f.target == element.id).count();
            let outgoing = self.outgoing(&element.id).len();
            match &element.kind {
                ElementKind::StartEvent if incoming > 0 => {
                    return Err(format!("start event '{}' has incoming flows", element.id))
                }
                ElementKind::EndEvent if outgoing > 0 => {
                    return Err(format!("end event '{}' has outgoing flows", element.id))
                }
                ElementKind::EndEvent => {}
                _ if outgoing == 0 => {
                    return Err(format!("element '{}' has no outgoing flow", element.id))
                }
                ElementKind::ServiceTask { job_type, .. } if job_type.trim().is_empty() => {
                    return Err(format!("service task '{}' has no job type", element.id))
                }
                ElementKind::MessageCatchEvent {
                    message_name,
                    correlation_key,
                } if message_name.trim().is_empty() || correlation_key.trim().is_empty() => {
                    return Err(format!(
                        "message catch event '{}' needs a message name and correlation key",
                        element.id
                    ))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// builds a workflow whose flow nodes are chained in the order they are added
#[derive(Debug)]
pub struct WorkflowBuilder {
    workflow: Workflow,
}

impl WorkflowBuilder {
    pub fn new(process_id: impl Into<String>) -> Self {
        Self {
            workflow: Workflow {
                process_id: process_id.into(),
                elements: Vec::new(),
                flows: Vec::new(),
            },
        }
    }

    fn add(mut self, id: &str, kind: ElementKind) -> Self {
        if let Some(previous) = self.workflow.elements.last() {
            let flow = SequenceFlow {
                id: format!("{}-{}", previous.id, id),
                source: previous.id.clone(),
                target: id.to_string(),
            };
            self.workflow.flows.push(flow);
        }
        self.workflow.elements.push(Element {
            id: id.to_string(),
            kind,
        });
        self
    }

    pub fn start_event(self, id: &str) -> Self {
        self.add(id, ElementKind::StartEvent)
    }

    pub fn end_event(self, id: &str) -> Self {
        self.add(id, ElementKind::EndEvent)
    }

    pub fn service_task(self, id: &str, job_type: &str, retries: u32) -> Self {
        self.add(
            id,
            ElementKind::ServiceTask {
                job_type: job_type.to_string(),
                retries,
            },
        )
    }

    pub fn timer_catch_event(self, id: &str, duration: u64) -> Self {
        self.add(id, ElementKind::TimerCatchEvent { duration })
    }

    pub fn message_catch_event(self, id: &str, message_name: &str, correlation_key: &str) -> Self {
        self.add(
            id,
            ElementKind::MessageCatchEvent {
                message_name: message_name.to_string(),
                correlation_key: correlation_key.to_string(),
            },
        )
    }

    pub fn build(self) -> Workflow {
        self.workflow
    }
}

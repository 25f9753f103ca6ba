//! # incident
//!
//! why: remember what is blocking a job or an element until someone resolves it
//! relations: written by processor/incident.rs, queried by processor/job.rs on completion
//! what: IncidentState

use super::column::Column;
use crate::record::IncidentRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentState {
    incidents: Column<u64, IncidentRecord>,
    job_incidents: Column<u64, u64>,
    element_incidents: Column<u64, u64>,
}

impl IncidentState {
    pub fn is_job_incident(incident: &IncidentRecord) -> bool {
        incident.job_key != 0
    }

    pub fn create(&mut self, key: u64, incident: IncidentRecord) {
        if Self::is_job_incident(&incident) {
            self.job_incidents.insert(incident.job_key, key);
        } else {
            self.element_incidents
                .insert(incident.element_instance_key, key);
        }
        self.incidents.insert(key, incident);
    }

    pub fn get(&self, key: u64) -> Option<&IncidentRecord> {
        self.incidents.get(&key)
    }

    pub fn delete(&mut self, key: u64) -> Option<IncidentRecord> {
        let incident = self.incidents.remove(&key)?;
        if Self::is_job_incident(&incident) {
            self.job_incidents.remove(&incident.job_key);
        } else {
            self.element_incidents
                .remove(&incident.element_instance_key);
        }
        Some(incident)
    }

    pub fn job_incident_key(&self, job_key: u64) -> Option<u64> {
        self.job_incidents.get(&job_key).copied()
    }

    pub fn element_incident_key(&self, element_instance_key: u64) -> Option<u64> {
        self.element_incidents.get(&element_instance_key).copied()
    }

    pub fn len(&self) -> usize {
        self.incidents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.incidents.is_empty()
    }
}

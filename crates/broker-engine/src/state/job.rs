//! # job
//!
//! why: track every job through activatable, activated and failed
//! relations: mutated by processor/job.rs, read by trigger.rs for deadlines and processor/incident.rs
//! what: JobLifecycle, JobState

use super::column::Column;
use crate::record::JobRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobLifecycle {
    Activatable,
    Activated,
    Failed,
}

impl fmt::Display for JobLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobLifecycle::Activatable => "ACTIVATABLE",
            JobLifecycle::Activated => "ACTIVATED",
            JobLifecycle::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobState {
    jobs: Column<u64, JobRecord>,
    states: Column<u64, JobLifecycle>,
    /// (job type, key) of jobs waiting for a worker
    activatable: Column<(String, u64), ()>,
    /// (deadline, key) of activated jobs
    deadlines: Column<(u64, u64), ()>,
}

impl JobState {
    pub fn exists(&self, key: u64) -> bool {
        self.jobs.contains(&key)
    }

    pub fn get(&self, key: u64) -> Option<&JobRecord> {
        self.jobs.get(&key)
    }

    pub fn lifecycle(&self, key: u64) -> Option<JobLifecycle> {
        self.states.get(&key).copied()
    }

    pub fn is_in_state(&self, key: u64, lifecycle: JobLifecycle) -> bool {
        self.lifecycle(key) == Some(lifecycle)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// drop every index entry of `key`, leaving the record in place
    fn unindex(&mut self, key: u64) {
        if let Some(job) = self.jobs.get(&key) {
            let type_key = (job.job_type.clone(), key);
            let deadline_key = (job.deadline, key);
            self.activatable.remove(&type_key);
            self.deadlines.remove(&deadline_key);
        }
    }

    fn put(&mut self, key: u64, job: JobRecord, lifecycle: JobLifecycle) {
        self.unindex(key);
        match lifecycle {
            JobLifecycle::Activatable => {
                self.activatable.insert((job.job_type.clone(), key), ());
            }
            JobLifecycle::Activated => {
                self.deadlines.insert((job.deadline, key), ());
            }
            JobLifecycle::Failed => {}
        }
        self.jobs.insert(key, job);
        self.states.insert(key, lifecycle);
    }

    pub fn create(&mut self, key: u64, job: JobRecord) {
        self.put(key, job, JobLifecycle::Activatable);
    }

    pub fn activate(&mut self, key: u64, job: JobRecord) {
        self.put(key, job, JobLifecycle::Activated);
    }

    /// an activated job that ran past its deadline becomes activatable again
    pub fn timeout(&mut self, key: u64, mut job: JobRecord) {
        job.deadline = 0;
        job.worker.clear();
        self.put(key, job, JobLifecycle::Activatable);
    }

    pub fn fail(&mut self, key: u64, mut job: JobRecord) {
        job.deadline = 0;
        let lifecycle = if job.retries > 0 {
            JobLifecycle::Activatable
        } else {
            JobLifecycle::Failed
        };
        self.put(key, job, lifecycle);
    }

    pub fn update_retries(&mut self, key: u64, job: JobRecord) {
        self.put(key, job, JobLifecycle::Activatable);
    }

    pub fn delete(&mut self, key: u64) -> Option<JobRecord> {
        self.unindex(key);
        self.states.remove(&key);
        self.jobs.remove(&key)
    }

    /// activatable jobs of `job_type` in key order
    pub fn activatable(&self, job_type: &str, limit: usize) -> Vec<u64> {
        let start = (job_type.to_string(), 0);
        self.activatable
            .range(start..)
            .take_while(|((t, _), _)| t == job_type)
            .map(|((_, key), _)| *key)
            .take(limit)
            .collect()
    }

    /// activated jobs whose deadline is at or before `now`
    pub fn expired(&self, now: u64) -> Vec<u64> {
        self.deadlines
            .range(..=(now, u64::MAX))
            .map(|((_, key), _)| *key)
            .collect()
    }
}

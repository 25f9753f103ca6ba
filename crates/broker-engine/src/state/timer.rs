//! # timer
//!
//! why: timers of catch events waiting for their due date
//! relations: written by processor/timer.rs, due timers picked up by trigger.rs
//! what: TimerState

use super::column::Column;
use crate::record::TimerRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerState {
    /// (element instance key, timer key)
    timers: Column<(u64, u64), TimerRecord>,
    /// (due date, timer key) -> element instance key
    due: Column<(u64, u64), u64>,
}

impl TimerState {
    pub fn put(&mut self, key: u64, timer: TimerRecord) {
        self.due
            .insert((timer.due_date, key), timer.element_instance_key);
        self.timers.insert((timer.element_instance_key, key), timer);
    }

    pub fn get(&self, element_instance_key: u64, key: u64) -> Option<&TimerRecord> {
        self.timers.get(&(element_instance_key, key))
    }

    pub fn remove(&mut self, element_instance_key: u64, key: u64) -> Option<TimerRecord> {
        let timer = self.timers.remove(&(element_instance_key, key))?;
        self.due.remove(&(timer.due_date, key));
        Some(timer)
    }

    /// (timer key, record) of timers due at or before `now`
    pub fn due(&self, now: u64) -> Vec<(u64, TimerRecord)> {
        self.due
            .range(..=(now, u64::MAX))
            .filter_map(|((_, key), element)| {
                self.timers
                    .get(&(*element, *key))
                    .map(|timer| (*key, timer.clone()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

//! # trigger
//!
//! why: turn the passage of time into commands, since state itself never reads a clock
//! relations: fired by the leading partition.rs, intervals from config.rs, reads JobState / TimerState / MessageState
//! what: TimeTriggers

use crate::config::EngineConfig;
use crate::record::{Intent, Record, RecordValue};
use crate::state::PartitionState;

/// next check time of each trigger; leader only, never replicated
#[derive(Debug, Clone, Default)]
pub struct TimeTriggers {
    next_job_timeout_check: u64,
    next_timer_check: u64,
    next_message_ttl_check: u64,
}

impl TimeTriggers {
    pub fn new() -> Self {
        Self::default()
    }

    /// check everything at `now`, used when leadership is (re)gained
    pub fn reset(&mut self, now: u64) {
        self.next_job_timeout_check = now;
        self.next_timer_check = now;
        self.next_message_ttl_check = now;
    }

    /// commands for every trigger that is due at `now`
    ///
    /// job TIME_OUT for activated jobs past their deadline, timer TRIGGER for
    /// due timers, message DELETE for messages past their time to live
    pub fn due_commands(&mut self, config: &EngineConfig, state: &PartitionState, now: u64) -> Vec<Record> {
        let mut commands = Vec::new();

        if now >= self.next_job_timeout_check {
            self.next_job_timeout_check = now + config.job_timeout_check_interval;
            for key in state.jobs.expired(now) {
                if let Some(job) = state.jobs.get(key) {
                    commands.push(Record::command(key, Intent::TimeOut, RecordValue::Job(job.clone())));
                }
            }
        }

        if now >= self.next_timer_check {
            self.next_timer_check = now + config.timer_check_interval;
            for (key, timer) in state.timers.due(now) {
                commands.push(Record::command(key, Intent::Trigger, RecordValue::Timer(timer)));
            }
        }

        if now >= self.next_message_ttl_check {
            self.next_message_ttl_check = now + config.message_ttl_check_interval;
            for key in state.messages.expired(now) {
                if let Some(stored) = state.messages.get(key) {
                    commands.push(Record::command(
                        key,
                        Intent::Delete,
                        RecordValue::Message(stored.message.clone()),
                    ));
                }
            }
        }

        commands
    }
}

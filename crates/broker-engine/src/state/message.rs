//! # message
//!
//! why: buffer published messages until they expire so late subscriptions can still correlate
//! relations: written by processor/message.rs, read by processor/subscription.rs, expired by trigger.rs
//! what: MessageState

use super::column::Column;
use crate::record::MessageRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub message: MessageRecord,
    pub deadline: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageState {
    messages: Column<u64, StoredMessage>,
    /// (name, correlation key, message key)
    correlation: Column<(String, String, u64), ()>,
    /// (name, correlation key, message id) -> message key
    ids: Column<(String, String, String), u64>,
    /// (deadline, message key)
    deadlines: Column<(u64, u64), ()>,
}

impl MessageState {
    pub fn put(&mut self, key: u64, message: MessageRecord, deadline: u64) {
        let name = message.name.clone();
        let correlation_key = message.correlation_key.clone();
        if !message.message_id.is_empty() {
            self.ids.insert(
                (name.clone(), correlation_key.clone(), message.message_id.clone()),
                key,
            );
        }
        self.correlation.insert((name, correlation_key, key), ());
        self.deadlines.insert((deadline, key), ());
        self.messages.insert(key, StoredMessage { message, deadline });
    }

    pub fn get(&self, key: u64) -> Option<&StoredMessage> {
        self.messages.get(&key)
    }

    pub fn exists(&self, name: &str, correlation_key: &str, message_id: &str) -> bool {
        self.ids.contains(&(
            name.to_string(),
            correlation_key.to_string(),
            message_id.to_string(),
        ))
    }

    pub fn remove(&mut self, key: u64) -> Option<StoredMessage> {
        let stored = self.messages.remove(&key)?;
        let name = stored.message.name.clone();
        let correlation_key = stored.message.correlation_key.clone();
        self.ids.remove(&(
            name.clone(),
            correlation_key.clone(),
            stored.message.message_id.clone(),
        ));
        self.correlation.remove(&(name, correlation_key, key));
        self.deadlines.remove(&(stored.deadline, key));
        Some(stored)
    }

    /// first buffered message for `name` and `correlation_key` still alive at `now`
    pub fn first_alive(&self, name: &str, correlation_key: &str, now: u64) -> Option<(u64, &StoredMessage)> {
        let start = (name.to_string(), correlation_key.to_string(), 0);
        let end = (name.to_string(), correlation_key.to_string(), u64::MAX);
        self.correlation
            .range(start..=end)
            .filter_map(|((_, _, key), _)| self.messages.get(key).map(|m| (*key, m)))
            .find(|(_, m)| m.deadline > now)
    }

    /// keys of messages whose time to live ran out at or before `now`
    pub fn expired(&self, now: u64) -> Vec<u64> {
        self.deadlines
            .range(..=(now, u64::MAX))
            .map(|((_, key), _)| *key)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

//! # subscription
//!
//! why: message catch events waiting for a matching message
//! relations: opened by processor/bpmn.rs, driven by processor/subscription.rs and processor/message.rs
//! what: SubscriptionLifecycle, Subscription, SubscriptionState

use super::column::Column;
use crate::record::SubscriptionRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionLifecycle {
    Opening,
    Opened,
    Closing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub record: SubscriptionRecord,
    pub lifecycle: SubscriptionLifecycle,
}

impl Subscription {
    pub fn is_opening(&self) -> bool {
        self.lifecycle == SubscriptionLifecycle::Opening
    }

    pub fn is_opened(&self) -> bool {
        self.lifecycle == SubscriptionLifecycle::Opened
    }

    pub fn is_closing(&self) -> bool {
        self.lifecycle == SubscriptionLifecycle::Closing
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionState {
    /// (element instance key, message name)
    subscriptions: Column<(u64, String), Subscription>,
    /// (message name, correlation key, element instance key)
    correlation: Column<(String, String, u64), ()>,
}

impl SubscriptionState {
    pub fn put_opening(&mut self, record: SubscriptionRecord) {
        let key = (record.element_instance_key, record.message_name.clone());
        self.subscriptions.insert(
            key,
            Subscription {
                record,
                lifecycle: SubscriptionLifecycle::Opening,
            },
        );
    }

    pub fn get(&self, element_instance_key: u64, message_name: &str) -> Option<&Subscription> {
        self.subscriptions
            .get(&(element_instance_key, message_name.to_string()))
    }

    fn set_lifecycle(&mut self, element_instance_key: u64, message_name: &str, lifecycle: SubscriptionLifecycle) {
        let key = (element_instance_key, message_name.to_string());
        let Some(subscription) = self.subscriptions.get_mut(&key) else {
            return;
        };
        let previous = subscription.lifecycle;
        subscription.lifecycle = lifecycle;
        let index = (
            message_name.to_string(),
            subscription.record.correlation_key.clone(),
            element_instance_key,
        );
        // only opened subscriptions take part in correlation
        if lifecycle == SubscriptionLifecycle::Opened {
            self.correlation.insert(index, ());
        } else if previous == SubscriptionLifecycle::Opened {
            self.correlation.remove(&index);
        }
    }

    pub fn open(&mut self, element_instance_key: u64, message_name: &str) {
        self.set_lifecycle(element_instance_key, message_name, SubscriptionLifecycle::Opened);
    }

    pub fn close(&mut self, element_instance_key: u64, message_name: &str) {
        self.set_lifecycle(element_instance_key, message_name, SubscriptionLifecycle::Closing);
    }

    pub fn remove(&mut self, element_instance_key: u64, message_name: &str) -> Option<Subscription> {
        let subscription = self
            .subscriptions
            .remove(&(element_instance_key, message_name.to_string()))?;
        self.correlation.remove(&(
            message_name.to_string(),
            subscription.record.correlation_key.clone(),
            element_instance_key,
        ));
        Some(subscription)
    }

    /// opened subscriptions waiting for `name` with `correlation_key`, in element key order
    pub fn opened_for(&self, name: &str, correlation_key: &str) -> Vec<&Subscription> {
        let start = (name.to_string(), correlation_key.to_string(), 0);
        let end = (name.to_string(), correlation_key.to_string(), u64::MAX);
        self.correlation
            .range(start..=end)
            .filter_map(|((name, _, element), _)| self.subscriptions.get(&(*element, name.clone())))
            .collect()
    }

    /// every subscription of an element instance, whatever its lifecycle
    pub fn of_element(&self, element_instance_key: u64) -> Vec<&Subscription> {
        self.subscriptions
            .range((element_instance_key, String::new())..)
            .take_while(|((element, _), _)| *element == element_instance_key)
            .map(|(_, subscription)| subscription)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

//! Runtime state and the record appliers.
//!
//! `EngineState` owns every mutable runtime structure: element instances,
//! variable documents, event subscriptions, buffered messages, held event
//! triggers, and open incidents. The only way to mutate it is
//! [`EngineState::apply`], which turns one log record into one state
//! change. Replaying a record stream therefore reconstructs an identical
//! state.

pub mod variables;

use std::collections::HashMap;

use serde_json::Value;

use crate::domain::{
    ElementInstance, ElementRecord, Incident, Lifecycle, Record, RecordBody,
};

pub use variables::VariableStore;

/// An open boundary/start-event subscription on a scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub key: u64,
    pub scope_key: u64,
    /// The catching element (boundary event, or start event of an event
    /// sub-process)
    pub element_id: String,
    pub message_name: String,
    pub interrupting: bool,
}

/// A message that started a process instance and waits for its outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedMessage {
    pub key: u64,
    pub name: String,
    pub correlation_key: String,
    pub process_instance_key: u64,
    pub variables: Vec<(String, Value)>,
}

/// An event that fired for an element which must terminate before the
/// event can activate.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTrigger {
    pub element_id: String,
    pub variables: Vec<(String, Value)>,
}

/// All runtime state of one engine partition.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    instances: HashMap<u64, ElementInstance>,
    pub variables: VariableStore,
    incidents: HashMap<u64, Incident>,
    subscriptions: HashMap<u64, Subscription>,
    buffered_messages: HashMap<u64, BufferedMessage>,
    event_triggers: HashMap<u64, EventTrigger>,
}

impl EngineState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one record. This is the single mutation path; processing and
    /// replay both go through it.
    pub fn apply(&mut self, record: &Record) {
        match &record.body {
            RecordBody::ElementActivating(r) => self.apply_activating(r),
            RecordBody::ElementActivated(r) => {
                self.set_state(r.element_instance_key, Lifecycle::Activated)
            }
            RecordBody::ElementCompleting(r) => {
                self.set_state(r.element_instance_key, Lifecycle::Completing)
            }
            RecordBody::ElementCompleted(r) => self.remove_instance(r),
            RecordBody::ElementTerminating(r) => {
                self.set_state(r.element_instance_key, Lifecycle::Terminating)
            }
            RecordBody::ElementTerminated(r) => self.remove_instance(r),
            RecordBody::VariableSet {
                scope_key,
                name,
                value,
            } => self.variables.set_local(*scope_key, name.clone(), value.clone()),
            RecordBody::ScopeInterrupted {
                element_instance_key,
            } => {
                if let Some(instance) = self.instances.get_mut(element_instance_key) {
                    instance.interrupted = true;
                }
            }
            RecordBody::IncidentCreated(incident) => {
                self.incidents.insert(incident.key, incident.clone());
            }
            RecordBody::IncidentResolved { incident_key } => {
                self.incidents.remove(incident_key);
            }
            RecordBody::MessageBuffered {
                message_key,
                name,
                correlation_key,
                process_instance_key,
                variables,
            } => {
                self.buffered_messages.insert(
                    *message_key,
                    BufferedMessage {
                        key: *message_key,
                        name: name.clone(),
                        correlation_key: correlation_key.clone(),
                        process_instance_key: *process_instance_key,
                        variables: variables.clone(),
                    },
                );
            }
            RecordBody::MessageCorrelated { message_key } => {
                self.buffered_messages.remove(message_key);
            }
            RecordBody::SubscriptionOpened {
                subscription_key,
                scope_key,
                element_id,
                message_name,
                interrupting,
            } => {
                self.subscriptions.insert(
                    *subscription_key,
                    Subscription {
                        key: *subscription_key,
                        scope_key: *scope_key,
                        element_id: element_id.clone(),
                        message_name: message_name.clone(),
                        interrupting: *interrupting,
                    },
                );
            }
            RecordBody::SubscriptionClosed { subscription_key } => {
                self.subscriptions.remove(subscription_key);
            }
            RecordBody::EventTriggered {
                element_instance_key,
                element_id,
                variables,
            } => {
                self.event_triggers.insert(
                    *element_instance_key,
                    EventTrigger {
                        element_id: element_id.clone(),
                        variables: variables.clone(),
                    },
                );
            }
        }
    }

    fn apply_activating(&mut self, r: &ElementRecord) {
        self.instances.insert(
            r.element_instance_key,
            ElementInstance {
                key: r.element_instance_key,
                element_id: r.element_id.clone(),
                kind: r.kind,
                state: Lifecycle::Activating,
                flow_scope_key: r.flow_scope_key,
                process_instance_key: r.process_instance_key,
                process_definition_key: r.process_definition_key,
                parent_process_instance_key: r.parent_process_instance_key,
                parent_element_instance_key: r.parent_element_instance_key,
                active_children: 0,
                loop_counter: r.loop_counter,
                interrupted: false,
                called_child_key: 0,
            },
        );
        if r.flow_scope_key != 0 {
            if let Some(parent) = self.instances.get_mut(&r.flow_scope_key) {
                parent.active_children += 1;
            }
        }
        // a child process activating links itself to its call activity, so
        // the link is restored on replay like everything else
        if r.parent_element_instance_key != 0 {
            if let Some(caller) = self.instances.get_mut(&r.parent_element_instance_key) {
                caller.called_child_key = r.element_instance_key;
            }
        }
    }

    fn set_state(&mut self, key: u64, state: Lifecycle) {
        if let Some(instance) = self.instances.get_mut(&key) {
            instance.state = state;
        }
    }

    fn remove_instance(&mut self, r: &ElementRecord) {
        self.instances.remove(&r.element_instance_key);
        self.variables.remove_scope(r.element_instance_key);
        self.event_triggers.remove(&r.element_instance_key);
        if r.flow_scope_key != 0 {
            if let Some(parent) = self.instances.get_mut(&r.flow_scope_key) {
                parent.active_children = parent.active_children.saturating_sub(1);
            }
        }
    }

    // ── queries ──

    pub fn instance(&self, key: u64) -> Option<&ElementInstance> {
        self.instances.get(&key)
    }

    /// Direct children of a scope, in key order (deterministic).
    pub fn children(&self, scope_key: u64) -> Vec<&ElementInstance> {
        let mut children: Vec<_> = self
            .instances
            .values()
            .filter(|i| i.flow_scope_key == scope_key)
            .collect();
        children.sort_by_key(|i| i.key);
        children
    }

    /// Process instances spawned by the given call activity.
    pub fn called_child(&self, call_activity_key: u64) -> Option<&ElementInstance> {
        let key = self.instances.get(&call_activity_key)?.called_child_key;
        self.instances.get(&key)
    }

    /// Read a variable visible in a scope: local first, then ancestors.
    pub fn variable(&self, scope_key: u64, name: &str) -> Option<Value> {
        let mut scope = scope_key;
        loop {
            if let Some(value) = self.variables.get_local(scope, name) {
                return Some(value.clone());
            }
            let instance = self.instances.get(&scope)?;
            if instance.flow_scope_key == 0 {
                return None;
            }
            scope = instance.flow_scope_key;
        }
    }

    /// Every variable visible in a scope, ancestor values shadowed by
    /// local ones, ordered by name.
    pub fn visible_variables(&self, scope_key: u64) -> Vec<(String, Value)> {
        let mut merged = std::collections::BTreeMap::new();
        let mut chain = Vec::new();
        let mut scope = scope_key;
        loop {
            chain.push(scope);
            match self.instances.get(&scope) {
                Some(instance) if instance.flow_scope_key != 0 => {
                    scope = instance.flow_scope_key
                }
                _ => break,
            }
        }
        // outermost first so inner scopes overwrite
        for scope in chain.into_iter().rev() {
            if let Some(doc) = self.variables.document(scope) {
                for (name, value) in doc {
                    merged.insert(name.clone(), value.clone());
                }
            }
        }
        merged.into_iter().collect()
    }

    pub fn incident(&self, key: u64) -> Option<&Incident> {
        self.incidents.get(&key)
    }

    /// Open incidents of one process instance, in key order.
    pub fn incidents_for_instance(&self, process_instance_key: u64) -> Vec<&Incident> {
        let mut incidents: Vec<_> = self
            .incidents
            .values()
            .filter(|i| i.process_instance_key == process_instance_key)
            .collect();
        incidents.sort_by_key(|i| i.key);
        incidents
    }

    pub fn incidents_for_element(&self, element_instance_key: u64) -> Vec<&Incident> {
        let mut incidents: Vec<_> = self
            .incidents
            .values()
            .filter(|i| i.element_instance_key == element_instance_key)
            .collect();
        incidents.sort_by_key(|i| i.key);
        incidents
    }

    /// Open subscriptions matching a message name, in key order.
    pub fn subscriptions_for_message(&self, name: &str) -> Vec<&Subscription> {
        let mut matches: Vec<_> = self
            .subscriptions
            .values()
            .filter(|s| s.message_name == name)
            .collect();
        matches.sort_by_key(|s| s.key);
        matches
    }

    /// Open subscriptions owned by a scope, in key order.
    pub fn subscriptions_for_scope(&self, scope_key: u64) -> Vec<&Subscription> {
        let mut matches: Vec<_> = self
            .subscriptions
            .values()
            .filter(|s| s.scope_key == scope_key)
            .collect();
        matches.sort_by_key(|s| s.key);
        matches
    }

    /// The buffered message that started the given process instance.
    pub fn buffered_message_for(&self, process_instance_key: u64) -> Option<&BufferedMessage> {
        self.buffered_messages
            .values()
            .find(|m| m.process_instance_key == process_instance_key)
    }

    pub fn event_trigger(&self, element_instance_key: u64) -> Option<&EventTrigger> {
        self.event_triggers.get(&element_instance_key)
    }

    /// All live instances, in key order. Used by status reporting and
    /// tests.
    pub fn all_instances(&self) -> Vec<&ElementInstance> {
        let mut instances: Vec<_> = self.instances.values().collect();
        instances.sort_by_key(|i| i.key);
        instances
    }
}

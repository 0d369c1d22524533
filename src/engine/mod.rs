//! The engine: one partition's command loop and its shared behaviors.
//!
//! This module contains:
//! - Engine: the single-threaded command loop and record writer
//! - Transitions: the lifecycle transition coordinator
//! - Mappings: the variable-scope manager
//! - Subscriptions: the event subscription/correlation manager
//! - Incidents: recoverable-failure handling
//! - Definitions: the process-definition cache
//! - Journal: append-only JSONL persistence of the record log
//!
//! Exactly one command is processed at a time, in order. Every visible
//! effect of processing is a record appended through [`Engine::append`],
//! which also applies it to state; replaying the same records rebuilds
//! the same state.

pub mod definitions;
pub mod incidents;
pub mod journal;
pub mod mappings;
pub mod subscriptions;
pub mod transitions;

use std::collections::VecDeque;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    Command, DeployedDefinition, ElementContext, ElementKind, ElementRecord, ExecutableElement,
    Lifecycle, ProcessDefinition, Record, RecordBody,
};
use crate::processors;
use crate::state::EngineState;

pub use definitions::DefinitionCache;
pub use journal::Journal;

/// Fatal processing errors: contract violations, never retried and never
/// converted to incidents.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Expected to take transition to '{to:?}' but element '{element_id}' is in state '{from:?}'")]
    IllegalTransition {
        element_id: String,
        from: Lifecycle,
        to: Lifecycle,
    },

    #[error("{0}")]
    ProtocolViolation(String),

    #[error("No process with id '{0}' is deployed")]
    UnknownProcess(String),

    #[error("No process definition with key {0}")]
    UnknownDefinitionKey(u64),

    #[error("No element '{element_id}' in process definition '{process_id}'")]
    UnknownElement {
        process_id: String,
        element_id: String,
    },

    #[error("No element instance with key {0}")]
    UnknownInstance(u64),

    #[error("No incident with key {0}")]
    UnknownIncident(u64),

    #[error("Process '{0}' declares no none start event and no trigger is buffered")]
    NoStartEvent(String),
}

/// The runtime core. Owns all state of one partition; strictly
/// single-threaded, no suspension mid-transition.
pub struct Engine {
    pub(crate) state: EngineState,
    pub(crate) definitions: DefinitionCache,
    records: Vec<Record>,
    pending: VecDeque<Command>,
    next_key: u64,
    next_position: u64,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            state: EngineState::new(),
            definitions: DefinitionCache::new(),
            records: Vec::new(),
            pending: VecDeque::new(),
            next_key: 1,
            next_position: 1,
        }
    }

    /// Deploy a process definition into the cache.
    pub fn deploy(&mut self, definition: ProcessDefinition) -> anyhow::Result<DeployedDefinition> {
        let deployed = self.definitions.deploy(definition)?;
        info!(
            process = %deployed.definition.id,
            key = deployed.key,
            version = deployed.version,
            "Deployed process definition"
        );
        Ok(deployed)
    }

    /// Create and run a new instance of the latest version of a process.
    ///
    /// Returns the process instance key once the engine is idle again
    /// (all follow-up commands processed).
    #[instrument(skip(self, variables))]
    pub fn create_instance(
        &mut self,
        process_id: &str,
        variables: Vec<(String, Value)>,
    ) -> Result<u64, EngineError> {
        let deployed = self
            .definitions
            .latest_by_id(process_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownProcess(process_id.to_string()))?;

        let instance_key = self.generate_key();
        info!(%process_id, instance_key, "Creating process instance");

        self.pending.push_back(Command::ActivateElement {
            record: root_record(&deployed, instance_key, 0, 0),
            variables,
        });
        self.run_to_idle()?;

        Ok(instance_key)
    }

    /// Enqueue a command without processing it yet.
    pub fn submit(&mut self, command: Command) {
        self.pending.push_back(command);
    }

    /// Process queued commands one at a time until none remain.
    pub fn run_to_idle(&mut self) -> Result<(), EngineError> {
        while let Some(command) = self.pending.pop_front() {
            self.process_command(command)?;
        }
        Ok(())
    }

    fn process_command(&mut self, command: Command) -> Result<(), EngineError> {
        match command {
            Command::ActivateElement { record, variables } => {
                // activations racing a cancellation are dropped: the flow
                // scope is already terminating or gone
                if record.flow_scope_key != 0 {
                    let scope_gone = self
                        .state
                        .instance(record.flow_scope_key)
                        .map(|scope| scope.is_terminating())
                        .unwrap_or(true);
                    if scope_gone {
                        debug!(
                            element = %record.element_id,
                            scope = record.flow_scope_key,
                            "Flow scope terminating or removed, dropping activation"
                        );
                        return Ok(());
                    }
                }
                let element = self.element(record.process_definition_key, &record.element_id)?;
                debug!(element = %record.element_id, kind = ?element.kind, "Activate element");
                processors::activate(self, &element, record, variables)
            }
            Command::CompleteElement {
                element_instance_key,
            } => {
                let Some(instance) = self.state.instance(element_instance_key) else {
                    warn!(
                        key = element_instance_key,
                        "Complete command for unknown element instance, ignoring"
                    );
                    return Ok(());
                };
                let ctx = ElementContext::from(instance);
                let element = self.element(ctx.process_definition_key, &ctx.element_id)?;
                debug!(element = %ctx.element_id, key = ctx.element_instance_key, "Complete element");
                processors::complete(self, &element, &ctx)
            }
            Command::TerminateElement {
                element_instance_key,
            } => {
                let Some(instance) = self.state.instance(element_instance_key) else {
                    debug!(
                        key = element_instance_key,
                        "Terminate command for unknown element instance, ignoring"
                    );
                    return Ok(());
                };
                // idempotent under re-delivery
                if instance.is_terminating() || instance.is_terminal() {
                    debug!(
                        key = element_instance_key,
                        "Element already terminating, ignoring"
                    );
                    return Ok(());
                }
                let ctx = ElementContext::from(instance);
                let element = self.element(ctx.process_definition_key, &ctx.element_id)?;
                debug!(element = %ctx.element_id, key = ctx.element_instance_key, "Terminate element");
                processors::terminate(self, &element, &ctx)
            }
        }
    }

    /// Publish a message: correlate to open subscriptions first, else
    /// start a new instance of a process with a matching message start
    /// event. Returns the new process instance key if one was started.
    #[instrument(skip(self, variables))]
    pub fn publish_message(
        &mut self,
        name: &str,
        correlation_key: &str,
        variables: Vec<(String, Value)>,
    ) -> Result<Option<u64>, EngineError> {
        let subscriptions: Vec<_> = self
            .state
            .subscriptions_for_message(name)
            .into_iter()
            .cloned()
            .collect();

        let mut delivered = false;
        for subscription in subscriptions {
            if self.deliver_to_subscription(&subscription, &variables)? {
                delivered = true;
            }
        }
        if delivered {
            self.run_to_idle()?;
            return Ok(None);
        }

        // no open subscription: a message start event may buffer the
        // message and spawn an instance
        let target = self
            .definitions
            .latest_versions()
            .into_iter()
            .find(|d| d.definition.root().message_start_event(name).is_some())
            .cloned();

        let Some(deployed) = target else {
            warn!(message = %name, "No subscription or start event for message, dropping");
            return Ok(None);
        };

        let instance_key = self.generate_key();
        let message_key = self.generate_key();
        info!(message = %name, instance_key, "Message starts new process instance");

        self.append(RecordBody::MessageBuffered {
            message_key,
            name: name.to_string(),
            correlation_key: correlation_key.to_string(),
            process_instance_key: instance_key,
            variables: variables.clone(),
        });
        self.pending.push_back(Command::ActivateElement {
            record: root_record(&deployed, instance_key, 0, 0),
            variables,
        });
        self.run_to_idle()?;

        Ok(Some(instance_key))
    }

    /// Write a variable into a live element scope, as when a worker hands
    /// result variables back together with a task completion.
    pub fn set_task_variable(
        &mut self,
        element_instance_key: u64,
        name: String,
        value: Value,
    ) -> Result<(), EngineError> {
        if self.state.instance(element_instance_key).is_none() {
            return Err(EngineError::UnknownInstance(element_instance_key));
        }
        self.append(RecordBody::VariableSet {
            scope_key: element_instance_key,
            name,
            value,
        });
        Ok(())
    }

    /// Rebuild state by applying a previously written record stream.
    ///
    /// Definitions are not part of the stream and must be deployed (in
    /// the same order) before replaying.
    pub fn replay(&mut self, records: &[Record]) {
        for record in records {
            self.state.apply(record);
            self.next_position = self.next_position.max(record.position + 1);
            self.next_key = self.next_key.max(highest_key(&record.body) + 1);
            self.records.push(record.clone());
        }
    }

    // ── writers and lookups shared by the behaviors and processors ──

    /// Append one record: assign its position, apply it to state, keep it
    /// in the log. The only mutation path during processing.
    pub(crate) fn append(&mut self, body: RecordBody) {
        let record = Record::new(self.next_position, body);
        self.next_position += 1;
        self.state.apply(&record);
        self.records.push(record);
    }

    pub(crate) fn generate_key(&mut self) -> u64 {
        let key = self.next_key;
        self.next_key += 1;
        key
    }

    pub(crate) fn enqueue(&mut self, command: Command) {
        self.pending.push_back(command);
    }

    pub(crate) fn deployed(&self, key: u64) -> Result<DeployedDefinition, EngineError> {
        self.definitions
            .by_key(key)
            .cloned()
            .ok_or(EngineError::UnknownDefinitionKey(key))
    }

    pub(crate) fn element(
        &self,
        definition_key: u64,
        element_id: &str,
    ) -> Result<ExecutableElement, EngineError> {
        let deployed = self.deployed(definition_key)?;
        deployed
            .definition
            .element(element_id)
            .ok_or_else(|| EngineError::UnknownElement {
                process_id: deployed.definition.id.clone(),
                element_id: element_id.to_string(),
            })
    }

    /// The container element owning `element_id` as a direct child.
    pub(crate) fn scope_element(
        &self,
        definition_key: u64,
        element_id: &str,
    ) -> Result<ExecutableElement, EngineError> {
        let deployed = self.deployed(definition_key)?;
        deployed
            .definition
            .scope_of(element_id)
            .ok_or_else(|| EngineError::UnknownElement {
                process_id: deployed.definition.id.clone(),
                element_id: element_id.to_string(),
            })
    }

    // ── read access for callers and tests ──

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn definitions(&self) -> &DefinitionCache {
        &self.definitions
    }

    /// The full record log, in order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }
}

/// The activation record of a process root.
pub(crate) fn root_record(
    deployed: &DeployedDefinition,
    instance_key: u64,
    parent_process_instance_key: u64,
    parent_element_instance_key: u64,
) -> ElementRecord {
    ElementRecord {
        element_instance_key: instance_key,
        element_id: deployed.definition.id.clone(),
        kind: ElementKind::Process,
        flow_scope_key: 0,
        process_instance_key: instance_key,
        process_definition_key: deployed.key,
        parent_process_instance_key,
        parent_element_instance_key,
        loop_counter: 0,
    }
}

/// Highest identity key referenced by a record body; replay resumes key
/// generation above it.
fn highest_key(body: &RecordBody) -> u64 {
    match body {
        RecordBody::ElementActivating(r)
        | RecordBody::ElementActivated(r)
        | RecordBody::ElementCompleting(r)
        | RecordBody::ElementCompleted(r)
        | RecordBody::ElementTerminating(r)
        | RecordBody::ElementTerminated(r) => r.element_instance_key,
        RecordBody::VariableSet { scope_key, .. } => *scope_key,
        RecordBody::ScopeInterrupted {
            element_instance_key,
        } => *element_instance_key,
        RecordBody::IncidentCreated(incident) => incident.key,
        RecordBody::IncidentResolved { incident_key } => *incident_key,
        RecordBody::MessageBuffered { message_key, .. } => *message_key,
        RecordBody::MessageCorrelated { message_key } => *message_key,
        RecordBody::SubscriptionOpened {
            subscription_key, ..
        } => *subscription_key,
        RecordBody::SubscriptionClosed { subscription_key } => *subscription_key,
        RecordBody::EventTriggered {
            element_instance_key,
            ..
        } => *element_instance_key,
    }
}

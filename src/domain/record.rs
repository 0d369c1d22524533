//! Records and commands of the sequential command/event log.
//!
//! Records are the source of truth for runtime state. The current state of
//! any process instance can be reconstructed by applying its records in
//! order; timestamps are informational only and ignored by appliers so
//! replay stays deterministic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::element::ElementKind;
use super::failure::Incident;

/// Element-addressed payload carried by every lifecycle record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRecord {
    /// Key of the element instance the record is about
    pub element_instance_key: u64,

    /// Id of the executable element
    pub element_id: String,

    /// Static kind of the element
    pub kind: ElementKind,

    /// Key of the enclosing container instance (0 for a root process)
    pub flow_scope_key: u64,

    /// Key of the owning process instance
    pub process_instance_key: u64,

    /// Key of the deployed definition
    pub process_definition_key: u64,

    /// Nonzero only for child processes spawned by a call activity
    #[serde(default)]
    pub parent_process_instance_key: u64,

    /// Key of the invoking call activity instance (0 otherwise)
    #[serde(default)]
    pub parent_element_instance_key: u64,

    /// 1-based loop counter for multi-instance children (0 otherwise)
    #[serde(default)]
    pub loop_counter: u32,
}

/// What happened. One record is appended per state change; the applier in
/// `state` is the only code that turns a record into a mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum RecordBody {
    ElementActivating(ElementRecord),
    ElementActivated(ElementRecord),
    ElementCompleting(ElementRecord),
    ElementCompleted(ElementRecord),
    ElementTerminating(ElementRecord),
    ElementTerminated(ElementRecord),

    /// A variable was written in a scope. Array rewrites carry the full
    /// updated array; the in-place index update is a store detail.
    VariableSet {
        scope_key: u64,
        name: String,
        value: Value,
    },

    /// An interrupting event fired in the scope
    ScopeInterrupted { element_instance_key: u64 },

    /// A recoverable failure was persisted
    IncidentCreated(Incident),

    /// An incident was resolved; the blocked command is re-driven
    IncidentResolved { incident_key: u64 },

    /// A message start event buffered a message and spawned an instance
    MessageBuffered {
        message_key: u64,
        name: String,
        correlation_key: String,
        process_instance_key: u64,
        variables: Vec<(String, Value)>,
    },

    /// The buffered message was answered by instance completion or
    /// termination
    MessageCorrelated { message_key: u64 },

    /// A subscription for a boundary/start event was opened on a scope
    SubscriptionOpened {
        subscription_key: u64,
        scope_key: u64,
        element_id: String,
        message_name: String,
        interrupting: bool,
    },

    /// The subscription was released
    SubscriptionClosed { subscription_key: u64 },

    /// An event fired for an element that is not ready to receive it yet
    /// (an interrupting boundary event waiting for its activity to
    /// terminate, or an event sub-process start waiting for its scope).
    /// The trigger is held on the element and cleared with it.
    EventTriggered {
        element_instance_key: u64,
        element_id: String,
        variables: Vec<(String, Value)>,
    },
}

/// One entry of the append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Position in the log, strictly increasing
    pub position: u64,

    /// When the record was written (informational; ignored on replay)
    pub timestamp: DateTime<Utc>,

    /// The state change itself
    pub body: RecordBody,
}

impl Record {
    pub fn new(position: u64, body: RecordBody) -> Self {
        Self {
            position,
            timestamp: Utc::now(),
            body,
        }
    }
}

/// Commands drive processing; they are transient and never persisted.
/// Replay rebuilds state from records alone.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Activate an element. The record's instance key is 0 unless the key
    /// was pre-generated (multi-instance children) or the command re-drives
    /// an existing instance after incident resolution.
    ActivateElement {
        record: ElementRecord,
        /// Variables written to the new scope before children activate
        /// (process creation and call-activity propagation).
        variables: Vec<(String, Value)>,
    },

    /// Complete an activated element
    CompleteElement { element_instance_key: u64 },

    /// Terminate an element; idempotent under re-delivery
    TerminateElement { element_instance_key: u64 },
}

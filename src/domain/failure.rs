//! Recoverable failures and the incidents they turn into.
//!
//! A [`Failure`] is always a returned value, never a panic. The engine
//! converts it into a persisted [`Incident`] on the raising element
//! instance; the instance stays non-terminal until the incident is
//! resolved, which re-drives the blocked command.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of a recoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The called process of a call activity could not be resolved.
    CalledElementError,

    /// A process was expected to declare a none start event but does not.
    NoneStartEventExpected,

    /// An index into a collection is out of range (the collection was
    /// mutated while the multi-instance body was running).
    ExtractValueError,

    /// An expression could not be evaluated in the given scope.
    ExpressionError,
}

/// A recoverable failure raised while preparing a lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct Failure {
    /// What class of failure this is
    pub kind: FailureKind,

    /// Human-readable description (no secrets)
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn called_element(message: impl Into<String>) -> Self {
        Self::new(FailureKind::CalledElementError, message)
    }

    pub fn extract_value(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ExtractValueError, message)
    }

    pub fn expression(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ExpressionError, message)
    }
}

/// The command an incident blocks; re-submitted on resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedIntent {
    /// The element was activating when the failure was raised
    Activate,

    /// The element was completing when the failure was raised
    Complete,
}

/// A persisted link between a [`Failure`] and the raising element instance.
///
/// Exists until explicitly resolved. While open, the instance stays in its
/// non-terminal state; unaffected branches of the same process instance
/// keep progressing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incident {
    /// Unique identifier for this incident
    pub key: u64,

    /// The element instance the failure was raised on
    pub element_instance_key: u64,

    /// The process instance the element belongs to
    pub process_instance_key: u64,

    /// What failed
    pub failure: Failure,

    /// The transition the incident blocks
    pub blocked: BlockedIntent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_display() {
        let failure = Failure::called_element("no process with id 'billing' deployed");
        assert_eq!(failure.kind, FailureKind::CalledElementError);
        assert_eq!(failure.to_string(), "no process with id 'billing' deployed");
    }

    #[test]
    fn test_failure_serialization_round_trip() {
        let failure = Failure::extract_value("index 4 out of range for collection of length 3");
        let json = serde_json::to_string(&failure).unwrap();
        let parsed: Failure = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, failure);
    }
}

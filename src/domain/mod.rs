//! Domain types for the process engine.
//!
//! This module contains the core data structures:
//! - Element: static, compiled process model
//! - Instance: mutable runtime records and their lifecycle
//! - Record: entries of the append-only command/event log
//! - Failure: recoverable failures and incidents

pub mod context;
pub mod element;
pub mod failure;
pub mod instance;
pub mod record;

// Re-export commonly used types
pub use context::ElementContext;
pub use element::{
    DeployedDefinition, ElementKind, ExecutableElement, LoopCharacteristics, LoopMode, Mapping,
    MessageDecl, ProcessDefinition,
};
pub use failure::{BlockedIntent, Failure, FailureKind, Incident};
pub use instance::{ElementInstance, Lifecycle};
pub use record::{Command, ElementRecord, Record, RecordBody};

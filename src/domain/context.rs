//! Transient per-command element context.

use super::element::ElementKind;
use super::instance::ElementInstance;
use super::record::ElementRecord;

/// Everything a processor needs to know about the element a command
/// addresses. Built per command from the record or the stored instance;
/// never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementContext {
    pub element_instance_key: u64,
    pub element_id: String,
    pub kind: ElementKind,
    pub flow_scope_key: u64,
    pub process_instance_key: u64,
    pub process_definition_key: u64,

    /// Nonzero only for child processes spawned by a call activity
    pub parent_process_instance_key: u64,

    /// Key of the invoking call activity instance (0 otherwise)
    pub parent_element_instance_key: u64,

    /// 1-based loop counter for multi-instance children (0 otherwise)
    pub loop_counter: u32,
}

impl From<&ElementRecord> for ElementContext {
    fn from(record: &ElementRecord) -> Self {
        Self {
            element_instance_key: record.element_instance_key,
            element_id: record.element_id.clone(),
            kind: record.kind,
            flow_scope_key: record.flow_scope_key,
            process_instance_key: record.process_instance_key,
            process_definition_key: record.process_definition_key,
            parent_process_instance_key: record.parent_process_instance_key,
            parent_element_instance_key: record.parent_element_instance_key,
            loop_counter: record.loop_counter,
        }
    }
}

impl From<&ElementInstance> for ElementContext {
    fn from(instance: &ElementInstance) -> Self {
        Self {
            element_instance_key: instance.key,
            element_id: instance.element_id.clone(),
            kind: instance.kind,
            flow_scope_key: instance.flow_scope_key,
            process_instance_key: instance.process_instance_key,
            process_definition_key: instance.process_definition_key,
            parent_process_instance_key: instance.parent_process_instance_key,
            parent_element_instance_key: instance.parent_element_instance_key,
            loop_counter: instance.loop_counter,
        }
    }
}

impl ElementContext {
    /// The record payload for a follow-up lifecycle transition of this
    /// element.
    pub fn to_record(&self) -> ElementRecord {
        ElementRecord {
            element_instance_key: self.element_instance_key,
            element_id: self.element_id.clone(),
            kind: self.kind,
            flow_scope_key: self.flow_scope_key,
            process_instance_key: self.process_instance_key,
            process_definition_key: self.process_definition_key,
            parent_process_instance_key: self.parent_process_instance_key,
            parent_element_instance_key: self.parent_element_instance_key,
            loop_counter: self.loop_counter,
        }
    }
}

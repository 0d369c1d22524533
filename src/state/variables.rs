//! Per-scope variable documents.
//!
//! Each scope owns an ordered key→value document. Reads that miss locally
//! fall through to ancestor scopes (handled by `EngineState`, which knows
//! the scope chain); local names shadow ancestors. The multi-instance
//! output collection uses the index-rewrite helper so a child's result
//! lands in its own slot regardless of completion order.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::domain::Failure;

/// All variable documents, keyed by scope (element instance key).
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    docs: HashMap<u64, BTreeMap<String, Value>>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a variable defined locally in the given scope.
    pub fn get_local(&self, scope_key: u64, name: &str) -> Option<&Value> {
        self.docs.get(&scope_key)?.get(name)
    }

    /// Write a variable into the given scope, creating the document on
    /// first use. Only the record applier calls this.
    pub fn set_local(&mut self, scope_key: u64, name: impl Into<String>, value: Value) {
        self.docs.entry(scope_key).or_default().insert(name.into(), value);
    }

    /// Drop the whole document of a removed scope.
    pub fn remove_scope(&mut self, scope_key: u64) {
        self.docs.remove(&scope_key);
    }

    /// The local document of a scope, ordered by name.
    pub fn document(&self, scope_key: u64) -> Option<&BTreeMap<String, Value>> {
        self.docs.get(&scope_key)
    }

    /// Build the array stored at `name` with the slot at `index` replaced.
    ///
    /// Returns the full rewritten array; the caller records it as one
    /// variable write, so the in-place rewrite stays a store detail. Fails
    /// if the variable is missing, not an array, or the index is out of
    /// range.
    pub fn replaced_at(
        &self,
        scope_key: u64,
        name: &str,
        index: usize,
        value: Value,
    ) -> Result<Value, Failure> {
        let current = self.get_local(scope_key, name).ok_or_else(|| {
            Failure::extract_value(format!("No local variable '{}' to rewrite", name))
        })?;
        let Value::Array(items) = current else {
            return Err(Failure::extract_value(format!(
                "Variable '{}' is not an array",
                name
            )));
        };
        if index >= items.len() {
            return Err(Failure::extract_value(format!(
                "Index {} out of range for '{}' of length {}",
                index,
                name,
                items.len()
            )));
        }

        let mut items = items.clone();
        items[index] = value;
        Ok(Value::Array(items))
    }
}

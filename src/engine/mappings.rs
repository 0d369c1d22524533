//! Variable-scope manager.
//!
//! Applies input/output mappings between an element scope and its flow
//! scope, and copies whole variable sets when entering and leaving call
//! activities. Mapping sources are expressions evaluated with ancestor
//! visibility; targets are always written as local variables of the
//! target scope.

use serde_json::Value;

use crate::domain::{ElementContext, ExecutableElement, Failure, Mapping, RecordBody};
use crate::expr;

use super::Engine;

impl Engine {
    /// Apply an element's input mappings: evaluate each source in the
    /// element's own scope, write the target locally.
    pub(crate) fn apply_input_mappings(
        &mut self,
        element: &ExecutableElement,
        ctx: &ElementContext,
    ) -> Result<(), Failure> {
        let writes = self.evaluate_mappings(&element.inputs, ctx.element_instance_key)?;
        self.set_local_variables(ctx.element_instance_key, writes);
        Ok(())
    }

    /// Apply an element's output mappings: evaluate each source in the
    /// element's scope, write the target into the flow scope.
    pub(crate) fn apply_output_mappings(
        &mut self,
        element: &ExecutableElement,
        ctx: &ElementContext,
    ) -> Result<(), Failure> {
        if ctx.flow_scope_key == 0 {
            return Ok(());
        }
        let writes = self.evaluate_mappings(&element.outputs, ctx.element_instance_key)?;
        self.set_local_variables(ctx.flow_scope_key, writes);
        Ok(())
    }

    fn evaluate_mappings(
        &self,
        mappings: &[Mapping],
        scope_key: u64,
    ) -> Result<Vec<(String, Value)>, Failure> {
        let state = &self.state;
        let resolver = |name: &str| state.variable(scope_key, name);

        let mut writes = Vec::with_capacity(mappings.len());
        for mapping in mappings {
            let value = expr::evaluate(&mapping.source, &resolver)?;
            writes.push((mapping.target.clone(), value));
        }
        Ok(writes)
    }

    /// Evaluate an expression with the visibility of the given scope.
    pub(crate) fn evaluate_in_scope(
        &self,
        expression: &str,
        scope_key: u64,
    ) -> Result<Value, Failure> {
        let state = &self.state;
        let resolver = |name: &str| state.variable(scope_key, name);
        expr::evaluate(expression, &resolver)
    }

    /// Record a batch of local variable writes on one scope.
    pub(crate) fn set_local_variables(&mut self, scope_key: u64, writes: Vec<(String, Value)>) {
        for (name, value) in writes {
            self.append(RecordBody::VariableSet {
                scope_key,
                name,
                value,
            });
        }
    }

    /// Copy the local document of one scope into another, as used when a
    /// called process hands its results back to the call activity.
    pub(crate) fn copy_local_document(&mut self, from_scope: u64, to_scope: u64) {
        let writes: Vec<(String, Value)> = self
            .state
            .variables
            .document(from_scope)
            .map(|doc| doc.iter().map(|(n, v)| (n.clone(), v.clone())).collect())
            .unwrap_or_default();
        self.set_local_variables(to_scope, writes);
    }
}

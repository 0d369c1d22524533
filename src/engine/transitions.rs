//! Lifecycle transition coordinator.
//!
//! Sole authority for legal element-instance transitions and for creating
//! and terminating children. Processors delegate here instead of mutating
//! state directly; an illegal transition is a fatal [`EngineError`], not
//! an incident.

use serde_json::Value;
use tracing::debug;

use crate::domain::{
    BlockedIntent, Command, DeployedDefinition, ElementContext, ElementKind, ElementRecord,
    ExecutableElement, Failure, Lifecycle, RecordBody,
};
use crate::processors;

use super::{Engine, EngineError};

impl Engine {
    /// Enter ACTIVATING. Creates the instance unless the command re-drives
    /// an existing one after incident resolution; returns the context and
    /// whether the instance is fresh.
    pub(crate) fn transition_to_activating(
        &mut self,
        record: &ElementRecord,
    ) -> Result<(ElementContext, bool), EngineError> {
        if record.element_instance_key != 0 {
            if let Some(instance) = self.state.instance(record.element_instance_key) {
                // the Activate command is being re-processed as the result
                // of resolving an incident; the instance already exists
                debug!(key = instance.key, "Re-driving activation after incident");
                return Ok((ElementContext::from(instance), false));
            }
        }

        let mut record = record.clone();
        if record.element_instance_key == 0 {
            record.element_instance_key = self.generate_key();
        }
        let ctx = ElementContext::from(&record);
        self.append(RecordBody::ElementActivating(record));
        Ok((ctx, true))
    }

    pub(crate) fn transition_to_activated(
        &mut self,
        ctx: &ElementContext,
    ) -> Result<(), EngineError> {
        self.append_transition(ctx, Lifecycle::Activated)
    }

    /// Enter COMPLETING. Returns `false` when the instance is already
    /// completing (the Complete command re-drives a blocked completion).
    pub(crate) fn transition_to_completing(
        &mut self,
        ctx: &ElementContext,
    ) -> Result<bool, EngineError> {
        let instance = self
            .state
            .instance(ctx.element_instance_key)
            .ok_or(EngineError::UnknownInstance(ctx.element_instance_key))?;
        if instance.state == Lifecycle::Completing {
            debug!(key = instance.key, "Re-driving completion after incident");
            return Ok(false);
        }
        self.append_transition(ctx, Lifecycle::Completing)?;
        Ok(true)
    }

    /// Enter COMPLETED and finish the execution path: fire the flow-scope
    /// hooks for elements that end a path, take outgoing flows otherwise.
    ///
    /// A recoverable failure from the before-hook leaves the element in
    /// COMPLETING behind an incident.
    pub(crate) fn transition_to_completed(
        &mut self,
        element: &ExecutableElement,
        ctx: &ElementContext,
    ) -> Result<(), EngineError> {
        // a completing child process is not an execution path of its
        // caller; the call activity is notified explicitly by the process
        // processor
        let end_of_path = ctx.kind != ElementKind::Process && element.outgoing.is_empty();

        if end_of_path {
            if let Some(failure) = self.before_execution_path_completed(element, ctx)? {
                self.create_incident(failure, ctx, BlockedIntent::Complete);
                return Ok(());
            }
        }

        self.append_transition(ctx, Lifecycle::Completed)?;

        if end_of_path {
            self.after_execution_path_completed(element, ctx)?;
        } else if ctx.kind != ElementKind::Process {
            self.take_outgoing_flows(element, ctx)?;
        }
        Ok(())
    }

    pub(crate) fn transition_to_terminating(
        &mut self,
        ctx: &ElementContext,
    ) -> Result<(), EngineError> {
        self.append_transition(ctx, Lifecycle::Terminating)
    }

    pub(crate) fn transition_to_terminated(
        &mut self,
        ctx: &ElementContext,
    ) -> Result<(), EngineError> {
        self.append_transition(ctx, Lifecycle::Terminated)
    }

    fn append_transition(
        &mut self,
        ctx: &ElementContext,
        to: Lifecycle,
    ) -> Result<(), EngineError> {
        let instance = self
            .state
            .instance(ctx.element_instance_key)
            .ok_or(EngineError::UnknownInstance(ctx.element_instance_key))?;
        let from = instance.state;
        if !from.can_transition_to(to) {
            return Err(EngineError::IllegalTransition {
                element_id: ctx.element_id.clone(),
                from,
                to,
            });
        }

        let record = ctx.to_record();
        let body = match to {
            Lifecycle::Activated => RecordBody::ElementActivated(record),
            Lifecycle::Completing => RecordBody::ElementCompleting(record),
            Lifecycle::Completed => RecordBody::ElementCompleted(record),
            Lifecycle::Terminating => RecordBody::ElementTerminating(record),
            Lifecycle::Terminated => RecordBody::ElementTerminated(record),
            Lifecycle::Activating => {
                return Err(EngineError::IllegalTransition {
                    element_id: ctx.element_id.clone(),
                    from,
                    to,
                })
            }
        };
        self.append(body);
        Ok(())
    }

    // ── child creation and termination ──

    /// Write an Activate command for a direct child of the given scope.
    pub(crate) fn activate_child(
        &mut self,
        scope_ctx: &ElementContext,
        child: &ExecutableElement,
        loop_counter: u32,
        variables: Vec<(String, Value)>,
    ) {
        self.enqueue(Command::ActivateElement {
            record: ElementRecord {
                element_instance_key: 0,
                element_id: child.id.clone(),
                kind: child.kind,
                flow_scope_key: scope_ctx.element_instance_key,
                process_instance_key: scope_ctx.process_instance_key,
                process_definition_key: scope_ctx.process_definition_key,
                parent_process_instance_key: scope_ctx.parent_process_instance_key,
                parent_element_instance_key: scope_ctx.parent_element_instance_key,
                loop_counter,
            },
            variables,
        });
    }

    /// Write an Activate command for an element in the same flow scope as
    /// `ctx` (outgoing flow targets, triggered boundary events).
    pub(crate) fn activate_in_flow_scope(
        &mut self,
        ctx: &ElementContext,
        target: &ExecutableElement,
        variables: Vec<(String, Value)>,
    ) {
        self.enqueue(Command::ActivateElement {
            record: ElementRecord {
                element_instance_key: 0,
                element_id: target.id.clone(),
                kind: target.kind,
                flow_scope_key: ctx.flow_scope_key,
                process_instance_key: ctx.process_instance_key,
                process_definition_key: ctx.process_definition_key,
                parent_process_instance_key: ctx.parent_process_instance_key,
                parent_element_instance_key: ctx.parent_element_instance_key,
                loop_counter: 0,
            },
            variables,
        });
    }

    /// Activate every outgoing flow target of a completed element.
    pub(crate) fn take_outgoing_flows(
        &mut self,
        element: &ExecutableElement,
        ctx: &ElementContext,
    ) -> Result<(), EngineError> {
        for target_id in &element.outgoing {
            let target = self.element(ctx.process_definition_key, target_id)?;
            self.activate_in_flow_scope(ctx, &target, Vec::new());
        }
        Ok(())
    }

    /// Cascade termination to the active children of a scope.
    ///
    /// Returns `true` if the scope has no active children (the caller may
    /// terminate directly); otherwise Terminate commands are written and
    /// the scope waits for its child-terminated callbacks.
    pub(crate) fn terminate_child_instances(&mut self, scope_key: u64) -> bool {
        let pending: Vec<u64> = self
            .state
            .children(scope_key)
            .into_iter()
            .filter(|c| !c.is_terminating())
            .map(|c| c.key)
            .collect();
        if self.state.children(scope_key).is_empty() {
            return true;
        }
        for child_key in pending {
            self.terminate_element(child_key);
        }
        false
    }

    /// Spawn a new child process instance for a call activity. The child
    /// links back to its caller when its activating record applies.
    pub(crate) fn create_child_process_instance(
        &mut self,
        deployed: &DeployedDefinition,
        ctx: &ElementContext,
        variables: Vec<(String, Value)>,
    ) -> u64 {
        let instance_key = self.generate_key();
        self.enqueue(Command::ActivateElement {
            record: super::root_record(
                deployed,
                instance_key,
                ctx.process_instance_key,
                ctx.element_instance_key,
            ),
            variables,
        });
        instance_key
    }

    pub(crate) fn complete_element(&mut self, element_instance_key: u64) {
        self.enqueue(Command::CompleteElement {
            element_instance_key,
        });
    }

    pub(crate) fn terminate_element(&mut self, element_instance_key: u64) {
        self.enqueue(Command::TerminateElement {
            element_instance_key,
        });
    }

    // ── flow-scope callbacks ──

    /// Invoke the flow-scope container's child-activating hook, if the
    /// element has one. A returned failure blocks the child's activation.
    pub(crate) fn invoke_child_activating(
        &mut self,
        child_element: &ExecutableElement,
        child_ctx: &ElementContext,
    ) -> Result<Option<Failure>, EngineError> {
        let Some((scope_element, scope_ctx)) = self.flow_scope_of(child_ctx)? else {
            return Ok(None);
        };
        Ok(
            processors::on_child_activating(self, &scope_element, &scope_ctx, child_element, child_ctx)
                .err(),
        )
    }

    /// Invoke the flow-scope container's hook before a concurrent branch
    /// finishes. A failure keeps the finishing element in COMPLETING.
    pub(crate) fn before_execution_path_completed(
        &mut self,
        child_element: &ExecutableElement,
        child_ctx: &ElementContext,
    ) -> Result<Option<Failure>, EngineError> {
        let Some((scope_element, scope_ctx)) = self.flow_scope_of(child_ctx)? else {
            return Ok(None);
        };
        Ok(processors::before_execution_path_completed(
            self,
            &scope_element,
            &scope_ctx,
            child_element,
            child_ctx,
        )
        .err())
    }

    /// Invoke the flow-scope container's hook after a concurrent branch
    /// finished. Not allowed to fail recoverably: the finishing element is
    /// already gone, an incident here would be unresolvable.
    pub(crate) fn after_execution_path_completed(
        &mut self,
        child_element: &ExecutableElement,
        child_ctx: &ElementContext,
    ) -> Result<(), EngineError> {
        let Some((scope_element, scope_ctx)) = self.flow_scope_of(child_ctx)? else {
            return Ok(());
        };
        processors::after_execution_path_completed(
            self,
            &scope_element,
            &scope_ctx,
            child_element,
            child_ctx,
        )
    }

    /// Deliver a child's termination to its flow scope.
    pub(crate) fn notify_child_terminated(
        &mut self,
        child_ctx: &ElementContext,
    ) -> Result<(), EngineError> {
        let Some((scope_element, scope_ctx)) = self.flow_scope_of(child_ctx)? else {
            return Ok(());
        };
        processors::on_child_terminated(self, &scope_element, &scope_ctx, child_ctx)
    }

    fn flow_scope_of(
        &self,
        ctx: &ElementContext,
    ) -> Result<Option<(ExecutableElement, ElementContext)>, EngineError> {
        if ctx.flow_scope_key == 0 {
            return Ok(None);
        }
        let Some(scope_instance) = self.state.instance(ctx.flow_scope_key) else {
            return Ok(None);
        };
        let scope_ctx = ElementContext::from(scope_instance);
        let scope_element = self.element(scope_ctx.process_definition_key, &scope_ctx.element_id)?;
        Ok(Some((scope_element, scope_ctx)))
    }
}

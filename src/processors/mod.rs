//! Element processors.
//!
//! One module per container kind (process, sub-process, call activity,
//! event sub-process, multi-instance body) plus the leaf elements, all
//! sharing one contract: activate, complete, terminate, and the
//! child/path callbacks a container receives when its children move.
//! Dispatch is an exhaustive match over the element kind.

pub(crate) mod call_activity;
pub(crate) mod event_sub_process;
pub(crate) mod leaf;
pub(crate) mod multi_instance;
pub(crate) mod process;
pub(crate) mod sub_process;

use serde_json::Value;

use crate::domain::{
    ElementContext, ElementKind, ElementRecord, ExecutableElement, Failure,
};
use crate::engine::{Engine, EngineError};

pub(crate) fn activate(
    engine: &mut Engine,
    element: &ExecutableElement,
    record: ElementRecord,
    variables: Vec<(String, Value)>,
) -> Result<(), EngineError> {
    match element.kind {
        ElementKind::Process => process::on_activate(engine, element, record, variables),
        ElementKind::SubProcess => sub_process::on_activate(engine, element, record),
        ElementKind::CallActivity => call_activity::on_activate(engine, element, record),
        ElementKind::MultiInstanceBody => multi_instance::on_activate(engine, element, record),
        ElementKind::EventSubProcess => Err(EngineError::ProtocolViolation(format!(
            "Event sub-process '{}' cannot be activated by command; it is created when a declared start event fires",
            element.id
        ))),
        ElementKind::StartEvent
        | ElementKind::EndEvent
        | ElementKind::Task
        | ElementKind::BoundaryEvent => leaf::on_activate(engine, element, record, variables),
    }
}

pub(crate) fn complete(
    engine: &mut Engine,
    element: &ExecutableElement,
    ctx: &ElementContext,
) -> Result<(), EngineError> {
    match element.kind {
        ElementKind::Process => process::on_complete(engine, element, ctx),
        ElementKind::SubProcess => sub_process::on_complete(engine, element, ctx),
        ElementKind::CallActivity => call_activity::on_complete(engine, element, ctx),
        ElementKind::EventSubProcess => event_sub_process::on_complete(engine, element, ctx),
        ElementKind::MultiInstanceBody => multi_instance::on_complete(engine, element, ctx),
        ElementKind::StartEvent
        | ElementKind::EndEvent
        | ElementKind::Task
        | ElementKind::BoundaryEvent => leaf::on_complete(engine, element, ctx),
    }
}

pub(crate) fn terminate(
    engine: &mut Engine,
    element: &ExecutableElement,
    ctx: &ElementContext,
) -> Result<(), EngineError> {
    match element.kind {
        ElementKind::Process => process::on_terminate(engine, ctx),
        ElementKind::SubProcess => sub_process::on_terminate(engine, ctx),
        ElementKind::CallActivity => call_activity::on_terminate(engine, ctx),
        ElementKind::EventSubProcess => event_sub_process::on_terminate(engine, ctx),
        ElementKind::MultiInstanceBody => multi_instance::on_terminate(engine, ctx),
        ElementKind::StartEvent
        | ElementKind::EndEvent
        | ElementKind::Task
        | ElementKind::BoundaryEvent => leaf::on_terminate(engine, element, ctx),
    }
}

/// A direct child entered ACTIVATING; the container may prepare its scope
/// (loop item variables, event-carried variables). A failure blocks the
/// child's activation.
pub(crate) fn on_child_activating(
    engine: &mut Engine,
    scope_element: &ExecutableElement,
    scope_ctx: &ElementContext,
    child_element: &ExecutableElement,
    child_ctx: &ElementContext,
) -> Result<(), Failure> {
    match scope_element.kind {
        ElementKind::MultiInstanceBody => {
            multi_instance::on_child_activating(engine, scope_element, scope_ctx, child_ctx)
        }
        ElementKind::EventSubProcess => {
            event_sub_process::on_child_activating(engine, scope_ctx, child_element, child_ctx)
        }
        _ => Ok(()),
    }
}

/// A concurrent branch is about to finish; the container may write
/// per-branch results (multi-instance output collection). A failure keeps
/// the finishing child in COMPLETING.
pub(crate) fn before_execution_path_completed(
    engine: &mut Engine,
    scope_element: &ExecutableElement,
    scope_ctx: &ElementContext,
    _child_element: &ExecutableElement,
    child_ctx: &ElementContext,
) -> Result<(), Failure> {
    match scope_element.kind {
        ElementKind::MultiInstanceBody => {
            multi_instance::before_execution_path_completed(engine, scope_element, scope_ctx, child_ctx)
        }
        _ => Ok(()),
    }
}

/// A concurrent branch finished; the container decides whether its body
/// is done or more work starts (next sequential iteration).
pub(crate) fn after_execution_path_completed(
    engine: &mut Engine,
    scope_element: &ExecutableElement,
    scope_ctx: &ElementContext,
    _child_element: &ExecutableElement,
    child_ctx: &ElementContext,
) -> Result<(), EngineError> {
    match scope_element.kind {
        ElementKind::MultiInstanceBody => {
            multi_instance::after_execution_path_completed(engine, scope_element, scope_ctx, child_ctx)
        }
        ElementKind::Process | ElementKind::SubProcess | ElementKind::EventSubProcess => {
            scope_idle_after_child(engine, scope_ctx)
        }
        _ => Ok(()),
    }
}

/// A direct child reached TERMINATED.
pub(crate) fn on_child_terminated(
    engine: &mut Engine,
    scope_element: &ExecutableElement,
    scope_ctx: &ElementContext,
    _child_ctx: &ElementContext,
) -> Result<(), EngineError> {
    match scope_element.kind {
        ElementKind::Process
        | ElementKind::SubProcess
        | ElementKind::EventSubProcess
        | ElementKind::MultiInstanceBody => {
            let Some(scope) = engine.state().instance(scope_ctx.element_instance_key) else {
                return Ok(());
            };
            if scope.is_terminating() && scope.active_children == 0 {
                finalize_termination(engine, scope_ctx)
            } else {
                Ok(())
            }
        }
        _ => Ok(()),
    }
}

/// A child of the scope just reached a terminal state. Complete the scope
/// once its last execution path has finished; a terminating scope whose
/// last child completed normally (its Terminate command arrived too late)
/// finishes its termination instead.
pub(crate) fn scope_idle_after_child(
    engine: &mut Engine,
    scope_ctx: &ElementContext,
) -> Result<(), EngineError> {
    let Some(scope) = engine.state().instance(scope_ctx.element_instance_key) else {
        return Ok(());
    };
    if scope.active_children > 0 {
        return Ok(());
    }
    if scope.is_terminating() {
        return finalize_termination(engine, scope_ctx);
    }
    if scope.state == crate::domain::Lifecycle::Activated {
        engine.complete_element(scope_ctx.element_instance_key);
    }
    Ok(())
}

/// Final steps of any termination once no active children remain: release
/// subscriptions, resolve open incidents, transition to TERMINATED, then
/// either republish a held boundary-event trigger (the event continues in
/// the flow scope unless that scope is itself terminating) or notify the
/// flow scope / waiting caller.
pub(crate) fn finalize_termination(
    engine: &mut Engine,
    ctx: &ElementContext,
) -> Result<(), EngineError> {
    engine.close_subscriptions(ctx.element_instance_key);
    engine.resolve_incidents_for(ctx.element_instance_key);

    let trigger = engine
        .state()
        .event_trigger(ctx.element_instance_key)
        .cloned();

    engine.transition_to_terminated(ctx)?;

    if let Some(trigger) = trigger {
        let scope_terminating = engine
            .state()
            .instance(ctx.flow_scope_key)
            .map(|s| s.is_terminating())
            .unwrap_or(true);
        if !scope_terminating {
            let target = engine.element(ctx.process_definition_key, &trigger.element_id)?;
            if target.kind == ElementKind::BoundaryEvent {
                engine.activate_in_flow_scope(ctx, &target, trigger.variables);
                return Ok(());
            }
        }
    }

    if ctx.kind == ElementKind::Process {
        process::on_terminated(engine, ctx)
    } else {
        engine.notify_child_terminated(ctx)
    }
}

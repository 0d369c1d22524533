//! Call activity: invokes another process definition as a child process
//! instance.
//!
//! Any failure while resolving the called process raises a
//! `CalledElementError` incident and the activity stays unactivated; no
//! child is spawned until the incident is resolved and activation is
//! re-driven.

use serde_json::Value;

use crate::domain::{
    BlockedIntent, DeployedDefinition, ElementContext, ElementRecord, ExecutableElement, Failure,
};
use crate::engine::{Engine, EngineError};

pub(crate) fn on_activate(
    engine: &mut Engine,
    element: &ExecutableElement,
    record: ElementRecord,
) -> Result<(), EngineError> {
    let (ctx, _fresh) = engine.transition_to_activating(&record)?;

    if let Some(failure) = engine.invoke_child_activating(element, &ctx)? {
        engine.create_incident(failure, &ctx, BlockedIntent::Activate);
        return Ok(());
    }

    let deployed = match activating_steps(engine, element, &ctx) {
        Ok(deployed) => deployed,
        Err(failure) => {
            engine.create_incident(failure, &ctx, BlockedIntent::Activate);
            return Ok(());
        }
    };

    engine.open_boundary_subscriptions(&ctx)?;
    engine.transition_to_activated(&ctx)?;

    let variables = if element.propagate_all_parent_variables {
        engine.state().visible_variables(ctx.element_instance_key)
    } else {
        Vec::new()
    };
    engine.create_child_process_instance(&deployed, &ctx, variables);
    Ok(())
}

/// Resolve the called process: input mappings, called-element expression,
/// latest deployed version, none start event.
fn activating_steps(
    engine: &mut Engine,
    element: &ExecutableElement,
    ctx: &ElementContext,
) -> Result<DeployedDefinition, Failure> {
    engine.apply_input_mappings(element, ctx)?;

    let Some(expression) = element.called_element.as_deref() else {
        return Err(Failure::called_element(format!(
            "Call activity '{}' has no called element",
            element.id
        )));
    };
    let value = engine
        .evaluate_in_scope(expression, ctx.element_instance_key)
        .map_err(|failure| Failure::called_element(failure.message))?;
    let Value::String(process_id) = value else {
        return Err(Failure::called_element(format!(
            "Called element of '{}' must evaluate to a process id string, got {}",
            element.id, value
        )));
    };

    let Some(deployed) = engine.definitions().latest_by_id(&process_id).cloned() else {
        return Err(Failure::called_element(format!(
            "Expected to find a deployed process with id '{}', but none found",
            process_id
        )));
    };
    if !deployed.definition.has_none_start_event() {
        return Err(Failure::called_element(format!(
            "Expected process '{}' to have a none start event",
            process_id
        )));
    }
    Ok(deployed)
}

pub(crate) fn on_complete(
    engine: &mut Engine,
    element: &ExecutableElement,
    ctx: &ElementContext,
) -> Result<(), EngineError> {
    engine.transition_to_completing(ctx)?;

    // child output variables were copied into this scope by the process
    // processor; the output-mapping step projects them onward
    if let Err(failure) = engine.apply_output_mappings(element, ctx) {
        engine.create_incident(failure, ctx, BlockedIntent::Complete);
        return Ok(());
    }
    engine.close_subscriptions(ctx.element_instance_key);

    engine.transition_to_completed(element, ctx)
}

pub(crate) fn on_terminate(engine: &mut Engine, ctx: &ElementContext) -> Result<(), EngineError> {
    engine.transition_to_terminating(ctx)?;

    if let Some(child) = engine.state().called_child(ctx.element_instance_key) {
        let child_key = child.key;
        engine.terminate_element(child_key);
        return Ok(());
    }
    super::finalize_termination(engine, ctx)
}

/// The called process completed.
pub(crate) fn on_called_child_completed(
    engine: &mut Engine,
    call_activity_key: u64,
) -> Result<(), EngineError> {
    let Some(instance) = engine.state().instance(call_activity_key) else {
        return Ok(());
    };
    let ctx = ElementContext::from(instance);

    if instance.is_terminating() {
        // the child finished before the terminate cascade reached it;
        // nothing remains to cancel
        return super::finalize_termination(engine, &ctx);
    }
    engine.complete_element(call_activity_key);
    Ok(())
}

/// The called process terminated. Legal only while the activity itself is
/// terminating; anything else is a broken contract.
pub(crate) fn on_called_child_terminated(
    engine: &mut Engine,
    call_activity_key: u64,
) -> Result<(), EngineError> {
    let Some(instance) = engine.state().instance(call_activity_key) else {
        return Ok(());
    };
    if !instance.is_terminating() {
        return Err(EngineError::ProtocolViolation(format!(
            "Called process terminated but call activity '{}' is in state '{:?}'",
            instance.element_id, instance.state
        )));
    }
    let ctx = ElementContext::from(instance);
    super::finalize_termination(engine, &ctx)
}

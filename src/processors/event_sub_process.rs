//! Event sub-process container.
//!
//! Never activated by a generic command: the instance is created already
//! ACTIVATED because a declared start event fired (see the subscription
//! manager). The start-event child receives the event-carried variables
//! and its input mappings at child-activating time, so they land in the
//! right scope before any concurrent re-trigger.

use crate::domain::{BlockedIntent, ElementContext, ElementKind, ExecutableElement, Failure};
use crate::engine::{Engine, EngineError};

/// Activate the start event that fired; its id is held in the trigger
/// written at creation.
pub(crate) fn on_activated(
    engine: &mut Engine,
    element: &ExecutableElement,
    ctx: &ElementContext,
) -> Result<(), EngineError> {
    let Some(trigger) = engine.state().event_trigger(ctx.element_instance_key) else {
        return Err(EngineError::ProtocolViolation(format!(
            "Event sub-process '{}' was created without a triggering event",
            element.id
        )));
    };
    let start_id = trigger.element_id.clone();

    let Some(start) = element.child(&start_id) else {
        return Err(EngineError::ProtocolViolation(format!(
            "Event sub-process '{}' has no start event '{}'",
            element.id, start_id
        )));
    };
    let start = start.clone();
    engine.activate_child(ctx, &start, 0, Vec::new());
    Ok(())
}

pub(crate) fn on_child_activating(
    engine: &mut Engine,
    esp_ctx: &ElementContext,
    child_element: &ExecutableElement,
    child_ctx: &ElementContext,
) -> Result<(), Failure> {
    if child_element.kind != ElementKind::StartEvent {
        return Ok(());
    }

    if let Some(trigger) = engine.state().event_trigger(esp_ctx.element_instance_key) {
        if trigger.element_id == child_ctx.element_id {
            let variables = trigger.variables.clone();
            engine.set_local_variables(child_ctx.element_instance_key, variables);
        }
    }
    engine.apply_input_mappings(child_element, child_ctx)
}

pub(crate) fn on_complete(
    engine: &mut Engine,
    element: &ExecutableElement,
    ctx: &ElementContext,
) -> Result<(), EngineError> {
    engine.transition_to_completing(ctx)?;

    if let Err(failure) = engine.apply_output_mappings(element, ctx) {
        engine.create_incident(failure, ctx, BlockedIntent::Complete);
        return Ok(());
    }
    engine.close_subscriptions(ctx.element_instance_key);

    engine.transition_to_completed(element, ctx)
}

pub(crate) fn on_terminate(engine: &mut Engine, ctx: &ElementContext) -> Result<(), EngineError> {
    engine.transition_to_terminating(ctx)?;
    if engine.terminate_child_instances(ctx.element_instance_key) {
        return super::finalize_termination(engine, ctx);
    }
    Ok(())
}

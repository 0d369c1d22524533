//! Root process container.
//!
//! Activation resolves the firing start event: a buffered message trigger
//! for this instance wins, the none start event fires otherwise, and the
//! absence of both is a fatal configuration error. Completion and
//! termination notify whichever caller waits: the invoking call activity
//! for child processes, else a correlated buffered start message, else
//! nobody.

use serde_json::Value;

use crate::domain::{ElementContext, ElementRecord, ExecutableElement, RecordBody};
use crate::engine::{Engine, EngineError};

use super::call_activity;

pub(crate) fn on_activate(
    engine: &mut Engine,
    element: &ExecutableElement,
    record: ElementRecord,
    variables: Vec<(String, Value)>,
) -> Result<(), EngineError> {
    let (ctx, fresh) = engine.transition_to_activating(&record)?;

    if fresh && !variables.is_empty() {
        engine.set_local_variables(ctx.element_instance_key, variables);
    }
    engine.open_event_subprocess_subscriptions(element, &ctx);

    engine.transition_to_activated(&ctx)?;
    on_activated(engine, element, &ctx)
}

fn on_activated(
    engine: &mut Engine,
    element: &ExecutableElement,
    ctx: &ElementContext,
) -> Result<(), EngineError> {
    // a previously buffered message trigger is consulted first
    if let Some(message) = engine.state().buffered_message_for(ctx.process_instance_key) {
        let name = message.name.clone();
        if let Some(start) = element.message_start_event(&name) {
            let start = start.clone();
            engine.activate_child(ctx, &start, 0, Vec::new());
            return Ok(());
        }
    }

    if let Some(start) = element.none_start_event() {
        let start = start.clone();
        engine.activate_child(ctx, &start, 0, Vec::new());
        return Ok(());
    }

    Err(EngineError::NoStartEvent(element.id.clone()))
}

pub(crate) fn on_complete(
    engine: &mut Engine,
    element: &ExecutableElement,
    ctx: &ElementContext,
) -> Result<(), EngineError> {
    engine.transition_to_completing(ctx)?;
    engine.close_subscriptions(ctx.element_instance_key);

    // hand results to the waiting call activity while the root scope and
    // its variables still exist
    if ctx.parent_element_instance_key != 0 {
        propagate_to_caller(engine, ctx)?;
    }

    engine.transition_to_completed(element, ctx)?;

    if ctx.parent_element_instance_key != 0 {
        call_activity::on_called_child_completed(engine, ctx.parent_element_instance_key)
    } else {
        correlate_buffered_message(engine, ctx);
        Ok(())
    }
}

pub(crate) fn on_terminate(engine: &mut Engine, ctx: &ElementContext) -> Result<(), EngineError> {
    engine.transition_to_terminating(ctx)?;
    if engine.terminate_child_instances(ctx.element_instance_key) {
        return super::finalize_termination(engine, ctx);
    }
    Ok(())
}

/// Post-TERMINATED caller notification; fired from the shared
/// finalization once no children remain.
pub(crate) fn on_terminated(engine: &mut Engine, ctx: &ElementContext) -> Result<(), EngineError> {
    if ctx.parent_element_instance_key != 0 {
        call_activity::on_called_child_terminated(engine, ctx.parent_element_instance_key)
    } else {
        correlate_buffered_message(engine, ctx);
        Ok(())
    }
}

/// Copy the finished child's root variables into the calling activity
/// scope, and (when configured) straight into the caller's flow scope.
fn propagate_to_caller(engine: &mut Engine, ctx: &ElementContext) -> Result<(), EngineError> {
    let Some(caller) = engine
        .state()
        .instance(ctx.parent_element_instance_key)
        .cloned()
    else {
        return Ok(());
    };
    let caller_element = engine.element(caller.process_definition_key, &caller.element_id)?;

    engine.copy_local_document(ctx.element_instance_key, caller.key);
    if caller_element.propagate_all_child_variables && caller.flow_scope_key != 0 {
        engine.copy_local_document(ctx.element_instance_key, caller.flow_scope_key);
    }
    Ok(())
}

fn correlate_buffered_message(engine: &mut Engine, ctx: &ElementContext) {
    if let Some(message) = engine.state().buffered_message_for(ctx.process_instance_key) {
        let message_key = message.key;
        engine.append(RecordBody::MessageCorrelated { message_key });
    }
}

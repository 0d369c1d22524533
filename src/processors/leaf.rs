//! Leaf elements: tasks, start/end events, boundary events.
//!
//! Tasks are the wait-state seam: they stay ACTIVATED until an external
//! worker completes them. Events pass straight through.

use serde_json::Value;

use crate::domain::{BlockedIntent, ElementContext, ElementKind, ElementRecord, ExecutableElement};
use crate::engine::{Engine, EngineError};

pub(crate) fn on_activate(
    engine: &mut Engine,
    element: &ExecutableElement,
    record: ElementRecord,
    variables: Vec<(String, Value)>,
) -> Result<(), EngineError> {
    let (ctx, _fresh) = engine.transition_to_activating(&record)?;

    // event-carried variables (triggered boundary events) land locally
    // before anything else reads the scope
    if !variables.is_empty() {
        engine.set_local_variables(ctx.element_instance_key, variables);
    }

    if let Some(failure) = engine.invoke_child_activating(element, &ctx)? {
        engine.create_incident(failure, &ctx, BlockedIntent::Activate);
        return Ok(());
    }

    if element.kind == ElementKind::Task {
        if let Err(failure) = engine.apply_input_mappings(element, &ctx) {
            engine.create_incident(failure, &ctx, BlockedIntent::Activate);
            return Ok(());
        }
        engine.open_boundary_subscriptions(&ctx)?;
    }

    engine.transition_to_activated(&ctx)?;

    if element.kind != ElementKind::Task {
        engine.complete_element(ctx.element_instance_key);
    }
    Ok(())
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

pub(crate) fn on_terminate(
    engine: &mut Engine,
    _element: &ExecutableElement,
    ctx: &ElementContext,
) -> Result<(), EngineError> {
    engine.transition_to_terminating(ctx)?;
    super::finalize_termination(engine, ctx)
}

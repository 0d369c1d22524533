//! Embedded sub-process container.

use crate::domain::{BlockedIntent, ElementContext, ElementRecord, ExecutableElement};
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
    if let Err(failure) = engine.apply_input_mappings(element, &ctx) {
        engine.create_incident(failure, &ctx, BlockedIntent::Activate);
        return Ok(());
    }
    engine.open_boundary_subscriptions(&ctx)?;
    engine.open_event_subprocess_subscriptions(element, &ctx);

    engine.transition_to_activated(&ctx)?;

    let Some(start) = element.none_start_event() else {
        return Err(EngineError::NoStartEvent(element.id.clone()));
    };
    let start = start.clone();
    engine.activate_child(&ctx, &start, 0, Vec::new());
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

pub(crate) fn on_terminate(engine: &mut Engine, ctx: &ElementContext) -> Result<(), EngineError> {
    engine.transition_to_terminating(ctx)?;
    if engine.terminate_child_instances(ctx.element_instance_key) {
        return super::finalize_termination(engine, ctx);
    }
    Ok(())
}

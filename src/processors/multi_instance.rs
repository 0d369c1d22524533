//! Multi-instance body: sequential or parallel repetition of its single
//! inner element over an input collection.
//!
//! The input collection is re-evaluated on every child activation and at
//! every next-iteration decision, so concurrent mutation of the
//! collection while the body runs is tolerated; an index that fell out of
//! range raises an `ExtractValueError` incident on the child. The output
//! collection is pre-initialized to nulls at activation, sized to the
//! resolved collection, so no partial completion exposes uninitialized
//! slots.

use serde_json::Value;

use crate::domain::{
    BlockedIntent, ElementContext, ElementRecord, ExecutableElement, Failure, Lifecycle,
    LoopCharacteristics, LoopMode,
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
    if let Err(failure) = engine.apply_input_mappings(element, &ctx) {
        engine.create_incident(failure, &ctx, BlockedIntent::Activate);
        return Ok(());
    }

    let items = match input_collection(engine, element, &ctx) {
        Ok(items) => items,
        Err(failure) => {
            engine.create_incident(failure, &ctx, BlockedIntent::Activate);
            return Ok(());
        }
    };

    let characteristics = loop_characteristics(element)?;
    if let Some(collection) = characteristics.output_collection.clone() {
        engine.set_local_variables(
            ctx.element_instance_key,
            vec![(collection, Value::Array(vec![Value::Null; items.len()]))],
        );
    }
    engine.open_boundary_subscriptions(&ctx)?;

    engine.transition_to_activated(&ctx)?;
    on_activated(engine, element, &ctx, items.len())
}

fn on_activated(
    engine: &mut Engine,
    element: &ExecutableElement,
    ctx: &ElementContext,
    count: usize,
) -> Result<(), EngineError> {
    if count == 0 {
        // nothing to iterate: the body completes with no children
        engine.complete_element(ctx.element_instance_key);
        return Ok(());
    }

    match loop_characteristics(element)?.mode {
        LoopMode::Sequential => activate_inner_child(engine, element, ctx, 1)?,
        LoopMode::Parallel => {
            for counter in 1..=count as u32 {
                activate_inner_child(engine, element, ctx, counter)?;
            }
        }
    }
    Ok(())
}

/// Put the item for the child's loop counter into its scope. The
/// collection is re-read here; a concurrent mutation that shrank it past
/// the counter blocks the child behind an incident.
pub(crate) fn on_child_activating(
    engine: &mut Engine,
    body_element: &ExecutableElement,
    body_ctx: &ElementContext,
    child_ctx: &ElementContext,
) -> Result<(), Failure> {
    let items = input_collection(engine, body_element, body_ctx)?;
    let index = child_ctx.loop_counter.saturating_sub(1) as usize;
    let item = items.get(index).cloned().ok_or_else(|| {
        Failure::extract_value(format!(
            "Index {} out of range for input collection of length {}",
            index,
            items.len()
        ))
    })?;

    let characteristics = body_element
        .loop_characteristics
        .as_ref()
        .ok_or_else(|| missing_loop_failure(body_element))?;
    if let Some(variable) = characteristics.input_element.clone() {
        engine.set_local_variables(child_ctx.element_instance_key, vec![(variable, item)]);
    }
    Ok(())
}

/// Rewrite the output-collection slot for the finishing child before it
/// may complete.
pub(crate) fn before_execution_path_completed(
    engine: &mut Engine,
    body_element: &ExecutableElement,
    body_ctx: &ElementContext,
    child_ctx: &ElementContext,
) -> Result<(), Failure> {
    let characteristics = body_element
        .loop_characteristics
        .as_ref()
        .ok_or_else(|| missing_loop_failure(body_element))?;
    let Some(collection) = characteristics.output_collection.clone() else {
        return Ok(());
    };

    let value = match characteristics.output_element.as_deref() {
        Some(expression) => engine.evaluate_in_scope(expression, child_ctx.element_instance_key)?,
        None => Value::Null,
    };
    let index = child_ctx.loop_counter.saturating_sub(1) as usize;
    let updated =
        engine
            .state()
            .variables
            .replaced_at(body_ctx.element_instance_key, &collection, index, value)?;
    engine.set_local_variables(body_ctx.element_instance_key, vec![(collection, updated)]);
    Ok(())
}

/// Decide what follows a finished child: the next sequential iteration,
/// or completion of the body once no children remain.
pub(crate) fn after_execution_path_completed(
    engine: &mut Engine,
    body_element: &ExecutableElement,
    body_ctx: &ElementContext,
    child_ctx: &ElementContext,
) -> Result<(), EngineError> {
    // a terminating body spawns nothing more; a child that completed
    // before its Terminate command arrived may have been the last one
    if engine
        .state()
        .instance(body_ctx.element_instance_key)
        .map(|body| body.is_terminating())
        .unwrap_or(false)
    {
        return super::scope_idle_after_child(engine, body_ctx);
    }

    match loop_characteristics(body_element)?.mode {
        LoopMode::Sequential => {
            match input_collection(engine, body_element, body_ctx) {
                Ok(items) => {
                    let next = child_ctx.loop_counter + 1;
                    if next as usize <= items.len() {
                        activate_inner_child(engine, body_element, body_ctx, next)?;
                    } else {
                        engine.complete_element(body_ctx.element_instance_key);
                    }
                }
                Err(failure) => {
                    // the collection vanished mid-loop; block the body
                    // rather than guessing whether items remain
                    engine.create_incident(failure, body_ctx, BlockedIntent::Complete);
                }
            }
            Ok(())
        }
        LoopMode::Parallel => {
            if let Some(body) = engine.state().instance(body_ctx.element_instance_key) {
                if body.state == Lifecycle::Activated && body.active_children == 0 {
                    engine.complete_element(body_ctx.element_instance_key);
                }
            }
            Ok(())
        }
    }
}

pub(crate) fn on_complete(
    engine: &mut Engine,
    element: &ExecutableElement,
    ctx: &ElementContext,
) -> Result<(), EngineError> {
    engine.transition_to_completing(ctx)?;

    if let Err(failure) = completing_steps(engine, element, ctx) {
        engine.create_incident(failure, ctx, BlockedIntent::Complete);
        return Ok(());
    }
    engine.close_subscriptions(ctx.element_instance_key);

    engine.transition_to_completed(element, ctx)
}

fn completing_steps(
    engine: &mut Engine,
    element: &ExecutableElement,
    ctx: &ElementContext,
) -> Result<(), Failure> {
    engine.apply_output_mappings(element, ctx)?;

    // the finished output collection becomes visible in the flow scope
    if let Some(characteristics) = element.loop_characteristics.as_ref() {
        if let Some(collection) = characteristics.output_collection.clone() {
            if let Some(value) = engine
                .state()
                .variables
                .get_local(ctx.element_instance_key, &collection)
                .cloned()
            {
                if ctx.flow_scope_key != 0 {
                    engine.set_local_variables(ctx.flow_scope_key, vec![(collection, value)]);
                }
            }
        }
    }
    Ok(())
}

pub(crate) fn on_terminate(engine: &mut Engine, ctx: &ElementContext) -> Result<(), EngineError> {
    engine.transition_to_terminating(ctx)?;
    if engine.terminate_child_instances(ctx.element_instance_key) {
        return super::finalize_termination(engine, ctx);
    }
    Ok(())
}

fn activate_inner_child(
    engine: &mut Engine,
    element: &ExecutableElement,
    ctx: &ElementContext,
    loop_counter: u32,
) -> Result<(), EngineError> {
    let Some(inner) = element.inner_element() else {
        return Err(EngineError::ProtocolViolation(format!(
            "Multi-instance body '{}' has no inner element",
            element.id
        )));
    };
    let inner = inner.clone();
    engine.activate_child(ctx, &inner, loop_counter, Vec::new());
    Ok(())
}

fn input_collection(
    engine: &Engine,
    element: &ExecutableElement,
    ctx: &ElementContext,
) -> Result<Vec<Value>, Failure> {
    let characteristics = element
        .loop_characteristics
        .as_ref()
        .ok_or_else(|| missing_loop_failure(element))?;
    let value = engine.evaluate_in_scope(&characteristics.input_collection, ctx.element_instance_key)?;
    match value {
        Value::Array(items) => Ok(items),
        other => Err(Failure::extract_value(format!(
            "Input collection '{}' must evaluate to an array, got {}",
            characteristics.input_collection, other
        ))),
    }
}

fn loop_characteristics(
    element: &ExecutableElement,
) -> Result<&LoopCharacteristics, EngineError> {
    element
        .loop_characteristics
        .as_ref()
        .ok_or_else(|| {
            EngineError::ProtocolViolation(format!(
                "Multi-instance body '{}' has no loop characteristics",
                element.id
            ))
        })
}

fn missing_loop_failure(element: &ExecutableElement) -> Failure {
    Failure::expression(format!(
        "Multi-instance body '{}' has no loop characteristics",
        element.id
    ))
}

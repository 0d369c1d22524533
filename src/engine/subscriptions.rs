//! Event subscription/correlation manager.
//!
//! Opens and releases boundary/start-event subscriptions, finds the
//! catching element when a message is published, and hands held triggers
//! back out when an interrupted activity has terminated.

use serde_json::Value;
use tracing::debug;

use crate::domain::{ElementContext, ElementKind, ElementRecord, ExecutableElement, RecordBody};
use crate::processors;
use crate::state::Subscription;

use super::{Engine, EngineError};

impl Engine {
    /// Open a subscription for every message boundary event attached to
    /// the given activity.
    pub(crate) fn open_boundary_subscriptions(
        &mut self,
        ctx: &ElementContext,
    ) -> Result<(), EngineError> {
        let scope = self.scope_element(ctx.process_definition_key, &ctx.element_id)?;
        let boundary_events: Vec<(String, String, bool)> = scope
            .boundary_events_for(&ctx.element_id)
            .filter_map(|b| {
                b.message
                    .as_ref()
                    .map(|m| (b.id.clone(), m.name.clone(), b.interrupting))
            })
            .collect();

        for (element_id, message_name, interrupting) in boundary_events {
            let subscription_key = self.generate_key();
            self.append(RecordBody::SubscriptionOpened {
                subscription_key,
                scope_key: ctx.element_instance_key,
                element_id,
                message_name,
                interrupting,
            });
        }
        Ok(())
    }

    /// Open a subscription for every event sub-process declared in the
    /// given container.
    pub(crate) fn open_event_subprocess_subscriptions(
        &mut self,
        container: &ExecutableElement,
        ctx: &ElementContext,
    ) {
        let subscriptions: Vec<(String, String, bool)> = container
            .event_sub_processes()
            .filter_map(|esp| {
                esp.children
                    .iter()
                    .find(|c| c.kind == ElementKind::StartEvent && c.message.is_some())
                    .map(|start| {
                        (
                            esp.id.clone(),
                            start.message.as_ref().map(|m| m.name.clone()).unwrap_or_default(),
                            start.interrupting,
                        )
                    })
            })
            .collect();

        for (element_id, message_name, interrupting) in subscriptions {
            let subscription_key = self.generate_key();
            self.append(RecordBody::SubscriptionOpened {
                subscription_key,
                scope_key: ctx.element_instance_key,
                element_id,
                message_name,
                interrupting,
            });
        }
    }

    /// Release every subscription owned by a scope.
    pub(crate) fn close_subscriptions(&mut self, scope_key: u64) {
        let keys: Vec<u64> = self
            .state
            .subscriptions_for_scope(scope_key)
            .into_iter()
            .map(|s| s.key)
            .collect();
        for subscription_key in keys {
            self.append(RecordBody::SubscriptionClosed { subscription_key });
        }
    }

    /// Deliver a published message to one open subscription. Returns
    /// whether the subscription accepted it.
    pub(crate) fn deliver_to_subscription(
        &mut self,
        subscription: &Subscription,
        variables: &[(String, Value)],
    ) -> Result<bool, EngineError> {
        let Some(instance) = self.state.instance(subscription.scope_key) else {
            return Ok(false);
        };
        if instance.is_terminating() || instance.is_terminal() {
            return Ok(false);
        }
        let scope_ctx = ElementContext::from(instance);
        let element = self.element(scope_ctx.process_definition_key, &subscription.element_id)?;

        match element.kind {
            ElementKind::BoundaryEvent => {
                if subscription.interrupting {
                    // hold the trigger; the boundary event activates once
                    // the activity has terminated
                    self.append(RecordBody::EventTriggered {
                        element_instance_key: scope_ctx.element_instance_key,
                        element_id: element.id.clone(),
                        variables: variables.to_vec(),
                    });
                    self.terminate_element(scope_ctx.element_instance_key);
                } else {
                    self.activate_in_flow_scope(&scope_ctx, &element, variables.to_vec());
                }
                Ok(true)
            }
            ElementKind::EventSubProcess => {
                if subscription.interrupting {
                    if instance.interrupted {
                        debug!(
                            scope = scope_ctx.element_instance_key,
                            "Scope already interrupted, ignoring trigger"
                        );
                        return Ok(false);
                    }
                    self.append(RecordBody::ScopeInterrupted {
                        element_instance_key: scope_ctx.element_instance_key,
                    });
                    // cancel the scope's other work before the event
                    // sub-process takes over
                    self.terminate_child_instances(scope_ctx.element_instance_key);
                }
                self.create_event_sub_process(
                    &scope_ctx,
                    &element,
                    &subscription.message_name,
                    variables.to_vec(),
                )?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Create an event sub-process instance, already ACTIVATED: its start
    /// event fired, a generic Activate command never reaches it.
    pub(crate) fn create_event_sub_process(
        &mut self,
        scope_ctx: &ElementContext,
        esp: &ExecutableElement,
        message_name: &str,
        variables: Vec<(String, Value)>,
    ) -> Result<(), EngineError> {
        let Some(start) = esp.message_start_event(message_name) else {
            return Err(EngineError::ProtocolViolation(format!(
                "Event sub-process '{}' has no start event for message '{}'",
                esp.id, message_name
            )));
        };
        let start_id = start.id.clone();

        let key = self.generate_key();
        let record = ElementRecord {
            element_instance_key: key,
            element_id: esp.id.clone(),
            kind: ElementKind::EventSubProcess,
            flow_scope_key: scope_ctx.element_instance_key,
            process_instance_key: scope_ctx.process_instance_key,
            process_definition_key: scope_ctx.process_definition_key,
            parent_process_instance_key: scope_ctx.parent_process_instance_key,
            parent_element_instance_key: scope_ctx.parent_element_instance_key,
            loop_counter: 0,
        };
        let ctx = ElementContext::from(&record);

        self.append(RecordBody::ElementActivating(record));
        // hold the event variables for the start child's activation
        self.append(RecordBody::EventTriggered {
            element_instance_key: key,
            element_id: start_id,
            variables,
        });
        self.transition_to_activated(&ctx)?;
        processors::event_sub_process::on_activated(self, esp, &ctx)
    }
}

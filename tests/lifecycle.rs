//! Lifecycle Integration Tests
//!
//! Covers the legal-transition contract, fatal protocol violations,
//! idempotent termination, and boundary-event interruption.

use procflow::domain::{ElementKind, ElementRecord, Lifecycle, ProcessDefinition};
use procflow::{Command, Engine, EngineError, RecordBody};
use serde_json::json;

const SUPPORT_YAML: &str = r#"
id: support
elements:
  - id: start
    kind: start_event
    outgoing: [work]
  - id: work
    kind: task
    outgoing: [wrap_up]
  - id: canceled
    kind: boundary_event
    attached_to: work
    message:
      name: cancel
    interrupting: true
    outputs:
      - source: reason
        target: cancel_reason
    outgoing: [cleanup]
  - id: reminder
    kind: boundary_event
    attached_to: work
    message:
      name: remind
    interrupting: false
    outgoing: [nudge]
  - id: wrap_up
    kind: task
  - id: cleanup
    kind: task
  - id: nudge
    kind: task
"#;

fn support_engine() -> (Engine, u64) {
    let mut engine = Engine::new();
    engine
        .deploy(ProcessDefinition::from_yaml(SUPPORT_YAML).unwrap())
        .unwrap();
    let root = engine.create_instance("support", vec![]).unwrap();
    (engine, root)
}

fn find_key(engine: &Engine, element_id: &str) -> Option<u64> {
    engine
        .state()
        .all_instances()
        .iter()
        .find(|i| i.element_id == element_id)
        .map(|i| i.key)
}

#[test]
fn test_unknown_process_is_rejected() {
    let mut engine = Engine::new();
    let result = engine.create_instance("ghost", vec![]);
    assert!(matches!(result, Err(EngineError::UnknownProcess(_))));
}

#[test]
fn test_completing_an_activating_element_is_fatal() {
    // a call activity with an unresolvable target stays in ACTIVATING
    let mut engine = Engine::new();
    engine
        .deploy(
            ProcessDefinition::from_yaml(
                r#"
id: parent
elements:
  - id: start
    kind: start_event
    outgoing: [invoke]
  - id: invoke
    kind: call_activity
    called_element: '"ghost"'
"#,
            )
            .unwrap(),
        )
        .unwrap();
    engine.create_instance("parent", vec![]).unwrap();
    let invoke = find_key(&engine, "invoke").unwrap();
    assert_eq!(
        engine.state().instance(invoke).unwrap().state,
        Lifecycle::Activating
    );

    engine.submit(Command::CompleteElement {
        element_instance_key: invoke,
    });
    let result = engine.run_to_idle();
    assert!(matches!(
        result,
        Err(EngineError::IllegalTransition {
            from: Lifecycle::Activating,
            to: Lifecycle::Completing,
            ..
        })
    ));
}

#[test]
fn test_direct_activation_of_event_sub_process_is_fatal() {
    let mut engine = Engine::new();
    engine
        .deploy(
            ProcessDefinition::from_yaml(
                r#"
id: shipment
elements:
  - id: start
    kind: start_event
    outgoing: [pack]
  - id: pack
    kind: task
  - id: on_cancel
    kind: event_sub_process
    elements:
      - id: cancel_start
        kind: start_event
        message:
          name: cancel
        outgoing: [notify]
      - id: notify
        kind: task
"#,
            )
            .unwrap(),
        )
        .unwrap();
    let root = engine.create_instance("shipment", vec![]).unwrap();

    engine.submit(Command::ActivateElement {
        record: ElementRecord {
            element_instance_key: 0,
            element_id: "on_cancel".to_string(),
            kind: ElementKind::EventSubProcess,
            flow_scope_key: root,
            process_instance_key: root,
            process_definition_key: 1,
            parent_process_instance_key: 0,
            parent_element_instance_key: 0,
            loop_counter: 0,
        },
        variables: Vec::new(),
    });
    let result = engine.run_to_idle();
    assert!(matches!(result, Err(EngineError::ProtocolViolation(_))));
}

#[test]
fn test_terminate_is_idempotent_under_redelivery() {
    let (mut engine, root) = support_engine();

    // deliver the same cancellation twice; the second is a no-op
    engine.submit(Command::TerminateElement {
        element_instance_key: root,
    });
    engine.submit(Command::TerminateElement {
        element_instance_key: root,
    });
    engine.run_to_idle().unwrap();
    engine.submit(Command::TerminateElement {
        element_instance_key: root,
    });
    engine.run_to_idle().unwrap();

    assert!(engine.state().all_instances().is_empty());
    let root_terminations = engine
        .records()
        .iter()
        .filter(|r| {
            matches!(&r.body, RecordBody::ElementTerminated(e) if e.element_instance_key == root)
        })
        .count();
    assert_eq!(root_terminations, 1, "one terminal transition only");
}

#[test]
fn test_monotone_termination() {
    let (mut engine, root) = support_engine();
    engine.submit(Command::TerminateElement {
        element_instance_key: root,
    });
    engine.run_to_idle().unwrap();

    // once TERMINATING is observed for an instance, it never completes
    let mut terminating: Vec<u64> = Vec::new();
    for record in engine.records() {
        match &record.body {
            RecordBody::ElementTerminating(e) => terminating.push(e.element_instance_key),
            RecordBody::ElementCompleted(e) => {
                assert!(
                    !terminating.contains(&e.element_instance_key),
                    "element {} completed after terminating",
                    e.element_instance_key
                );
            }
            _ => {}
        }
    }

    // the root reaches TERMINATED only after all descendants
    let positions: Vec<(u64, usize)> = engine
        .records()
        .iter()
        .enumerate()
        .filter_map(|(i, r)| match &r.body {
            RecordBody::ElementTerminated(e) => Some((e.element_instance_key, i)),
            _ => None,
        })
        .collect();
    let root_position = positions.iter().find(|(k, _)| *k == root).unwrap().1;
    for (key, position) in &positions {
        if *key != root {
            assert!(position < &root_position);
        }
    }
}

#[test]
fn test_buffered_message_starts_process_and_correlates_on_completion() {
    let mut engine = Engine::new();
    engine
        .deploy(
            ProcessDefinition::from_yaml(
                r#"
id: intake
elements:
  - id: on_order
    kind: start_event
    message:
      name: order_placed
    outgoing: [handle]
  - id: handle
    kind: task
"#,
            )
            .unwrap(),
        )
        .unwrap();

    let started = engine
        .publish_message(
            "order_placed",
            "order-1",
            vec![("sku".to_string(), json!("A-7"))],
        )
        .unwrap();
    let root = started.expect("message should start an instance");

    // the buffered trigger picked the message start event and its
    // variables landed in the root scope
    assert_eq!(engine.state().variable(root, "sku"), Some(json!("A-7")));
    assert!(engine.state().buffered_message_for(root).is_some());
    let handle = find_key(&engine, "handle").unwrap();

    engine.submit(Command::CompleteElement {
        element_instance_key: handle,
    });
    engine.run_to_idle().unwrap();

    // completion answered the buffered message
    assert!(engine.state().buffered_message_for(root).is_none());
    assert!(engine
        .records()
        .iter()
        .any(|r| matches!(&r.body, RecordBody::MessageCorrelated { .. })));
}

#[test]
fn test_interrupting_boundary_event_replaces_activity() {
    let (mut engine, root) = support_engine();
    let work = find_key(&engine, "work").unwrap();

    engine
        .publish_message("cancel", "", vec![("reason".to_string(), json!("too late"))])
        .unwrap();

    // the task was terminated and the boundary event continued the flow
    assert!(engine.state().instance(work).is_none());
    let cleanup = find_key(&engine, "cleanup").unwrap();
    assert_eq!(
        engine.state().instance(cleanup).unwrap().state,
        Lifecycle::Activated
    );
    assert!(find_key(&engine, "wrap_up").is_none());

    // the event-carried variable was projected by the output mapping
    assert_eq!(
        engine.state().variable(root, "cancel_reason"),
        Some(json!("too late"))
    );
}

#[test]
fn test_non_interrupting_boundary_event_runs_alongside() {
    let (mut engine, _root) = support_engine();
    let work = find_key(&engine, "work").unwrap();

    engine.publish_message("remind", "", vec![]).unwrap();

    // the activity keeps running, the event path runs next to it
    assert_eq!(
        engine.state().instance(work).unwrap().state,
        Lifecycle::Activated
    );
    assert!(find_key(&engine, "nudge").is_some());

    // it can fire again
    engine.publish_message("remind", "", vec![]).unwrap();
    let nudges = engine
        .state()
        .all_instances()
        .iter()
        .filter(|i| i.element_id == "nudge")
        .count();
    assert_eq!(nudges, 2);

    // completing the task still works and closes its subscriptions
    engine.submit(Command::CompleteElement {
        element_instance_key: work,
    });
    engine.run_to_idle().unwrap();
    engine.publish_message("remind", "", vec![]).unwrap();
    let nudges_after = engine
        .state()
        .all_instances()
        .iter()
        .filter(|i| i.element_id == "nudge")
        .count();
    assert_eq!(nudges_after, 2, "no new subscription after completion");
}

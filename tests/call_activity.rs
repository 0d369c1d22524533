//! Call Activity Integration Tests
//!
//! Covers called-process resolution failures, variable propagation into
//! and out of the called instance, and termination cascading across the
//! process boundary.

use procflow::domain::{FailureKind, Lifecycle, ProcessDefinition};
use procflow::{Command, Engine, RecordBody};
use serde_json::json;

const PARENT_YAML: &str = r#"
id: parent
elements:
  - id: start
    kind: start_event
    outgoing: [invoke]
  - id: invoke
    kind: call_activity
    called_element: '"billing"'
    propagate_all_child_variables: false
    outputs:
      - source: invoice_total
        target: total
    outgoing: [after]
  - id: after
    kind: task
"#;

const BILLING_YAML: &str = r#"
id: billing
elements:
  - id: bill_start
    kind: start_event
    outgoing: [bill_task]
  - id: bill_task
    kind: task
    outputs:
      - source: invoice_total
        target: invoice_total
"#;

const MESSAGE_ONLY_YAML: &str = r#"
id: billing
elements:
  - id: on_request
    kind: start_event
    message:
      name: billing_requested
"#;

fn deploy(engine: &mut Engine, yaml: &str) {
    engine
        .deploy(ProcessDefinition::from_yaml(yaml).unwrap())
        .unwrap();
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
fn test_called_process_resolved_and_child_spawned() {
    let mut engine = Engine::new();
    deploy(&mut engine, PARENT_YAML);
    deploy(&mut engine, BILLING_YAML);

    let root = engine
        .create_instance("parent", vec![("amount".to_string(), json!(21))])
        .unwrap();

    let invoke = find_key(&engine, "invoke").unwrap();
    let invoke_instance = engine.state().instance(invoke).unwrap();
    assert_eq!(invoke_instance.state, Lifecycle::Activated);
    assert_ne!(invoke_instance.called_child_key, 0);

    // the child runs as its own process instance with the caller's
    // variables copied into its root scope
    let child = engine.state().called_child(invoke).unwrap();
    assert_eq!(child.element_id, "billing");
    assert_eq!(child.parent_process_instance_key, root);
    assert_eq!(child.parent_element_instance_key, invoke);
    assert_eq!(engine.state().variable(child.key, "amount"), Some(json!(21)));
}

#[test]
fn test_unknown_called_process_raises_incident_without_child() {
    let mut engine = Engine::new();
    deploy(&mut engine, PARENT_YAML);
    // billing is never deployed

    let root = engine.create_instance("parent", vec![]).unwrap();

    let incidents = engine.state().incidents_for_instance(root);
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].failure.kind, FailureKind::CalledElementError);

    let invoke = find_key(&engine, "invoke").unwrap();
    assert_eq!(
        engine.state().instance(invoke).unwrap().state,
        Lifecycle::Activating
    );
    assert_eq!(engine.state().instance(invoke).unwrap().called_child_key, 0);
}

#[test]
fn test_target_without_none_start_event_raises_called_element_error() {
    let mut engine = Engine::new();
    deploy(&mut engine, PARENT_YAML);
    deploy(&mut engine, MESSAGE_ONLY_YAML);

    let root = engine.create_instance("parent", vec![]).unwrap();

    let incidents = engine.state().incidents_for_instance(root);
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].failure.kind, FailureKind::CalledElementError);
    assert!(incidents[0].failure.message.contains("none start event"));

    // no child process instance was spawned
    assert!(find_key(&engine, "billing").is_none());
}

#[test]
fn test_incident_resolution_after_deploying_target() {
    let mut engine = Engine::new();
    deploy(&mut engine, PARENT_YAML);

    let root = engine.create_instance("parent", vec![]).unwrap();
    let incident_key = engine.state().incidents_for_instance(root)[0].key;

    deploy(&mut engine, BILLING_YAML);
    engine.resolve_incident(incident_key).unwrap();

    let invoke = find_key(&engine, "invoke").unwrap();
    assert_eq!(
        engine.state().instance(invoke).unwrap().state,
        Lifecycle::Activated
    );
    assert!(engine.state().called_child(invoke).is_some());
}

#[test]
fn test_child_completion_propagates_outputs_exactly_once() {
    let mut engine = Engine::new();
    deploy(&mut engine, PARENT_YAML);
    deploy(&mut engine, BILLING_YAML);

    let root = engine
        .create_instance("parent", vec![("amount".to_string(), json!(21))])
        .unwrap();
    let invoke = find_key(&engine, "invoke").unwrap();
    let child_key = engine.state().called_child(invoke).unwrap().key;

    let bill_task = find_key(&engine, "bill_task").unwrap();
    engine
        .set_task_variable(bill_task, "invoice_total".to_string(), json!(42))
        .unwrap();
    engine.submit(Command::CompleteElement {
        element_instance_key: bill_task,
    });
    engine.run_to_idle().unwrap();

    // declared output arrived in the caller scope
    assert_eq!(engine.state().variable(root, "total"), Some(json!(42)));

    // both the called instance and the call activity removed themselves
    assert!(engine.state().instance(child_key).is_none());
    assert!(engine.state().instance(invoke).is_none());

    // exactly one write of the mapped output into the caller scope
    let writes = engine
        .records()
        .iter()
        .filter(|r| {
            matches!(
                &r.body,
                RecordBody::VariableSet { scope_key, name, .. }
                    if *scope_key == root && name == "total"
            )
        })
        .count();
    assert_eq!(writes, 1);

    // the flow continued in the caller
    assert!(find_key(&engine, "after").is_some());
}

#[test]
fn test_termination_cascades_through_called_process() {
    let mut engine = Engine::new();
    deploy(&mut engine, PARENT_YAML);
    deploy(&mut engine, BILLING_YAML);

    let root = engine.create_instance("parent", vec![]).unwrap();
    let invoke = find_key(&engine, "invoke").unwrap();
    let child_key = engine.state().called_child(invoke).unwrap().key;
    let bill_task = find_key(&engine, "bill_task").unwrap();

    engine.submit(Command::TerminateElement {
        element_instance_key: root,
    });
    engine.run_to_idle().unwrap();

    // everything is gone, in leaf-to-root order
    assert!(engine.state().all_instances().is_empty());

    let terminated_order: Vec<u64> = engine
        .records()
        .iter()
        .filter_map(|r| match &r.body {
            RecordBody::ElementTerminated(e) => Some(e.element_instance_key),
            _ => None,
        })
        .collect();
    assert_eq!(terminated_order, vec![bill_task, child_key, invoke, root]);
}

//! Multi-Instance Body Integration Tests
//!
//! Covers parallel and sequential child creation, loop counters, the
//! output-collection round trip, and incident behavior when the input
//! collection is missing or mutated mid-loop.

use procflow::domain::{ElementKind, FailureKind, Lifecycle, ProcessDefinition};
use procflow::{Command, Engine};
use serde_json::json;

const ORDER_YAML: &str = r#"
id: order
elements:
  - id: start
    kind: start_event
    outgoing: [reserve]
  - id: reserve
    kind: multi_instance_body
    loop:
      mode: MODE
      input_collection: items
      input_element: item
      output_collection: results
      output_element: item * 2
    elements:
      - id: reserve_item
        kind: task
    outgoing: [ship]
  - id: ship
    kind: task
"#;

fn engine_with_order(mode: &str) -> Engine {
    let yaml = ORDER_YAML.replace("MODE", mode);
    let mut engine = Engine::new();
    engine
        .deploy(ProcessDefinition::from_yaml(&yaml).unwrap())
        .unwrap();
    engine
}

/// Keys of the live multi-instance children, in activation order.
fn child_keys(engine: &Engine, element_id: &str) -> Vec<u64> {
    engine
        .state()
        .all_instances()
        .iter()
        .filter(|i| i.element_id == element_id)
        .map(|i| i.key)
        .collect()
}

fn body_key(engine: &Engine) -> u64 {
    engine
        .state()
        .all_instances()
        .iter()
        .find(|i| i.kind == ElementKind::MultiInstanceBody)
        .map(|i| i.key)
        .expect("multi-instance body should be active")
}

fn complete(engine: &mut Engine, key: u64) {
    engine.submit(Command::CompleteElement {
        element_instance_key: key,
    });
    engine.run_to_idle().unwrap();
}

#[test]
fn test_parallel_activates_all_children_with_unique_counters() {
    let mut engine = engine_with_order("parallel");
    engine
        .create_instance("order", vec![("items".to_string(), json!([1, 2, 3]))])
        .unwrap();

    let children = child_keys(&engine, "reserve_item");
    assert_eq!(children.len(), 3, "one child per item before any completes");

    let mut counters: Vec<u32> = children
        .iter()
        .map(|key| engine.state().instance(*key).unwrap().loop_counter)
        .collect();
    counters.sort_unstable();
    assert_eq!(counters, vec![1, 2, 3]);

    for key in &children {
        let child = engine.state().instance(*key).unwrap();
        assert_eq!(child.state, Lifecycle::Activated);
        let counter = child.loop_counter as i64;
        assert_eq!(engine.state().variable(*key, "item"), Some(json!(counter)));
    }
}

#[test]
fn test_parallel_output_round_trip_ignores_completion_order() {
    let mut engine = engine_with_order("parallel");
    let root = engine
        .create_instance("order", vec![("items".to_string(), json!([1, 2, 3]))])
        .unwrap();

    // complete the children back to front
    let mut children = child_keys(&engine, "reserve_item");
    children.reverse();
    for key in children {
        complete(&mut engine, key);
    }

    // the body completed and handed the collection to the process scope;
    // entries are in input order, not completion order
    assert_eq!(
        engine.state().variable(root, "results"),
        Some(json!([2, 4, 6]))
    );
    assert!(child_keys(&engine, "reserve_item").is_empty());

    // the flow continued past the body
    let ship = engine
        .state()
        .all_instances()
        .iter()
        .find(|i| i.element_id == "ship")
        .map(|i| i.key)
        .expect("ship task should be active");
    assert_eq!(
        engine.state().instance(ship).unwrap().state,
        Lifecycle::Activated
    );
}

#[test]
fn test_sequential_runs_one_child_at_a_time_in_order() {
    let mut engine = engine_with_order("sequential");
    let root = engine
        .create_instance("order", vec![("items".to_string(), json!([10, 20, 30]))])
        .unwrap();

    for expected_counter in 1..=3u32 {
        let children = child_keys(&engine, "reserve_item");
        assert_eq!(children.len(), 1, "at most one non-terminal child");

        let child = engine.state().instance(children[0]).unwrap();
        assert_eq!(child.loop_counter, expected_counter);
        assert_eq!(
            engine.state().variable(child.key, "item"),
            Some(json!(expected_counter as i64 * 10))
        );
        complete(&mut engine, children[0]);
    }

    assert_eq!(
        engine.state().variable(root, "results"),
        Some(json!([20, 40, 60]))
    );
}

#[test]
fn test_empty_collection_completes_body_without_children() {
    let mut engine = engine_with_order("parallel");
    let root = engine
        .create_instance("order", vec![("items".to_string(), json!([]))])
        .unwrap();

    // the body went straight to completion, no child was ever activated
    let activated_children = engine
        .records()
        .iter()
        .filter(|r| match &r.body {
            procflow::RecordBody::ElementActivating(e) => e.element_id == "reserve_item",
            _ => false,
        })
        .count();
    assert_eq!(activated_children, 0);

    assert_eq!(engine.state().variable(root, "results"), Some(json!([])));
    assert!(engine
        .records()
        .iter()
        .any(|r| matches!(&r.body, procflow::RecordBody::ElementCompleted(e) if e.element_id == "reserve")));
}

#[test]
fn test_missing_collection_raises_incident_and_blocks_activation() {
    let mut engine = engine_with_order("parallel");
    let root = engine.create_instance("order", vec![]).unwrap();

    let incidents = engine.state().incidents_for_instance(root);
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].failure.kind, FailureKind::ExpressionError);

    let body = body_key(&engine);
    assert_eq!(
        engine.state().instance(body).unwrap().state,
        Lifecycle::Activating,
        "the body stays non-terminal behind the incident"
    );
    assert!(child_keys(&engine, "reserve_item").is_empty());
}

#[test]
fn test_incident_resolution_re_drives_blocked_activation() {
    let mut engine = engine_with_order("parallel");
    let root = engine.create_instance("order", vec![]).unwrap();
    let incident_key = engine.state().incidents_for_instance(root)[0].key;

    // supply the collection, then resolve
    engine
        .set_task_variable(root, "items".to_string(), json!([5]))
        .unwrap();
    engine.resolve_incident(incident_key).unwrap();

    assert!(engine.state().incidents_for_instance(root).is_empty());
    let children = child_keys(&engine, "reserve_item");
    assert_eq!(children.len(), 1);
    assert_eq!(
        engine.state().variable(children[0], "item"),
        Some(json!(5))
    );
}

#[test]
fn test_shrunk_output_collection_blocks_completion_until_resolved() {
    let mut engine = engine_with_order("parallel");
    let root = engine
        .create_instance("order", vec![("items".to_string(), json!([1, 2, 3]))])
        .unwrap();
    let body = body_key(&engine);
    let children = child_keys(&engine, "reserve_item");

    // concurrent mutation: the shared output collection loses its slots
    engine
        .set_task_variable(body, "results".to_string(), json!([null]))
        .unwrap();

    // the child with counter 3 cannot write slot 2 any more
    let last = *children.last().unwrap();
    complete(&mut engine, last);

    let incidents = engine.state().incidents_for_element(last);
    assert_eq!(incidents.len(), 1);
    assert_eq!(incidents[0].failure.kind, FailureKind::ExtractValueError);
    assert_eq!(
        engine.state().instance(last).unwrap().state,
        Lifecycle::Completing,
        "the child waits in COMPLETING until the incident is resolved"
    );

    // restore the collection and resolve; the blocked completion re-runs
    let incident_key = incidents[0].key;
    engine
        .set_task_variable(body, "results".to_string(), json!([null, null, null]))
        .unwrap();
    engine.resolve_incident(incident_key).unwrap();

    assert!(engine.state().instance(last).is_none());
    assert_eq!(
        engine.state().variable(body, "results"),
        Some(json!([null, null, 6]))
    );

    // other branches kept working the whole time
    assert_eq!(child_keys(&engine, "reserve_item").len(), 2);
    complete(&mut engine, children[0]);
    complete(&mut engine, children[1]);
    assert_eq!(
        engine.state().variable(root, "results"),
        Some(json!([2, 4, 6]))
    );
}

#[test]
fn test_interrupting_boundary_republishes_after_children_terminate() {
    const BATCH_YAML: &str = r#"
id: batch
elements:
  - id: start
    kind: start_event
    outgoing: [body]
  - id: body
    kind: multi_instance_body
    loop:
      mode: parallel
      input_collection: items
      input_element: item
    elements:
      - id: step
        kind: task
  - id: abort
    kind: boundary_event
    attached_to: body
    message:
      name: abort
    interrupting: true
    outgoing: [handle]
  - id: handle
    kind: task
"#;
    let mut engine = Engine::new();
    engine
        .deploy(ProcessDefinition::from_yaml(BATCH_YAML).unwrap())
        .unwrap();
    engine
        .create_instance("batch", vec![("items".to_string(), json!([1, 2]))])
        .unwrap();
    let body = body_key(&engine);
    assert_eq!(child_keys(&engine, "step").len(), 2);

    engine.publish_message("abort", "", vec![]).unwrap();

    // the body cascaded termination to its children, terminated itself,
    // and only then the held boundary trigger continued the flow
    assert!(engine.state().instance(body).is_none());
    assert!(child_keys(&engine, "step").is_empty());

    let terminated: Vec<String> = engine
        .records()
        .iter()
        .filter_map(|r| match &r.body {
            procflow::RecordBody::ElementTerminated(e) => Some(e.element_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(terminated, vec!["step", "step", "body"]);

    let handle = child_keys(&engine, "handle");
    assert_eq!(handle.len(), 1);
    assert_eq!(
        engine.state().instance(handle[0]).unwrap().state,
        Lifecycle::Activated
    );
}

#[test]
fn test_sequential_tolerates_collection_shrinking_mid_loop() {
    let mut engine = engine_with_order("sequential");
    let root = engine
        .create_instance("order", vec![("items".to_string(), json!([1, 2, 3]))])
        .unwrap();

    let first = child_keys(&engine, "reserve_item")[0];
    // the collection is re-evaluated at every next-item decision
    engine
        .set_task_variable(root, "items".to_string(), json!([1]))
        .unwrap();
    complete(&mut engine, first);

    // no second child: the shrunk collection is exhausted
    assert!(child_keys(&engine, "reserve_item").is_empty());
    assert_eq!(
        engine.state().variable(root, "results"),
        Some(json!([2, null, null]))
    );
}

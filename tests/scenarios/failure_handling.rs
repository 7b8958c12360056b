//! Test: failure handling - forks, unsupported operations and broken plans

use crate::helpers::*;
use node_engine::core::{FailureKind, Node, NodeCategory, Plan, Status, StepType};
use node_engine::execution::{EngineEvent, SdkResponseEvent};
use node_engine::step::StepResponse;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_fork_waits_for_every_child_before_failing() {
    let mut steps = registry();
    register_sync(&mut steps, Arc::new(RecordingSyncStep::default()));
    let plan = fork_plan(
        "fork",
        vec![
            step("unit", SYNC_STEP),
            step("lint", SYNC_STEP).with_parameters(json!({ "fail": true })),
            step("docs", SYNC_STEP),
        ],
    );
    let engine = engine_for(plan, steps, Arc::new(ScriptedTaskExecutor::new(Reply::Hold))).await;

    let concluded = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&concluded);
    engine.add_event_handler(move |event| {
        if let EngineEvent::NodeConcluded { identifier, .. } = event {
            sink.lock().unwrap().push(identifier);
        }
    });

    let run = engine.run_plan(engine.new_setup("fork")).await.unwrap();
    let id = run.plan_execution_id.clone();
    assert_eq!(finish(run).await, Status::Failed);

    let concluded = concluded.lock().unwrap();
    let fork_at = concluded.iter().position(|id| id == "fork").unwrap();
    for child in ["unit", "lint", "docs"] {
        let child_at = concluded.iter().position(|id| id == child).unwrap();
        assert!(child_at < fork_at, "{} concluded after the fork", child);
    }

    let all = executions(&engine, &id).await;
    let fork = only(&all, "fork");
    assert_eq!(fork.status, Status::Failed);
    assert_eq!(fork.child_statuses.len(), 3);
    assert_eq!(fork.failure_info, only(&all, "lint").failure_info);
    assert_eq!(only(&all, "unit").status, Status::Succeeded);
    assert_eq!(only(&all, "docs").status, Status::Succeeded);

    // Fork children each notify under their own id
    for child in ["unit", "lint", "docs"] {
        let execution = only(&all, child);
        assert_eq!(execution.notify_id.as_deref(), Some(execution.uuid.as_str()));
        assert_eq!(execution.parent_id.as_deref(), Some(fork.uuid.as_str()));
    }
}

#[tokio::test]
async fn test_step_response_sent_to_stage_errors_it() {
    let mut steps = registry();
    register_task(&mut steps, Arc::new(RecordingTaskStep::default()));
    let executor = Arc::new(ScriptedTaskExecutor::new(Reply::Hold));
    let plan = stage_plan("misrouted", vec![step("remote", TASK_STEP)]);
    let engine = engine_for(plan, steps, executor).await;

    let run = engine.run_plan(engine.new_setup("misrouted")).await.unwrap();
    let id = run.plan_execution_id.clone();
    wait_for_status(&engine, &id, "remote", Status::TaskWaiting).await;

    let all = executions(&engine, &id).await;
    let stage = only(&all, "stage");
    engine
        .publish(SdkResponseEvent::step_response(
            stage.context.clone(),
            StepResponse::succeeded(),
        ))
        .unwrap();

    assert_eq!(finish(run).await, Status::Failed);

    let all = executions(&engine, &id).await;
    let stage = only(&all, "stage");
    assert_eq!(stage.status, Status::Errored);
    let failure = stage.failure_info.clone().unwrap();
    assert_eq!(failure.kind, FailureKind::Definition);
    assert!(failure.message.contains("not supported"));
    assert_eq!(only(&all, "root").status, Status::Failed);
}

#[tokio::test]
async fn test_missing_child_definition_errors_parent() {
    let mut plan = Plan::new("dangling", "dangling", "root");
    plan.add_node(
        Node::new("root", "root", NodeCategory::Plan, StepType::new("Plan"))
            .with_children(vec!["ghost".to_string()]),
    );
    let engine = engine_for(
        plan,
        registry(),
        Arc::new(ScriptedTaskExecutor::new(Reply::Hold)),
    )
    .await;

    let run = engine.run_plan(engine.new_setup("dangling")).await.unwrap();
    let id = run.plan_execution_id.clone();
    assert_eq!(finish(run).await, Status::Errored);

    let all = executions(&engine, &id).await;
    assert_eq!(all.len(), 1);
    let root = only(&all, "root");
    assert_eq!(root.status, Status::Errored);
    assert_eq!(root.failure_info.as_ref().unwrap().kind, FailureKind::Definition);
}

#[tokio::test]
async fn test_fork_stops_after_missing_child() {
    let sync = Arc::new(RecordingSyncStep::default());
    let mut steps = registry();
    register_sync(&mut steps, Arc::clone(&sync));
    let mut plan = fork_plan("gap", vec![step("unit", SYNC_STEP), step("docs", SYNC_STEP)]);
    plan.add_node(
        Node::new("fork", "fork", NodeCategory::Fork, StepType::new("Fork")).with_children(vec![
            "unit".to_string(),
            "ghost".to_string(),
            "docs".to_string(),
        ]),
    );
    let engine = engine_for(plan, steps, Arc::new(ScriptedTaskExecutor::new(Reply::Hold))).await;

    let run = engine.run_plan(engine.new_setup("gap")).await.unwrap();
    let id = run.plan_execution_id.clone();
    assert_eq!(finish(run).await, Status::Failed);
    wait_for_status(&engine, &id, "unit", Status::Succeeded).await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let all = executions(&engine, &id).await;
    let fork = only(&all, "fork");
    assert_eq!(fork.status, Status::Errored);
    assert_eq!(fork.failure_info.as_ref().unwrap().kind, FailureKind::Definition);
    assert!(by_identifier(&all, "docs").is_empty());
    assert_eq!(sync.executions.load(Ordering::SeqCst), 1);

    // The errored fork no longer waits for the child it did start
    assert_eq!(engine.wait_notify().pending_count(), 0);
    assert_eq!(engine.wait_notify().early_count(), 0);
}

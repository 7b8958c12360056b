//! Test: plan lifecycle - records, links and events of a successful run

use crate::helpers::*;
use node_engine::core::{FailureKind, Node, NodeCategory, Plan, Status, StepType};
use node_engine::execution::{EngineEvent, SdkResponseEvent, SdkResponseEventType, SdkResponsePayload};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Root has no waiter; children notify under their own id and siblings reuse it
#[tokio::test]
async fn test_links_of_sequential_steps() {
    let sync = Arc::new(RecordingSyncStep::default());
    let mut steps = registry();
    register_sync(&mut steps, Arc::clone(&sync));
    let plan = stage_plan("links", vec![step("a", SYNC_STEP), step("b", SYNC_STEP)]);
    let engine = engine_for(plan, steps, Arc::new(ScriptedTaskExecutor::new(Reply::Hold))).await;

    let run = engine.run_plan(engine.new_setup("links")).await.unwrap();
    let id = run.plan_execution_id.clone();
    assert_eq!(finish(run).await, Status::Succeeded);

    let all = executions(&engine, &id).await;
    assert_eq!(all.len(), 4);
    let (root, stage, a, b) = (
        only(&all, "root"),
        only(&all, "stage"),
        only(&all, "a"),
        only(&all, "b"),
    );

    assert!(root.notify_id.is_none());
    assert!(root.parent_id.is_none());
    assert_eq!(root.context.levels().len(), 1);

    assert_eq!(stage.parent_id.as_deref(), Some(root.uuid.as_str()));
    assert_eq!(stage.notify_id.as_deref(), Some(stage.uuid.as_str()));

    assert_eq!(a.parent_id.as_deref(), Some(stage.uuid.as_str()));
    assert_eq!(a.notify_id.as_deref(), Some(a.uuid.as_str()));
    assert_eq!(a.next_id.as_deref(), Some(b.uuid.as_str()));

    assert_eq!(b.previous_id.as_deref(), Some(a.uuid.as_str()));
    assert_eq!(b.parent_id, a.parent_id);
    assert_eq!(b.notify_id, a.notify_id);
    assert!(b.next_id.is_none());

    assert!(all.iter().all(|e| e.status == Status::Succeeded));
    // The last sibling answers for the whole chain
    assert_eq!(stage.child_statuses.get(&b.uuid), Some(&Status::Succeeded));
    assert_eq!(root.child_statuses.get(&stage.uuid), Some(&Status::Succeeded));
}

/// A sync step is queued once, then concludes with a single record
#[tokio::test]
async fn test_sync_step_single_record() {
    let sync = Arc::new(RecordingSyncStep::default());
    let mut steps = registry();
    register_sync(&mut steps, Arc::clone(&sync));
    let plan = stage_plan("sync", vec![step("only", SYNC_STEP)]);
    let engine = engine_for(plan, steps, Arc::new(ScriptedTaskExecutor::new(Reply::Hold))).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    engine.add_event_handler(move |event| match event {
        EngineEvent::NodeQueued {
            identifier,
            category: NodeCategory::Step,
            ..
        } => sink.lock().unwrap().push(format!("queued {}", identifier)),
        EngineEvent::NodeStarted {
            identifier,
            category: NodeCategory::Step,
            mode,
            ..
        } => sink.lock().unwrap().push(format!("started {} {}", identifier, mode)),
        EngineEvent::NodeConcluded {
            identifier,
            category: NodeCategory::Step,
            status,
            ..
        } => sink.lock().unwrap().push(format!("concluded {} {}", identifier, status)),
        _ => {}
    });

    let run = engine.run_plan(engine.new_setup("sync")).await.unwrap();
    let id = run.plan_execution_id.clone();
    assert_eq!(finish(run).await, Status::Succeeded);

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "queued only".to_string(),
            "started only SYNC".to_string(),
            format!("concluded only {}", Status::Succeeded),
        ]
    );

    let all = executions(&engine, &id).await;
    let only_step = only(&all, "only");
    assert_eq!(only_step.outcomes.get("attempt"), Some(&json!(0)));
    assert!(only_step.started_at.is_some());
    assert!(only_step.ended_at.is_some());
    assert_eq!(sync.executions.load(Ordering::SeqCst), 1);
}

/// An event nobody processes errors its node instead of leaving it waiting
#[tokio::test]
async fn test_unknown_event_type_errors_its_node() {
    let task = Arc::new(RecordingTaskStep::default());
    let mut steps = registry();
    register_task(&mut steps, Arc::clone(&task));
    let executor = Arc::new(ScriptedTaskExecutor::new(Reply::Hold));
    let plan = fork_plan(
        "custom",
        vec![
            step("t", TASK_STEP).with_parameters(json!({ "n": 1 })),
            step("other", TASK_STEP).with_parameters(json!({ "n": 2 })),
        ],
    );
    let engine = engine_for(plan, steps, executor.clone()).await;

    let run = engine.run_plan(engine.new_setup("custom")).await.unwrap();
    let id = run.plan_execution_id.clone();
    let waiting = wait_for_status(&engine, &id, "t", Status::TaskWaiting).await;
    wait_for_status(&engine, &id, "other", Status::TaskWaiting).await;

    engine
        .publish(SdkResponseEvent::new(
            waiting.context.clone(),
            SdkResponseEventType::Custom("telemetry".to_string()),
            SdkResponsePayload::Custom(json!({ "cpu": 0.5 })),
        ))
        .unwrap();
    let errored = wait_for_status(&engine, &id, "t", Status::Errored).await;
    let failure = errored.failure_info.clone().unwrap();
    assert_eq!(failure.kind, FailureKind::Dispatch);
    assert!(failure.message.contains("telemetry"));

    // The sibling is still driven by its own result
    let task_for = |n: i64| {
        executor
            .queued
            .lock()
            .unwrap()
            .iter()
            .find(|(_, request)| request.parameters == json!({ "n": n }))
            .map(|(task_id, _)| task_id.clone())
            .unwrap()
    };
    engine.notify_task_result(&task_for(2), ok_result());
    assert_eq!(finish(run).await, Status::Failed);

    let all = executions(&engine, &id).await;
    assert_eq!(only(&all, "other").status, Status::Succeeded);
    assert_eq!(only(&all, "other").outcomes.get("output"), Some(&json!({ "ok": true })));
    assert_eq!(only(&all, "fork").failure_info.as_ref(), Some(&failure));
    assert_eq!(task.handled.load(Ordering::SeqCst), 1);

    // The errored node no longer waits for its task
    engine.notify_task_result(&task_for(1), ok_result());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(task.handled.load(Ordering::SeqCst), 1);
    assert_eq!(engine.wait_notify().pending_count(), 0);
    assert_eq!(engine.wait_notify().early_count(), 0);
}

/// A plan whose root is a bare step runs as a single record
#[tokio::test]
async fn test_root_step_node_runs_alone() {
    let sync = Arc::new(RecordingSyncStep::default());
    let mut steps = registry();
    register_sync(&mut steps, Arc::clone(&sync));
    let mut plan = Plan::new("bare", "bare", "root");
    plan.add_node(Node::new("root", "root", NodeCategory::Step, StepType::new(SYNC_STEP)));
    let engine = engine_for(plan, steps, Arc::new(ScriptedTaskExecutor::new(Reply::Hold))).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    engine.add_event_handler(move |event| match event {
        EngineEvent::NodeQueued { identifier, .. } => {
            sink.lock().unwrap().push(format!("queued {}", identifier))
        }
        EngineEvent::NodeConcluded { identifier, status, .. } => {
            sink.lock().unwrap().push(format!("concluded {} {}", identifier, status))
        }
        _ => {}
    });

    let run = engine.run_plan(engine.new_setup("bare")).await.unwrap();
    let id = run.plan_execution_id.clone();
    assert_eq!(finish(run).await, Status::Succeeded);

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "queued root".to_string(),
            format!("concluded root {}", Status::Succeeded),
        ]
    );

    let all = executions(&engine, &id).await;
    assert_eq!(all.len(), 1);
    let root = only(&all, "root");
    assert_eq!(root.status, Status::Succeeded);
    assert_eq!(root.category, NodeCategory::Step);
    assert!(root.notify_id.is_none());
    assert!(root.parent_id.is_none());
    assert_eq!(sync.executions.load(Ordering::SeqCst), 1);
}

/// Conclusions reach handlers bottom-up, and the run reports completion last
#[tokio::test]
async fn test_plan_completed_follows_root_conclusion() {
    let mut steps = registry();
    register_sync(&mut steps, Arc::new(RecordingSyncStep::default()));
    let plan = stage_plan("order", vec![step("x", SYNC_STEP), step("y", SYNC_STEP)]);
    let engine = engine_for(plan, steps, Arc::new(ScriptedTaskExecutor::new(Reply::Hold))).await;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    engine.add_event_handler(move |event| match event {
        EngineEvent::PlanStarted { .. } => sink.lock().unwrap().push("started".to_string()),
        EngineEvent::NodeConcluded { identifier, .. } => sink.lock().unwrap().push(identifier),
        EngineEvent::PlanCompleted { status, .. } => {
            sink.lock().unwrap().push(format!("completed {}", status))
        }
        _ => {}
    });

    let run = engine.run_plan(engine.new_setup("order")).await.unwrap();
    finish(run).await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            "started".to_string(),
            "x".to_string(),
            "y".to_string(),
            "stage".to_string(),
            "root".to_string(),
            format!("completed {}", Status::Succeeded),
        ]
    );
}

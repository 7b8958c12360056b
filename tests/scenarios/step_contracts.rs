//! Test: step contracts - validation, security scope and chain continuity

use crate::helpers::*;
use node_engine::core::{FailureKind, Status};
use node_engine::execution::LocalTaskExecutor;
use node_engine::security::{active_scope_depth, StaticAccessControl, CONNECTOR_ACCESS, PIPELINE_EXECUTE};
use node_engine::step::StepRegistry;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_chain_validates_once_and_carries_pass_through() {
    let chain = Arc::new(RecordingChainStep::new(4));
    let mut steps = registry();
    register_chain(&mut steps, Arc::clone(&chain));
    let executor = Arc::new(ScriptedTaskExecutor::new(Reply::After(
        Duration::from_millis(2),
        ok_result(),
    )));
    let plan = stage_plan("chain", vec![step("links", CHAIN_STEP)]);
    let engine = engine_for(plan, steps, executor.clone()).await;

    let run = engine.run_plan(engine.new_setup("chain")).await.unwrap();
    let id = run.plan_execution_id.clone();
    assert_eq!(finish(run).await, Status::Succeeded);

    assert_eq!(chain.validations.load(Ordering::SeqCst), 1);
    assert_eq!(chain.starts.load(Ordering::SeqCst), 1);
    assert_eq!(chain.next_links.load(Ordering::SeqCst), 3);
    assert_eq!(chain.finalizations.load(Ordering::SeqCst), 1);
    assert_eq!(executor.task_ids().len(), 4);

    // Each call sees what the call before it returned
    assert_eq!(
        *chain.seen.lock().unwrap(),
        vec![
            json!({ "done": 1 }),
            json!({ "done": 2 }),
            json!({ "done": 3 }),
            json!({ "done": 4 }),
        ]
    );

    // Every call ran inside exactly one scope, and none is left behind
    assert!(chain.depths.lock().unwrap().iter().all(|depth| *depth == 1));
    let context = chain.last_context.lock().unwrap().clone().unwrap();
    assert_eq!(active_scope_depth(&context), 0);

    let all = executions(&engine, &id).await;
    let links = only(&all, "links");
    assert_eq!(links.outcomes.get("links"), Some(&json!(4)));
    assert_eq!(links.executable_responses.len(), 4);
}

#[tokio::test]
async fn test_denied_step_never_runs_its_logic() {
    let sync = Arc::new(RecordingSyncStep::denying());
    let mut steps = registry();
    register_sync(&mut steps, Arc::clone(&sync));
    let plan = stage_plan("denied", vec![step("guarded", SYNC_STEP), step("after", SYNC_STEP)]);
    let engine = engine_for(plan, steps, Arc::new(ScriptedTaskExecutor::new(Reply::Hold))).await;

    let run = engine.run_plan(engine.new_setup("denied")).await.unwrap();
    let id = run.plan_execution_id.clone();
    assert_eq!(finish(run).await, Status::Failed);

    assert_eq!(sync.validations.load(Ordering::SeqCst), 1);
    assert_eq!(sync.executions.load(Ordering::SeqCst), 0);

    let all = executions(&engine, &id).await;
    let guarded = only(&all, "guarded");
    assert_eq!(guarded.status, Status::Failed);
    assert_eq!(
        guarded.failure_info.as_ref().unwrap().kind,
        FailureKind::Authorization
    );
    // A failed step does not advance to its sibling
    assert!(by_identifier(&all, "after").is_empty());
    assert_eq!(only(&all, "stage").status, Status::Failed);
}

#[tokio::test]
async fn test_task_steps_dispatch_in_order() {
    let task = Arc::new(RecordingTaskStep::default());
    let mut steps = registry();
    register_task(&mut steps, Arc::clone(&task));
    let executor = Arc::new(ScriptedTaskExecutor::new(Reply::After(
        Duration::from_millis(2),
        ok_result(),
    )));
    let plan = stage_plan(
        "tasks",
        vec![
            step("first", TASK_STEP).with_parameters(json!({ "n": 1 })),
            step("second", TASK_STEP).with_parameters(json!({ "n": 2 })),
        ],
    );
    let engine = engine_for(plan, steps, executor.clone()).await;

    let run = engine.run_plan(engine.new_setup("tasks")).await.unwrap();
    assert_eq!(finish(run).await, Status::Succeeded);

    assert_eq!(task.validations.load(Ordering::SeqCst), 2);
    assert_eq!(task.obtained.load(Ordering::SeqCst), 2);
    assert_eq!(task.handled.load(Ordering::SeqCst), 2);

    let queued = executor.queued.lock().unwrap();
    let params: Vec<_> = queued.iter().map(|(_, request)| request.parameters.clone()).collect();
    assert_eq!(params, vec![json!({ "n": 1 }), json!({ "n": 2 })]);
}

fn builtin_registry(permissions: &[&str]) -> StepRegistry {
    let acl = StaticAccessControl::new().grant("tester", permissions.iter().copied());
    StepRegistry::with_builtins(Arc::new(acl))
}

#[tokio::test]
async fn test_builtin_shell_chain_runs_locally() {
    let plan = stage_plan(
        "shell",
        vec![
            step("greet", "Log").with_parameters(json!({ "message": "starting" })),
            step("commands", "ShellChain")
                .with_parameters(json!({ "commands": ["echo one", "echo two"] })),
        ],
    );
    let engine = engine_for(
        plan,
        builtin_registry(&[PIPELINE_EXECUTE]),
        Arc::new(LocalTaskExecutor::new(30)),
    )
    .await;

    let run = engine.run_plan(engine.new_setup("shell")).await.unwrap();
    let id = run.plan_execution_id.clone();
    assert_eq!(finish(run).await, Status::Succeeded);

    let all = executions(&engine, &id).await;
    let outputs = only(&all, "commands").outcomes.get("outputs").cloned().unwrap();
    let outputs: Vec<String> = serde_json::from_value(outputs).unwrap();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].trim(), "one");
    assert_eq!(outputs[1].trim(), "two");
}

#[tokio::test]
async fn test_builtin_shell_needs_connector_access() {
    let plan = stage_plan(
        "connector",
        vec![step("deploy", "Shell")
            .with_parameters(json!({ "command": "echo deploy", "connector_ref": "prod-k8s" }))],
    );
    let engine = engine_for(
        plan,
        builtin_registry(&[PIPELINE_EXECUTE]),
        Arc::new(LocalTaskExecutor::new(30)),
    )
    .await;

    let run = engine.run_plan(engine.new_setup("connector")).await.unwrap();
    let id = run.plan_execution_id.clone();
    assert_eq!(finish(run).await, Status::Failed);

    let all = executions(&engine, &id).await;
    let failure = only(&all, "deploy").failure_info.clone().unwrap();
    assert_eq!(failure.kind, FailureKind::Authorization);
    assert!(failure.message.contains(CONNECTOR_ACCESS));
}

//! Test: remote task results - waiting, early delivery, failure and abort

use crate::helpers::*;
use node_engine::core::{FailureKind, Status};
use node_engine::step::TaskResult;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn task_engine_parts(reply: Reply) -> (Arc<RecordingTaskStep>, Arc<ScriptedTaskExecutor>, node_engine::step::StepRegistry) {
    let task = Arc::new(RecordingTaskStep::default());
    let mut steps = registry();
    register_task(&mut steps, Arc::clone(&task));
    (task, Arc::new(ScriptedTaskExecutor::new(reply)), steps)
}

#[tokio::test]
async fn test_task_step_waits_for_its_result() {
    let (task, executor, steps) = task_engine_parts(Reply::Hold);
    let plan = stage_plan("waiting", vec![step("remote", TASK_STEP)]);
    let engine = engine_for(plan, steps, executor.clone()).await;

    let run = engine.run_plan(engine.new_setup("waiting")).await.unwrap();
    let id = run.plan_execution_id.clone();
    wait_for_status(&engine, &id, "remote", Status::TaskWaiting).await;

    // Nothing moves until the result shows up
    tokio::time::sleep(Duration::from_millis(50)).await;
    let all = executions(&engine, &id).await;
    assert_eq!(only(&all, "remote").status, Status::TaskWaiting);
    assert_eq!(only(&all, "stage").status, Status::AsyncWaiting);
    assert!(run.status().is_none());
    assert_eq!(task.handled.load(Ordering::SeqCst), 0);
    assert_eq!(engine.wait_notify().pending_count(), 3);

    let task_id = executor.task_ids().remove(0);
    engine.notify_task_result(&task_id, ok_result());
    assert_eq!(finish(run).await, Status::Succeeded);
    assert_eq!(task.handled.load(Ordering::SeqCst), 1);
    assert_eq!(engine.wait_notify().pending_count(), 0);
}

/// A result reported before the engine starts waiting is not lost
#[tokio::test]
async fn test_result_arriving_before_wait_is_kept() {
    let (task, executor, steps) = task_engine_parts(Reply::Immediately(ok_result()));
    let plan = stage_plan("early", vec![step("fast", TASK_STEP), step("faster", TASK_STEP)]);
    let engine = engine_for(plan, steps, executor.clone()).await;

    let run = engine.run_plan(engine.new_setup("early")).await.unwrap();
    assert_eq!(finish(run).await, Status::Succeeded);
    assert_eq!(task.handled.load(Ordering::SeqCst), 2);
    assert_eq!(executor.task_ids().len(), 2);
}

#[tokio::test]
async fn test_failed_task_fails_the_step() {
    let (_task, executor, steps) =
        task_engine_parts(Reply::After(Duration::from_millis(2), TaskResult::failure("exit 3")));
    let plan = stage_plan("broken", vec![step("remote", TASK_STEP)]);
    let engine = engine_for(plan, steps, executor).await;

    let run = engine.run_plan(engine.new_setup("broken")).await.unwrap();
    let id = run.plan_execution_id.clone();
    assert_eq!(finish(run).await, Status::Failed);

    let all = executions(&engine, &id).await;
    let failure = only(&all, "remote").failure_info.clone().unwrap();
    assert_eq!(failure.kind, FailureKind::Task);
    assert!(failure.message.contains("exit 3"));

    // The root explains its failure with the step's
    assert_eq!(only(&all, "root").failure_info.as_ref(), Some(&failure));
}

#[tokio::test]
async fn test_late_result_after_abort_is_dropped() {
    let (task, executor, steps) = task_engine_parts(Reply::Hold);
    let plan = stage_plan("aborted", vec![step("slow", TASK_STEP)]);
    let engine = engine_for(plan, steps, executor.clone()).await;

    let run = engine.run_plan(engine.new_setup("aborted")).await.unwrap();
    let id = run.plan_execution_id.clone();
    wait_for_status(&engine, &id, "slow", Status::TaskWaiting).await;

    assert_eq!(engine.wait_notify().pending_count(), 3);
    let aborted = engine.abort_plan(&id).await.unwrap();
    assert_eq!(aborted, 3);
    assert_eq!(finish(run).await, Status::Aborted);
    assert_eq!(engine.wait_notify().pending_count(), 0);

    let task_id = executor.task_ids().remove(0);
    engine.notify_task_result(&task_id, ok_result());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let all = executions(&engine, &id).await;
    assert!(all.iter().all(|e| e.status == Status::Aborted));
    assert_eq!(task.handled.load(Ordering::SeqCst), 0);
    assert_eq!(engine.wait_notify().pending_count(), 0);
    assert_eq!(engine.wait_notify().early_count(), 0);
}

//! Test: retry and ignore-failure advisers

use crate::helpers::*;
use node_engine::core::{AdviserObtainment, Status};
use node_engine::execution::EngineEvent;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_retries_link_back_to_previous_attempt() {
    let sync = Arc::new(RecordingSyncStep::failing_first(2));
    let mut steps = registry();
    register_sync(&mut steps, Arc::clone(&sync));
    let plan = stage_plan(
        "retry",
        vec![
            step("flaky", SYNC_STEP).with_adviser(AdviserObtainment::Retry { max_retries: 2 }),
            step("next", SYNC_STEP),
        ],
    );
    let engine = engine_for(plan, steps, Arc::new(ScriptedTaskExecutor::new(Reply::Hold))).await;

    let retries = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&retries);
    engine.add_event_handler(move |event| {
        if let EngineEvent::NodeQueued {
            identifier,
            retry_index,
            ..
        } = event
        {
            if identifier == "flaky" {
                sink.lock().unwrap().push(retry_index);
            }
        }
    });

    let run = engine.run_plan(engine.new_setup("retry")).await.unwrap();
    let id = run.plan_execution_id.clone();
    assert_eq!(finish(run).await, Status::Succeeded);
    assert_eq!(*retries.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(sync.executions.load(Ordering::SeqCst), 4);

    let all = executions(&engine, &id).await;
    let attempts = by_identifier(&all, "flaky");
    assert_eq!(attempts.len(), 3);
    assert_eq!(
        attempts.iter().map(|a| a.status).collect::<Vec<_>>(),
        vec![Status::Failed, Status::Failed, Status::Succeeded]
    );

    let first = attempts[0];
    assert!(first.previous_id.is_none());
    for pair in attempts.windows(2) {
        assert_eq!(pair[1].previous_id.as_deref(), Some(pair[0].uuid.as_str()));
        assert_eq!(pair[0].next_id.as_deref(), Some(pair[1].uuid.as_str()));
        assert_eq!(pair[1].notify_id, first.notify_id);
        assert_eq!(pair[1].parent_id, first.parent_id);
    }
    assert_eq!(attempts[2].outcomes.get("attempt"), Some(&json!(2)));

    let next = only(&all, "next");
    assert_eq!(next.previous_id.as_deref(), Some(attempts[2].uuid.as_str()));
    assert_eq!(next.notify_id, first.notify_id);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_stage() {
    let sync = Arc::new(RecordingSyncStep::failing_first(10));
    let mut steps = registry();
    register_sync(&mut steps, Arc::clone(&sync));
    let plan = stage_plan(
        "exhausted",
        vec![
            step("flaky", SYNC_STEP).with_adviser(AdviserObtainment::Retry { max_retries: 1 }),
            step("never", SYNC_STEP),
        ],
    );
    let engine = engine_for(plan, steps, Arc::new(ScriptedTaskExecutor::new(Reply::Hold))).await;

    let run = engine.run_plan(engine.new_setup("exhausted")).await.unwrap();
    let id = run.plan_execution_id.clone();
    assert_eq!(finish(run).await, Status::Failed);

    let all = executions(&engine, &id).await;
    let attempts = by_identifier(&all, "flaky");
    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().all(|a| a.status == Status::Failed));
    assert!(by_identifier(&all, "never").is_empty());

    let stage = only(&all, "stage");
    assert_eq!(stage.status, Status::Failed);
    assert_eq!(stage.failure_info, attempts[1].failure_info);
}

#[tokio::test]
async fn test_ignored_failure_lets_the_plan_succeed() {
    let sync = Arc::new(RecordingSyncStep::default());
    let mut steps = registry();
    register_sync(&mut steps, Arc::clone(&sync));
    let plan = stage_plan(
        "ignored",
        vec![
            step("lint", SYNC_STEP)
                .with_parameters(json!({ "fail": true }))
                .with_adviser(AdviserObtainment::IgnoreFailure),
            step("build", SYNC_STEP),
        ],
    );
    let engine = engine_for(plan, steps, Arc::new(ScriptedTaskExecutor::new(Reply::Hold))).await;

    let run = engine.run_plan(engine.new_setup("ignored")).await.unwrap();
    let id = run.plan_execution_id.clone();
    assert_eq!(finish(run).await, Status::Succeeded);

    let all = executions(&engine, &id).await;
    let lint = only(&all, "lint");
    assert_eq!(lint.status, Status::IgnoreFailed);
    assert!(lint.failure_info.is_some());
    assert_eq!(only(&all, "build").status, Status::Succeeded);
    assert_eq!(only(&all, "stage").status, Status::Succeeded);
}

//! Cancellation and deadline propagation tests.

use std::time::{Duration, Instant};

use serde_json::json;

use maestro::task::{TaskSpec, TaskState};

use crate::fixtures::{
    accepting_controller, add_agent, add_fixed_agent, fast_config, template, HangingExecutor,
};

/// Scenario: cancel with partial results already accepted
/// Given a 4-subtask parallel task where two subtasks finish quickly and
/// two hang forever
/// When the task is cancelled after the two fast subtasks are accepted
/// Then the final status is Cancelled and the two accepted results are
/// retained in the report
#[tokio::test]
async fn test_cancel_retains_accepted_partial_results() {
    let mut config = fast_config();
    config.templates.push(template(
        "mixed-bag",
        "mixed",
        &[
            ("fast-1", "quick"),
            ("fast-2", "quick"),
            ("slow-1", "molasses"),
            ("slow-2", "molasses"),
        ],
        true,
    ));
    let controller = accepting_controller(config);

    add_fixed_agent(&controller, "sprinter", &["quick"], json!({"ok": true})).await;
    add_agent(
        &controller,
        "sloth",
        &["molasses"],
        4,
        HangingExecutor::new(&["molasses"]),
    )
    .await;

    let task_id = controller.submit(TaskSpec::new("process the mixed workload"));

    // Wait until both fast subtasks are accepted
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let report = controller.status(&task_id).unwrap();
        if report.completed_subtasks.len() == 2 {
            break;
        }
        assert!(Instant::now() < deadline, "fast subtasks never completed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    controller.cancel(&task_id).unwrap();
    let report = controller.wait(&task_id).await.unwrap();

    assert_eq!(report.state, TaskState::Cancelled);
    assert_eq!(report.partial_results.len(), 2);
    assert_eq!(report.completed_subtasks.len(), 2);
}

/// Cancellation propagates to every in-flight execution promptly: the
/// hanging executors observe the signal and release their agent slots.
#[tokio::test]
async fn test_cancel_propagates_to_in_flight_subtasks() {
    let mut config = fast_config();
    config.templates.push(template(
        "all-slow",
        "stall",
        &[("s1", "molasses"), ("s2", "molasses"), ("s3", "molasses")],
        true,
    ));
    let controller = accepting_controller(config);
    let agent_id = add_agent(
        &controller,
        "sloth",
        &["molasses"],
        4,
        HangingExecutor::new(&["molasses"]),
    )
    .await;

    let task_id = controller.submit(TaskSpec::new("stall on everything"));

    // Let all three subtasks get in flight
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let load = controller
            .registry()
            .profile(&agent_id)
            .map(|p| p.current_load)
            .unwrap_or(0);
        if load == 3 {
            break;
        }
        assert!(Instant::now() < deadline, "subtasks never got in flight");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let cancelled_at = Instant::now();
    controller.cancel(&task_id).unwrap();
    let report = controller.wait(&task_id).await.unwrap();

    assert_eq!(report.state, TaskState::Cancelled);
    assert!(
        cancelled_at.elapsed() < Duration::from_secs(2),
        "cancellation should settle promptly"
    );

    // Draining completes because every in-flight attempt observed the
    // cancel signal and released its slot
    controller.shutdown().await;
    assert_eq!(
        controller.registry().profile(&agent_id).unwrap().current_load,
        0
    );
}

/// A task deadline cancels the whole task.
#[tokio::test]
async fn test_deadline_cancels_whole_task() {
    let controller = accepting_controller(fast_config());
    add_agent(
        &controller,
        "sloth",
        &["design", "codegen", "testgen"],
        4,
        HangingExecutor::new(&["design", "codegen", "testgen"]),
    )
    .await;

    let task_id = controller.submit(
        TaskSpec::new("implement the stalled feature").with_deadline(Duration::from_millis(80)),
    );
    let report = controller.wait(&task_id).await.unwrap();

    assert_eq!(report.state, TaskState::Cancelled);
}

/// Cancelling before any dispatch still lands in Cancelled.
#[tokio::test]
async fn test_cancel_before_dispatch() {
    let controller = accepting_controller(fast_config());
    // No agents: the scheduler waits for candidates

    let task_id = controller.submit(TaskSpec::new("document the unstaffed project"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    controller.cancel(&task_id).unwrap();

    let report = controller.wait(&task_id).await.unwrap();
    assert_eq!(report.state, TaskState::Cancelled);
    assert!(report.partial_results.is_empty());
}

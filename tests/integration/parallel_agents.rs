//! Parallel execution correctness tests.
//!
//! These tests verify that independent subtasks run concurrently, that
//! per-attempt timeouts feed the retry policy, and that agent load never
//! exceeds its declared concurrency.

use std::time::Duration;

use serde_json::json;

use maestro::task::{Strategy, TaskSpec, TaskState};

use crate::fixtures::{
    accepting_controller, add_agent, add_fixed_agent, fast_config, template, SlowStartExecutor,
};

/// Scenario: parallel template with a timeout-then-succeed agent
/// Given a 2-step parallel template and two independent agents, where the
/// security agent stalls past the timeout on its first two calls
/// When the task runs
/// Then it completes and the flaky subtask records attempt_count = 3
#[tokio::test]
async fn test_timeout_retry_then_success() {
    let controller = accepting_controller(fast_config());

    // Stalls 1.5s against a 1s timeout, twice, then answers instantly
    let scanner = SlowStartExecutor::new(&["security"], 2, Duration::from_millis(1_500));
    add_agent(&controller, "scanner", &["security"], 2, scanner.clone()).await;
    add_fixed_agent(&controller, "linter", &["analysis"], json!({"lint": "clean"})).await;

    let task_id = controller.submit(TaskSpec::new("audit the payment code"));
    let report = controller.wait(&task_id).await.unwrap();

    assert_eq!(report.state, TaskState::Completed);
    assert_eq!(report.strategy, Some(Strategy::Parallel));
    assert_eq!(report.completed_subtasks.len(), 2);

    let security = report
        .completed_subtasks
        .iter()
        .find(|s| s.capability.as_str() == "security")
        .unwrap();
    assert_eq!(security.attempt_count, 3);
    assert_eq!(scanner.calls(), 3);

    let analysis = report
        .completed_subtasks
        .iter()
        .find(|s| s.capability.as_str() == "analysis")
        .unwrap();
    assert_eq!(analysis.attempt_count, 1);
}

/// Property: current_load never exceeds max_concurrency, observed while
/// many independent subtasks contend for one agent.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_agent_load_never_exceeds_max_concurrency() {
    let mut config = fast_config();
    config.templates.push(template(
        "bulk",
        "grind",
        &[
            ("g1", "grinding"),
            ("g2", "grinding"),
            ("g3", "grinding"),
            ("g4", "grinding"),
            ("g5", "grinding"),
            ("g6", "grinding"),
            ("g7", "grinding"),
            ("g8", "grinding"),
        ],
        true,
    ));
    let controller = accepting_controller(config);

    let worker = SlowStartExecutor::new(&["grinding"], 0, Duration::ZERO);
    let agent_id = add_agent(&controller, "grinder", &["grinding"], 3, worker).await;

    // Sample the agent's load while the task runs
    let registry = std::sync::Arc::clone(controller.registry());
    let monitor = tokio::spawn(async move {
        let mut max_seen = 0;
        for _ in 0..500 {
            if let Some(profile) = registry.profile(&agent_id) {
                assert!(
                    profile.current_load <= profile.max_concurrency,
                    "load {} exceeded max {}",
                    profile.current_load,
                    profile.max_concurrency
                );
                max_seen = max_seen.max(profile.current_load);
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        max_seen
    });

    let task_id = controller.submit(TaskSpec::new("grind through the backlog"));
    let report = controller.wait(&task_id).await.unwrap();
    let max_seen = monitor.await.unwrap();

    assert_eq!(report.state, TaskState::Completed);
    assert_eq!(report.completed_subtasks.len(), 8);
    assert!(max_seen <= 3);
}

/// A single agent with concurrency 1 still completes a parallel template;
/// the subtasks serialize on the load slot.
#[tokio::test]
async fn test_parallel_template_with_single_slot_agent() {
    let controller = accepting_controller(fast_config());
    add_agent(
        &controller,
        "lone-wolf",
        &["security", "analysis"],
        1,
        SlowStartExecutor::new(&["security", "analysis"], 0, Duration::ZERO),
    )
    .await;

    let task_id = controller.submit(TaskSpec::new("audit the billing code"));
    let report = controller.wait(&task_id).await.unwrap();

    assert_eq!(report.state, TaskState::Completed);
    assert_eq!(report.completed_subtasks.len(), 2);
}

/// NoCandidateAgent is transient: a task submitted before any agent
/// exists completes once an agent registers.
#[tokio::test]
async fn test_late_agent_registration_unblocks_task() {
    let controller = accepting_controller(fast_config());

    let task_id = controller.submit(TaskSpec::new("document the migration steps"));

    // Give the scheduler time to find nothing
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(!controller.status(&task_id).unwrap().state.is_terminal());

    add_fixed_agent(&controller, "late-writer", &["docgen"], json!({"doc": "ok"})).await;
    let report = controller.wait(&task_id).await.unwrap();

    assert_eq!(report.state, TaskState::Completed);
}

/// Failed subtasks transitively block dependents, and the report names
/// both the failure and the blockage.
#[tokio::test]
async fn test_failure_blocks_dependents_in_report() {
    let mut config = fast_config();
    config.templates.push(template(
        "doomed-chain",
        "doomed",
        &[("first", "flaky-step"), ("second", "docgen")],
        false,
    ));
    // Quality scoring: the saboteur's payload never reaches the threshold,
    // so its subtask exhausts all attempts and fails
    let strict = crate::fixtures::controller_with_scorer(
        config,
        std::sync::Arc::new(crate::fixtures::QualityScorer),
    );
    add_agent(
        &strict,
        "saboteur",
        &["flaky-step"],
        2,
        crate::fixtures::FixedPayloadExecutor::new(&["flaky-step"], json!({"quality": 0.0})),
    )
    .await;
    add_fixed_agent(&strict, "writer", &["docgen"], json!({"quality": 1.0})).await;

    let task_id = strict.submit(TaskSpec::new("run the doomed chain"));
    let report = strict.wait(&task_id).await.unwrap();

    assert_eq!(report.state, TaskState::Failed);
    assert_eq!(report.failed_subtasks.len(), 2, "failed + blocked");
    assert!(report.failure.is_some());

    let blocked = report
        .failed_subtasks
        .iter()
        .find(|s| s.name == "second")
        .unwrap();
    assert!(matches!(
        blocked.status,
        maestro::core::subtask::SubtaskStatus::Blocked { .. }
    ));
}

//! Full pipeline execution tests across the three decomposition
//! strategies.

use serde_json::json;

use maestro::core::subtask::SubtaskStatus;
use maestro::task::{Strategy, TaskSpec, TaskState};

use crate::fixtures::{
    accepting_controller, add_fixed_agent, fast_config, PlanningExecutor,
};

/// Scenario: 3-step sequential template
/// Given a description matching the implement-feature template and a
/// single agent holding all three capabilities
/// When the task runs
/// Then it completes with three accepted decisions in dependency order
#[tokio::test]
async fn test_sequential_template_completes_in_order() {
    let controller = accepting_controller(fast_config());
    add_fixed_agent(
        &controller,
        "all-rounder",
        &["design", "codegen", "testgen"],
        json!({"ok": true}),
    )
    .await;

    let task_id = controller.submit(TaskSpec::new("implement the login feature"));
    let report = controller.wait(&task_id).await.unwrap();

    assert_eq!(report.state, TaskState::Completed);
    assert_eq!(report.strategy, Some(Strategy::Sequential));
    assert_eq!(report.completed_subtasks.len(), 3);
    assert_eq!(report.partial_results.len(), 3);

    // Acceptance order follows the chain
    let names: Vec<&str> = report
        .partial_results
        .iter()
        .map(|r| {
            report
                .completed_subtasks
                .iter()
                .find(|s| s.subtask_id == r.subtask_id)
                .map(|s| s.name.as_str())
                .unwrap()
        })
        .collect();
    assert_eq!(names, vec!["design", "generate-code", "generate-tests"]);
}

/// Scenario: hierarchical fallback with a second decomposition pass
/// Given no template matches and an analyst whose accepted output lists
/// two further subtasks
/// When the task runs
/// Then three subtasks execute across the two passes
#[tokio::test]
async fn test_hierarchical_two_pass_decomposition() {
    let controller = accepting_controller(fast_config());
    crate::fixtures::add_agent(
        &controller,
        "analyst",
        &["analyze"],
        2,
        PlanningExecutor::new(json!([
            {"name": "first-half", "capability": "codegen"},
            {"name": "second-half", "capability": "docgen"},
        ])),
    )
    .await;
    add_fixed_agent(&controller, "worker", &["codegen", "docgen"], json!({"ok": true})).await;

    let task_id = controller.submit(TaskSpec::new("untangle the frobnicator"));
    let report = controller.wait(&task_id).await.unwrap();

    assert_eq!(report.state, TaskState::Completed);
    assert_eq!(report.strategy, Some(Strategy::Hierarchical));
    assert_eq!(report.completed_subtasks.len(), 3);

    let names: Vec<&str> = report
        .completed_subtasks
        .iter()
        .map(|s| s.name.as_str())
        .collect();
    assert!(names.contains(&"analyze"));
    assert!(names.contains(&"first-half"));
    assert!(names.contains(&"second-half"));
}

/// Property: Completed implies every subtask has exactly one accepted
/// decision, with nothing left pending or failed.
#[tokio::test]
async fn test_completed_implies_all_subtasks_accepted() {
    let controller = accepting_controller(fast_config());
    add_fixed_agent(
        &controller,
        "all-rounder",
        &["design", "codegen", "testgen"],
        json!({"ok": true}),
    )
    .await;

    let task_id = controller.submit(TaskSpec::new("implement the audit trail feature"));
    let report = controller.wait(&task_id).await.unwrap();

    assert_eq!(report.state, TaskState::Completed);
    assert!(report.pending_subtasks.is_empty());
    assert!(report.failed_subtasks.is_empty());
    assert!(report
        .completed_subtasks
        .iter()
        .all(|s| s.status == SubtaskStatus::Accepted));
    // Exactly one accepted result per subtask
    assert_eq!(report.partial_results.len(), report.completed_subtasks.len());
    for subtask in &report.completed_subtasks {
        let matching = report
            .partial_results
            .iter()
            .filter(|r| r.subtask_id == subtask.subtask_id)
            .count();
        assert_eq!(matching, 1);
    }
}

/// Property: decomposition is deterministic for a fixed description.
#[tokio::test]
async fn test_decomposition_shape_is_deterministic() {
    let controller = accepting_controller(fast_config());
    add_fixed_agent(
        &controller,
        "all-rounder",
        &["design", "codegen", "testgen"],
        json!({"ok": true}),
    )
    .await;

    let first = controller.submit(TaskSpec::new("implement the export feature"));
    let second = controller.submit(TaskSpec::new("implement the export feature"));

    let report_a = controller.wait(&first).await.unwrap();
    let report_b = controller.wait(&second).await.unwrap();

    assert_eq!(report_a.strategy, report_b.strategy);
    assert_eq!(
        report_a.completed_subtasks.len(),
        report_b.completed_subtasks.len()
    );
    let names = |r: &maestro::TaskStatusReport| {
        let mut names: Vec<String> = r
            .completed_subtasks
            .iter()
            .map(|s| s.name.clone())
            .collect();
        names.sort();
        names
    };
    assert_eq!(names(&report_a), names(&report_b));
}

/// Subtask attempt counts stay within the configured limit on the happy
/// path as well.
#[tokio::test]
async fn test_attempt_counts_on_happy_path() {
    let controller = accepting_controller(fast_config());
    add_fixed_agent(&controller, "writer", &["docgen"], json!({"doc": "done"})).await;

    let task_id = controller.submit(TaskSpec::new("document the deploy process"));
    let report = controller.wait(&task_id).await.unwrap();

    assert_eq!(report.state, TaskState::Completed);
    for subtask in &report.completed_subtasks {
        assert_eq!(subtask.attempt_count, 1);
    }
}

//! Competitive coordination and consensus rejection tests.

use std::sync::Arc;

use serde_json::json;

use maestro::config::{StepDef, TemplateDef};
use maestro::task::{TaskSpec, TaskState};

use crate::fixtures::{
    add_fixed_agent, controller_with_scorer, fast_config, QualityScorer,
};

fn competitive_template(keyword: &str, capability: &str) -> TemplateDef {
    TemplateDef {
        name: "competitive-step".to_string(),
        keywords: vec![keyword.to_string()],
        steps: vec![StepDef {
            name: "contest".to_string(),
            capability: capability.to_string(),
            competitive: true,
        }],
        parallel: false,
    }
}

/// Scenario: competitive mode with every candidate below threshold
/// Given two agents both producing candidates scoring 0.5
/// When the subtask exhausts its three attempts
/// Then the subtask and the task fail, and the report names the
/// consensus rejection
#[tokio::test]
async fn test_competitive_all_below_threshold_fails() {
    let mut config = fast_config();
    config.templates.push(competitive_template("shootout", "draft"));
    let controller = controller_with_scorer(config, Arc::new(QualityScorer));

    add_fixed_agent(&controller, "mediocre-a", &["draft"], json!({"quality": 0.5})).await;
    add_fixed_agent(&controller, "mediocre-b", &["draft"], json!({"quality": 0.5})).await;

    let task_id = controller.submit(TaskSpec::new("run the shootout"));
    let report = controller.wait(&task_id).await.unwrap();

    assert_eq!(report.state, TaskState::Failed);
    assert!(
        report.failure.as_deref().unwrap().contains("Consensus rejected"),
        "failure should name the consensus rejection: {:?}",
        report.failure
    );
    assert_eq!(report.failed_subtasks.len(), 1);
    assert_eq!(report.failed_subtasks[0].attempt_count, 3);
    assert!(report.partial_results.is_empty());
}

/// Competitive mode picks the highest-scoring candidate.
#[tokio::test]
async fn test_competitive_winner_take_all() {
    let mut config = fast_config();
    config.templates.push(competitive_template("bake-off", "draft"));
    let controller = controller_with_scorer(config, Arc::new(QualityScorer));

    add_fixed_agent(&controller, "good", &["draft"], json!({"quality": 0.9})).await;
    add_fixed_agent(&controller, "better", &["draft"], json!({"quality": 0.95})).await;

    let task_id = controller.submit(TaskSpec::new("run the bake-off"));
    let report = controller.wait(&task_id).await.unwrap();

    assert_eq!(report.state, TaskState::Completed);
    assert_eq!(report.partial_results.len(), 1);

    let winner = &report.partial_results[0];
    assert!((winner.aggregate_score - 0.95).abs() < 1e-9);
    assert_eq!(winner.payload["quality"], 0.95);
}

/// Competitive mode still completes when only one candidate clears the
/// threshold.
#[tokio::test]
async fn test_competitive_single_acceptable_candidate() {
    let mut config = fast_config();
    config.templates.push(competitive_template("contest", "draft"));
    let controller = controller_with_scorer(config, Arc::new(QualityScorer));

    add_fixed_agent(&controller, "laggard", &["draft"], json!({"quality": 0.2})).await;
    add_fixed_agent(&controller, "champion", &["draft"], json!({"quality": 1.0})).await;

    let task_id = controller.submit(TaskSpec::new("run the contest"));
    let report = controller.wait(&task_id).await.unwrap();

    assert_eq!(report.state, TaskState::Completed);
    assert_eq!(report.partial_results[0].payload["quality"], 1.0);
}

/// Solo mode remains the default: a single accepted candidate completes a
/// non-competitive subtask without extra attempts.
#[tokio::test]
async fn test_solo_mode_is_default() {
    let controller = controller_with_scorer(fast_config(), Arc::new(QualityScorer));
    add_fixed_agent(&controller, "writer", &["docgen"], json!({"quality": 1.0})).await;

    let task_id = controller.submit(TaskSpec::new("document the consensus engine"));
    let report = controller.wait(&task_id).await.unwrap();

    assert_eq!(report.state, TaskState::Completed);
    assert_eq!(report.completed_subtasks[0].attempt_count, 1);
}

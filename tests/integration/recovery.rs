//! Snapshot persistence and resume tests.
//!
//! The durability contract: after a restart, an in-flight task can be
//! reconstructed to its last committed state, which is the DAG topology
//! plus every accepted consensus decision. Mid-flight executions are
//! re-dispatched; accepted work is never repeated.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tempfile::TempDir;

use maestro::core::subtask::SubtaskStatus;
use maestro::orchestration::OrchestrationController;
use maestro::plugin::ValidationScorer;
use maestro::state::SnapshotStore;
use maestro::task::{TaskSpec, TaskState};

use crate::fixtures::{add_agent, add_fixed_agent, fast_config, template, FixedScorer, HangingExecutor};

fn controller_with_store(dir: &TempDir) -> Arc<OrchestrationController> {
    let scorer: Arc<dyn ValidationScorer> = Arc::new(FixedScorer(1.0));
    let mut config = fast_config();
    config.templates.push(template(
        "two-step",
        "handover",
        &[("first", "quick"), ("second", "molasses")],
        false,
    ));
    let (mut controller, _events) = OrchestrationController::new(config, vec![scorer]);
    controller.set_store(SnapshotStore::new(dir.path()).unwrap());
    Arc::new(controller)
}

/// The committed snapshot mid-run carries the accepted decision, the DAG
/// topology, and reverts the in-flight subtask to Pending on restore.
#[tokio::test]
async fn test_snapshot_captures_last_committed_state() {
    let dir = TempDir::new().unwrap();
    let controller = controller_with_store(&dir);

    add_fixed_agent(&controller, "sprinter", &["quick"], json!({"ok": true})).await;
    add_agent(
        &controller,
        "sloth",
        &["molasses"],
        2,
        HangingExecutor::new(&["molasses"]),
    )
    .await;

    let task_id = controller.submit(TaskSpec::new("handover the baton"));

    // Wait for the first subtask to be accepted and committed
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if controller.status(&task_id).unwrap().completed_subtasks.len() == 1 {
            break;
        }
        assert!(Instant::now() < deadline, "first subtask never completed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // Let the acceptance listener commit
    tokio::time::sleep(Duration::from_millis(50)).await;

    let store = SnapshotStore::new(dir.path()).unwrap();
    let snapshot = store.load(&task_id).unwrap().unwrap();

    assert_eq!(snapshot.task.id, task_id);
    assert!(!snapshot.task.state.is_terminal());
    assert_eq!(snapshot.subtasks.len(), 2);
    assert_eq!(snapshot.edges.len(), 1);
    assert_eq!(snapshot.decisions.len(), 1);
    assert_eq!(snapshot.accepted.len(), 1);

    let restored = snapshot.restore_dag().unwrap();
    let statuses: Vec<SubtaskStatus> = restored
        .snapshots()
        .into_iter()
        .map(|s| s.status)
        .collect();
    assert!(statuses.contains(&SubtaskStatus::Accepted));
    assert!(statuses.contains(&SubtaskStatus::Pending), "in-flight reverts");

    controller.cancel(&task_id).unwrap();
    let _ = controller.wait(&task_id).await.unwrap();
}

/// Full restart: resume a snapshot on a fresh controller and finish the
/// remaining work without repeating the accepted subtask.
#[tokio::test]
async fn test_resume_finishes_remaining_subtasks() {
    let dir = TempDir::new().unwrap();

    // First life: accept the first subtask, stall on the second
    let first_life = controller_with_store(&dir);
    add_fixed_agent(&first_life, "sprinter", &["quick"], json!({"ok": true})).await;
    add_agent(
        &first_life,
        "sloth",
        &["molasses"],
        2,
        HangingExecutor::new(&["molasses"]),
    )
    .await;

    let task_id = first_life.submit(TaskSpec::new("handover the baton"));
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if first_life.status(&task_id).unwrap().completed_subtasks.len() == 1 {
            break;
        }
        assert!(Instant::now() < deadline, "first subtask never completed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Capture the committed state, then tear the first life down
    let snapshot = SnapshotStore::new(dir.path())
        .unwrap()
        .load(&task_id)
        .unwrap()
        .unwrap();
    first_life.cancel(&task_id).unwrap();
    let _ = first_life.wait(&task_id).await.unwrap();
    drop(first_life);

    // Second life: the formerly-hanging capability now works
    let second_life = controller_with_store(&dir);
    add_fixed_agent(&second_life, "sprinter", &["quick"], json!({"ok": true})).await;
    add_fixed_agent(&second_life, "recovered", &["molasses"], json!({"ok": true})).await;

    let resumed_id = second_life.resume(snapshot).unwrap();
    assert_eq!(resumed_id, task_id, "resume keeps the task id");

    let report = second_life.wait(&resumed_id).await.unwrap();

    assert_eq!(report.state, TaskState::Completed);
    assert_eq!(report.completed_subtasks.len(), 2);
    // One result restored from the snapshot, one produced after resume
    assert_eq!(report.partial_results.len(), 2);

    // The restored subtask was not re-executed: its attempt count is the
    // committed one
    let first = report
        .completed_subtasks
        .iter()
        .find(|s| s.name == "first")
        .unwrap();
    assert_eq!(first.attempt_count, 1);
}

/// Resuming a terminal snapshot is rejected.
#[tokio::test]
async fn test_resume_rejects_terminal_snapshot() {
    let dir = TempDir::new().unwrap();
    let controller = controller_with_store(&dir);
    add_fixed_agent(&controller, "writer", &["docgen"], json!({"ok": true})).await;

    let task_id = controller.submit(TaskSpec::new("document the recovery path"));
    let report = controller.wait(&task_id).await.unwrap();
    assert_eq!(report.state, TaskState::Completed);

    let snapshot = SnapshotStore::new(dir.path())
        .unwrap()
        .load(&task_id)
        .unwrap()
        .unwrap();
    assert!(controller.resume(snapshot).is_err());
}

/// Snapshots survive the full lifecycle: the final commit records the
/// terminal state for audit.
#[tokio::test]
async fn test_final_snapshot_records_terminal_state() {
    let dir = TempDir::new().unwrap();
    let controller = controller_with_store(&dir);
    add_fixed_agent(&controller, "writer", &["docgen"], json!({"ok": true})).await;

    let task_id = controller.submit(TaskSpec::new("document the audit trail"));
    let report = controller.wait(&task_id).await.unwrap();
    assert_eq!(report.state, TaskState::Completed);
    // The final commit happens as the driver exits
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snapshot = SnapshotStore::new(dir.path())
        .unwrap()
        .load(&task_id)
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.task.state, TaskState::Completed);
    assert_eq!(snapshot.accepted.len(), 1);
}

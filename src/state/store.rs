//! JSON snapshot persistence for crash recovery.
//!
//! After every accepted consensus decision the controller commits a
//! `TaskSnapshot` to disk. A snapshot is the task's last committed state:
//! the task record, every subtask, the DAG topology, and the decisions and
//! results accepted so far. Restoring reverts any mid-flight execution to
//! Pending; accepted work is never repeated.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::core::dag::{DependencyKind, SubtaskDag};
use crate::core::subtask::{Subtask, SubtaskId, SubtaskStatus};
use crate::mlog_debug;
use crate::orchestration::consensus::{AcceptedResult, ConsensusDecision};
use crate::task::{Task, TaskId};
use crate::Result;

/// Point-in-time capture of one task's committed state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// The task record.
    pub task: Task,
    /// Every subtask's state at capture time.
    pub subtasks: Vec<Subtask>,
    /// DAG topology as (dependency, dependent, kind) edges.
    pub edges: Vec<(SubtaskId, SubtaskId, DependencyKind)>,
    /// Consensus decisions accepted so far.
    pub decisions: Vec<ConsensusDecision>,
    /// Accepted results so far.
    pub accepted: Vec<AcceptedResult>,
    /// When the snapshot was captured.
    pub captured_at: DateTime<Utc>,
}

impl TaskSnapshot {
    /// Capture a snapshot from live state.
    pub fn capture(
        task: &Task,
        dag: &SubtaskDag,
        decisions: &[ConsensusDecision],
        accepted: &[AcceptedResult],
    ) -> Self {
        Self {
            task: task.clone(),
            subtasks: dag.snapshots(),
            edges: dag.edges(),
            decisions: decisions.to_vec(),
            accepted: accepted.to_vec(),
            captured_at: Utc::now(),
        }
    }

    /// Ids of subtasks with an accepted decision at capture time.
    pub fn accepted_ids(&self) -> HashSet<SubtaskId> {
        self.subtasks
            .iter()
            .filter(|s| s.is_accepted())
            .map(|s| s.id)
            .collect()
    }

    /// Rebuild the subtask DAG from this snapshot.
    ///
    /// Subtasks that were mid-flight at capture time revert to Pending;
    /// accepted, failed, and blocked statuses are preserved as committed.
    ///
    /// # Errors
    /// Returns an error if the persisted edges no longer form a DAG.
    pub fn restore_dag(&self) -> Result<SubtaskDag> {
        let mut dag = SubtaskDag::new();
        for subtask in &self.subtasks {
            let mut restored = subtask.clone();
            if restored.status == SubtaskStatus::Running {
                restored.status = SubtaskStatus::Pending;
                restored.assigned_agent = None;
            }
            dag.add_subtask(restored);
        }
        for (from, to, kind) in &self.edges {
            dag.add_dependency(from, to, *kind)?;
        }
        Ok(dag)
    }
}

/// Directory-backed snapshot store, one JSON file per task.
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Open a store rooted at the given directory, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(Self { dir })
    }

    /// Open the store at the configured (or default) state directory.
    pub fn open(config: &EngineConfig) -> Result<Self> {
        Self::new(config.state_dir()?)
    }

    /// The file path for a task's snapshot.
    pub fn path_for(&self, task_id: &TaskId) -> PathBuf {
        self.dir.join(format!("{}.json", task_id))
    }

    /// Commit a snapshot, replacing any previous one atomically.
    pub fn commit(&self, snapshot: &TaskSnapshot) -> Result<()> {
        let path = self.path_for(&snapshot.task.id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(snapshot)?)?;
        fs::rename(&tmp, &path)?;
        mlog_debug!(
            "store: committed snapshot for task {} ({} subtasks, {} accepted)",
            snapshot.task.id.short(),
            snapshot.subtasks.len(),
            snapshot.accepted.len()
        );
        Ok(())
    }

    /// Load a task's snapshot, if one exists.
    pub fn load(&self, task_id: &TaskId) -> Result<Option<TaskSnapshot>> {
        let path = self.path_for(task_id);
        if !path.exists() {
            return Ok(None);
        }
        let snapshot: TaskSnapshot = serde_json::from_str(&fs::read_to_string(&path)?)?;
        Ok(Some(snapshot))
    }

    /// Remove a task's snapshot, if one exists.
    pub fn remove(&self, task_id: &TaskId) -> Result<()> {
        let path = self.path_for(task_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// List every task id with a stored snapshot.
    pub fn list(&self) -> Result<Vec<TaskId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".json") {
                if let Ok(id) = stem.parse::<TaskId>() {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }
}

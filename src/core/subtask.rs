//! Subtask data model for the execution DAG.
//!
//! Subtasks are the atomic units of work assigned to agents. Each subtask
//! tracks its required capability, input payload, status, assignment, and
//! attempt count.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::{AgentId, Capability};
use crate::task::TaskId;

/// Unique identifier for a subtask within a task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubtaskId(pub Uuid);

impl SubtaskId {
    /// Create a new unique subtask identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for SubtaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubtaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SubtaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// How many agents attempt this subtask per round.
///
/// Solo is the default; Competitive runs the same subtask on several
/// agents at once and lets consensus arbitrate among the candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum CoordinationMode {
    /// One agent produces one candidate result per attempt.
    #[default]
    Solo,
    /// Several agents attempt the subtask concurrently for higher confidence.
    Competitive {
        /// Upper bound on concurrent candidate agents per round.
        width: usize,
    },
}

impl std::fmt::Display for CoordinationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoordinationMode::Solo => write!(f, "solo"),
            CoordinationMode::Competitive { width } => write!(f, "competitive({})", width),
        }
    }
}

/// Subtask status in its lifecycle.
///
/// Subtasks progress through these states as they are scheduled,
/// executed, and arbitrated by consensus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum SubtaskStatus {
    /// Subtask created but not yet dispatched.
    #[default]
    Pending,
    /// Subtask is being executed by one or more agents.
    Running,
    /// Consensus accepted a candidate result.
    Accepted,
    /// All attempts exhausted without an accepted result.
    Failed {
        /// Reason describing the failure.
        reason: String,
    },
    /// A transitive dependency failed; this subtask will never run.
    Blocked {
        /// Reason why the subtask is blocked.
        reason: String,
    },
}

impl SubtaskStatus {
    /// Check if this status is terminal (Accepted, Failed, or Blocked).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubtaskStatus::Accepted | SubtaskStatus::Failed { .. } | SubtaskStatus::Blocked { .. }
        )
    }
}

impl std::fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubtaskStatus::Pending => write!(f, "pending"),
            SubtaskStatus::Running => write!(f, "running"),
            SubtaskStatus::Accepted => write!(f, "accepted"),
            SubtaskStatus::Failed { reason } => write!(f, "failed: {}", reason),
            SubtaskStatus::Blocked { reason } => write!(f, "blocked: {}", reason),
        }
    }
}

/// A single subtask in the execution DAG.
///
/// Created by the decomposer; status is written by the scheduler,
/// assignment and attempt count by the supervisor. Destroyed with its
/// parent task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    /// Unique identifier for this subtask.
    pub id: SubtaskId,
    /// The task this subtask belongs to (non-owning back-reference).
    pub task_id: TaskId,
    /// Human-readable name for the subtask.
    pub name: String,
    /// The capability an agent must declare to run this subtask.
    pub required_capability: Capability,
    /// Input payload handed to the capability executor.
    pub input_payload: serde_json::Value,
    /// Subtasks that must be accepted before this one can start.
    pub depends_on: HashSet<SubtaskId>,
    /// Current execution status.
    pub status: SubtaskStatus,
    /// Number of execution attempts made so far.
    pub attempt_count: u32,
    /// Agent assigned for the most recent attempt.
    pub assigned_agent: Option<AgentId>,
    /// Solo or competitive execution.
    pub coordination: CoordinationMode,
    /// When the subtask was created.
    pub created_at: DateTime<Utc>,
    /// When the first attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the subtask reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Subtask {
    /// Create a new pending subtask with no dependencies.
    pub fn new(
        task_id: TaskId,
        name: &str,
        required_capability: Capability,
        input_payload: serde_json::Value,
    ) -> Self {
        Self {
            id: SubtaskId::new(),
            task_id,
            name: name.to_string(),
            required_capability,
            input_payload,
            depends_on: HashSet::new(),
            status: SubtaskStatus::Pending,
            attempt_count: 0,
            assigned_agent: None,
            coordination: CoordinationMode::Solo,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Add a dependency on another subtask.
    pub fn with_dependency(mut self, dep: SubtaskId) -> Self {
        self.depends_on.insert(dep);
        self
    }

    /// Set the coordination mode.
    pub fn with_coordination(mut self, mode: CoordinationMode) -> Self {
        self.coordination = mode;
        self
    }

    /// Mark the subtask as running.
    ///
    /// Records the start time on the first call only.
    pub fn start(&mut self) {
        self.status = SubtaskStatus::Running;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    /// Mark the subtask as accepted by consensus.
    pub fn accept(&mut self) {
        self.status = SubtaskStatus::Accepted;
        self.completed_at = Some(Utc::now());
    }

    /// Mark the subtask as failed with a reason.
    pub fn fail(&mut self, reason: &str) {
        self.status = SubtaskStatus::Failed {
            reason: reason.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    /// Mark the subtask as blocked with a reason.
    pub fn block(&mut self, reason: &str) {
        self.status = SubtaskStatus::Blocked {
            reason: reason.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }

    /// Record one more execution attempt.
    ///
    /// Returns the new attempt count.
    pub fn record_attempt(&mut self, agent_id: AgentId) -> u32 {
        self.attempt_count += 1;
        self.assigned_agent = Some(agent_id);
        self.attempt_count
    }

    /// Check if the subtask is in a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if consensus accepted this subtask.
    pub fn is_accepted(&self) -> bool {
        self.status == SubtaskStatus::Accepted
    }
}

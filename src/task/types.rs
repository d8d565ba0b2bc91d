//! Core task type definitions.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a submitted task.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new unique task identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Relative priority of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Normal => write!(f, "normal"),
            TaskPriority::High => write!(f, "high"),
        }
    }
}

/// Decomposition strategy for splitting a task into subtasks.
///
/// Sequential and Parallel are template-driven; Hierarchical is the
/// generic fallback that runs an analysis pass first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Ordered capability list: subtask i depends on subtask i-1.
    Sequential,
    /// Independent steps with no inter-subtask dependencies.
    Parallel,
    /// Analyze first, then decompose from the accepted analysis output.
    Hierarchical,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Sequential => write!(f, "sequential"),
            Strategy::Parallel => write!(f, "parallel"),
            Strategy::Hierarchical => write!(f, "hierarchical"),
        }
    }
}

/// Lifecycle state of a task.
///
/// `Completed`, `Failed`, and `Cancelled` are terminal: a finished task
/// is never re-entered, re-processing requires a new submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Task received, not yet decomposed.
    #[default]
    Submitted,
    /// Decomposer is producing the subtask DAG.
    Decomposing,
    /// Scheduler is looking for the first assignment.
    Dispatching,
    /// At least one subtask has been assigned and is running.
    Executing,
    /// Every subtask has an accepted consensus decision.
    Completed,
    /// A subtask failed with no remaining path to completion.
    Failed,
    /// Cancellation was requested or the deadline expired.
    Cancelled,
}

impl TaskState {
    /// Check whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Submitted => write!(f, "submitted"),
            TaskState::Decomposing => write!(f, "decomposing"),
            TaskState::Dispatching => write!(f, "dispatching"),
            TaskState::Executing => write!(f, "executing"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Failed => write!(f, "failed"),
            TaskState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Caller-supplied description of a task to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Free-text description; templates are matched against this.
    pub description: String,
    /// Key/value context passed through to validators and executors.
    #[serde(default)]
    pub context: HashMap<String, String>,
    /// Relative priority.
    #[serde(default)]
    pub priority: TaskPriority,
    /// Optional decomposition strategy override.
    #[serde(default)]
    pub strategy_hint: Option<Strategy>,
    /// Optional wall-clock budget measured from submission.
    #[serde(default)]
    pub deadline: Option<Duration>,
}

impl TaskSpec {
    /// Create a spec with defaults for everything but the description.
    pub fn new(description: &str) -> Self {
        Self {
            description: description.to_string(),
            context: HashMap::new(),
            priority: TaskPriority::default(),
            strategy_hint: None,
            deadline: None,
        }
    }

    /// Add a context entry.
    pub fn with_context(mut self, key: &str, value: &str) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Force a decomposition strategy.
    pub fn with_strategy_hint(mut self, strategy: Strategy) -> Self {
        self.strategy_hint = Some(strategy);
        self
    }

    /// Set a deadline measured from submission.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A submitted task.
///
/// Owned by the controller for its lifetime. Immutable after decomposition
/// except for `state` and `failure`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: TaskId,
    /// Free-text description the decomposer matched against.
    pub description: String,
    /// Key/value context passed through to validators and executors.
    pub context: HashMap<String, String>,
    /// Relative priority.
    pub priority: TaskPriority,
    /// Optional decomposition strategy override.
    pub strategy_hint: Option<Strategy>,
    /// Current lifecycle state.
    pub state: TaskState,
    /// When the task was submitted.
    pub created_at: DateTime<Utc>,
    /// Optional wall-clock budget measured from submission.
    pub deadline: Option<Duration>,
    /// Failure reason once the task reaches `Failed`.
    pub failure: Option<String>,
}

impl Task {
    /// Create a task from a caller spec with a fresh id.
    pub fn new(spec: TaskSpec) -> Self {
        Self {
            id: TaskId::new(),
            description: spec.description,
            context: spec.context,
            priority: spec.priority,
            strategy_hint: spec.strategy_hint,
            state: TaskState::Submitted,
            created_at: Utc::now(),
            deadline: spec.deadline,
            failure: None,
        }
    }
}

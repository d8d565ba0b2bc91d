//! Task state management with transition validation.
//!
//! This module provides `TaskLifecycle` which wraps a task's state and
//! enforces valid transitions through the orchestration pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::TaskState;

/// A record of a state transition with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    /// The state that was entered.
    pub state: TaskState,
    /// When this state was entered.
    pub entered_at: DateTime<Utc>,
}

/// Manages task state and enforces valid transitions.
///
/// The lifecycle moves forward through the pipeline:
///
/// Submitted -> Decomposing -> Dispatching -> Executing -> Completed
///
/// with `Failed` reachable from Decomposing (undecomposable task) and
/// Executing (subtask failure), and `Cancelled` reachable from every
/// non-terminal state. Terminal states are immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLifecycle {
    /// The current state.
    state: TaskState,
    /// History of all states visited, in order.
    history: Vec<StateHistoryEntry>,
}

impl TaskLifecycle {
    /// Create a lifecycle starting at `Submitted`.
    ///
    /// The initial state is recorded as the first history entry.
    pub fn new() -> Self {
        Self {
            state: TaskState::Submitted,
            history: vec![StateHistoryEntry {
                state: TaskState::Submitted,
                entered_at: Utc::now(),
            }],
        }
    }

    /// Check if a transition to the target state is valid from the current state.
    ///
    /// Valid transitions:
    /// - Submitted -> Decomposing
    /// - Decomposing -> Dispatching OR Failed
    /// - Dispatching -> Executing
    /// - Executing -> Completed OR Failed
    /// - any non-terminal state -> Cancelled
    pub fn can_transition(&self, target: TaskState) -> bool {
        let current = self.state;
        if current.is_terminal() {
            return false;
        }
        if target == TaskState::Cancelled {
            return true;
        }
        matches!(
            (current, target),
            (TaskState::Submitted, TaskState::Decomposing)
                | (TaskState::Decomposing, TaskState::Dispatching)
                | (TaskState::Decomposing, TaskState::Failed)
                | (TaskState::Dispatching, TaskState::Executing)
                | (TaskState::Executing, TaskState::Completed)
                | (TaskState::Executing, TaskState::Failed)
        )
    }

    /// Attempt to transition to a new state.
    ///
    /// Returns an error if the transition is not valid according to
    /// the pipeline ordering rules.
    pub fn transition(&mut self, target: TaskState) -> Result<()> {
        if !self.can_transition(target) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
            });
        }

        self.state = target;
        self.history.push(StateHistoryEntry {
            state: target,
            entered_at: Utc::now(),
        });

        Ok(())
    }

    /// Get the current state.
    pub fn current(&self) -> TaskState {
        self.state
    }

    /// Check whether the lifecycle has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Get the history of all states visited, in order.
    pub fn history(&self) -> &[StateHistoryEntry] {
        &self.history
    }
}

impl Default for TaskLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

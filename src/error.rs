use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Undecomposable task: {0}")]
    UndecomposableTask(String),

    #[error("No candidate agent for capability: {capability}")]
    NoCandidateAgent {
        capability: crate::agent::Capability,
    },

    #[error("Execution timed out after {0:?}")]
    ExecutionTimeout(Duration),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Consensus rejected all candidates for subtask {subtask_id}")]
    ConsensusRejected {
        subtask_id: crate::core::subtask::SubtaskId,
    },

    #[error("Dependency {dependency} failed, blocking subtask {subtask_id}")]
    DependencyFailed {
        subtask_id: crate::core::subtask::SubtaskId,
        dependency: crate::core::subtask::SubtaskId,
    },

    #[error("Task cancelled")]
    TaskCancelled,

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Agent not found: {id}")]
    AgentNotFound { id: crate::agent::AgentId },

    #[error("Task not found: {id}")]
    TaskNotFound { id: crate::task::TaskId },

    #[error("No executor attached for agent {id}")]
    NoExecutor { id: crate::agent::AgentId },
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(format!("{}", Error::NoHomeDir), "No home directory");
        assert_eq!(
            format!("{}", Error::UndecomposableTask("no template".to_string())),
            "Undecomposable task: no template"
        );
        assert_eq!(
            format!("{}", Error::ExecutionError("boom".to_string())),
            "Execution error: boom"
        );
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = Error::InvalidStateTransition {
            from: "executing".to_string(),
            to: "decomposing".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("executing"));
        assert!(msg.contains("decomposing"));
    }
}

//! Orchestration pipeline: decomposition, dispatch, execution supervision,
//! consensus, and the top-level controller.

pub mod consensus;
pub mod controller;
pub mod decomposer;
pub mod scheduler;
pub mod supervisor;
pub mod templates;

pub use consensus::{
    AcceptedResult, ConsensusDecision, ConsensusEngine, ConsensusMethod, ValidationReport, Verdict,
};
pub use controller::{OrchestrationController, SubtaskSummary, TaskStatusReport};
pub use decomposer::{Decomposer, Decomposition, ANALYZE_CAPABILITY};
pub use scheduler::{
    Backoff, DispatchScheduler, RunOutcome, SchedulerConfig, SchedulerEvent, SchedulerRun,
    SubtaskExpander,
};
pub use supervisor::{
    ExecutionResult, ExecutionSupervisor, ResultId, SubtaskOutcome, SupervisorConfig,
};
pub use templates::{StepSpec, TaskTemplate, TemplateLibrary};

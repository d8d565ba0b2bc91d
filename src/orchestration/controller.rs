//! Orchestration controller: the top-level task state machine.
//!
//! The controller owns every submitted task for its lifetime. It drives
//! the pipeline (decompose, dispatch, execute, arbitrate), enforces the
//! lifecycle transitions, propagates cancellation and deadlines, commits
//! snapshots after every accepted decision, and aggregates the final
//! report. Partial success is a first-class outcome: a failed task still
//! reports which subtasks succeeded, which failed, and why.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentId, AgentProfile, Capability};
use crate::config::EngineConfig;
use crate::core::dag::SubtaskDag;
use crate::core::subtask::{Subtask, SubtaskId, SubtaskStatus};
use crate::error::{Error, Result};
use crate::orchestration::consensus::{AcceptedResult, ConsensusDecision, ConsensusEngine};
use crate::orchestration::decomposer::Decomposer;
use crate::orchestration::scheduler::{
    DispatchScheduler, RunOutcome, SchedulerConfig, SchedulerEvent, SubtaskExpander,
};
use crate::orchestration::supervisor::{ExecutionSupervisor, SupervisorConfig};
use crate::plugin::{CapabilityExecutor, ExecutorSet, ValidationScorer};
use crate::registry::{AgentRegistry, HealthPolicy, RegistryEvent};
use crate::state::{SnapshotStore, TaskSnapshot};
use crate::task::{Strategy, Task, TaskId, TaskLifecycle, TaskSpec, TaskState};
use crate::{mlog, mlog_debug, mlog_warn};

/// Compact view of one subtask for status reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskSummary {
    /// The subtask id.
    pub subtask_id: SubtaskId,
    /// Human-readable name.
    pub name: String,
    /// Required capability.
    pub capability: Capability,
    /// Current status.
    pub status: SubtaskStatus,
    /// Attempts made so far.
    pub attempt_count: u32,
}

impl SubtaskSummary {
    fn from_subtask(subtask: &Subtask) -> Self {
        Self {
            subtask_id: subtask.id,
            name: subtask.name.clone(),
            capability: subtask.required_capability.clone(),
            status: subtask.status.clone(),
            attempt_count: subtask.attempt_count,
        }
    }
}

/// Caller-facing status report for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusReport {
    /// The task id.
    pub task_id: TaskId,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Decomposition strategy, once known.
    pub strategy: Option<Strategy>,
    /// Subtasks with an accepted consensus decision.
    pub completed_subtasks: Vec<SubtaskSummary>,
    /// Subtasks still pending or running.
    pub pending_subtasks: Vec<SubtaskSummary>,
    /// Subtasks that failed or were blocked.
    pub failed_subtasks: Vec<SubtaskSummary>,
    /// Accepted results so far; on failure or cancellation these are the
    /// retained partial results.
    pub partial_results: Vec<AcceptedResult>,
    /// Failure reason once the task reaches `Failed`.
    pub failure: Option<String>,
}

/// Per-task live state owned by the controller.
struct TaskRuntime {
    task: RwLock<Task>,
    lifecycle: RwLock<TaskLifecycle>,
    dag: RwLock<Option<Arc<RwLock<SubtaskDag>>>>,
    strategy: RwLock<Option<Strategy>>,
    accepted: RwLock<Vec<AcceptedResult>>,
    decisions: RwLock<Vec<ConsensusDecision>>,
    seed: RwLock<Vec<SubtaskId>>,
    cancel: CancellationToken,
}

impl TaskRuntime {
    fn new(task: Task) -> Self {
        Self {
            task: RwLock::new(task),
            lifecycle: RwLock::new(TaskLifecycle::new()),
            dag: RwLock::new(None),
            strategy: RwLock::new(None),
            accepted: RwLock::new(Vec::new()),
            decisions: RwLock::new(Vec::new()),
            seed: RwLock::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }
}

/// Top-level orchestration engine.
///
/// One controller serves many tasks; each submitted task gets its own
/// scheduler run driven by a spawned worker. Agents, executors, scorers,
/// and configuration are shared across tasks.
pub struct OrchestrationController {
    config: EngineConfig,
    registry: Arc<AgentRegistry>,
    executors: Arc<ExecutorSet>,
    supervisor: Arc<ExecutionSupervisor>,
    decomposer: Arc<Decomposer>,
    store: Option<Arc<SnapshotStore>>,
    tasks: RwLock<HashMap<TaskId, Arc<TaskRuntime>>>,
}

impl OrchestrationController {
    /// Create a controller from configuration and validation scorers.
    ///
    /// Returns the controller and a receiver for registry events.
    pub fn new(
        config: EngineConfig,
        scorers: Vec<Arc<dyn ValidationScorer>>,
    ) -> (Self, mpsc::Receiver<RegistryEvent>) {
        let policy = HealthPolicy {
            degrade_after: config.degrade_after,
            quarantine_after: config.quarantine_after,
        };
        let (registry, registry_events) = AgentRegistry::new(config.ewma_alpha, policy);
        let registry = Arc::new(registry);
        let executors = Arc::new(ExecutorSet::new());
        let consensus = Arc::new(ConsensusEngine::new(
            scorers,
            config.category_weights.clone(),
            config.accept_threshold,
        ));
        let supervisor = Arc::new(ExecutionSupervisor::new(
            Arc::clone(&registry),
            Arc::clone(&executors),
            consensus,
            SupervisorConfig::from(&config),
        ));
        let decomposer = Arc::new(Decomposer::from_config(&config));

        (
            Self {
                config,
                registry,
                executors,
                supervisor,
                decomposer,
                store: None,
                tasks: RwLock::new(HashMap::new()),
            },
            registry_events,
        )
    }

    /// Attach a snapshot store for crash recovery.
    pub fn set_store(&mut self, store: SnapshotStore) {
        self.store = Some(Arc::new(store));
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The shared agent registry.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Register an agent together with its capability executor.
    pub async fn register_agent(
        &self,
        profile: AgentProfile,
        executor: Arc<dyn CapabilityExecutor>,
    ) -> AgentId {
        let id = self.registry.register(profile).await;
        self.executors.attach(id, executor);
        id
    }

    /// Deregister an agent and detach its executor.
    pub async fn deregister_agent(&self, id: &AgentId) -> Result<()> {
        self.registry.deregister(id).await?;
        self.executors.detach(id);
        Ok(())
    }

    /// Submit a task for asynchronous processing.
    ///
    /// Returns immediately with the task id; progress is observable via
    /// `status` and `wait`.
    pub fn submit(self: &Arc<Self>, spec: TaskSpec) -> TaskId {
        let task = Task::new(spec);
        let task_id = task.id;
        mlog!(
            "controller: task {} submitted: {}",
            task_id.short(),
            task.description
        );

        let runtime = Arc::new(TaskRuntime::new(task));
        self.tasks.write().unwrap().insert(task_id, runtime);

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller.drive(task_id).await;
        });

        task_id
    }

    /// Resume a task from a persisted snapshot.
    ///
    /// Accepted subtasks keep their decisions; anything that was mid-flight
    /// at capture time is re-dispatched. Returns the (unchanged) task id.
    ///
    /// # Errors
    /// Returns an error if the snapshot's topology cannot be rebuilt or the
    /// persisted task was already terminal.
    pub fn resume(self: &Arc<Self>, snapshot: TaskSnapshot) -> Result<TaskId> {
        if snapshot.task.state.is_terminal() {
            return Err(Error::Validation(format!(
                "task {} is already {}",
                snapshot.task.id.short(),
                snapshot.task.state
            )));
        }

        let dag = snapshot.restore_dag()?;
        let accepted_ids: Vec<SubtaskId> = snapshot.accepted_ids().into_iter().collect();
        let task_id = snapshot.task.id;

        let mut task = snapshot.task.clone();
        task.state = TaskState::Dispatching;

        let runtime = Arc::new(TaskRuntime::new(task));
        {
            let mut lifecycle = runtime.lifecycle.write().unwrap();
            lifecycle.transition(TaskState::Decomposing)?;
            lifecycle.transition(TaskState::Dispatching)?;
        }
        *runtime.dag.write().unwrap() = Some(Arc::new(RwLock::new(dag)));
        *runtime.accepted.write().unwrap() = snapshot.accepted.clone();
        *runtime.decisions.write().unwrap() = snapshot.decisions.clone();
        *runtime.seed.write().unwrap() = accepted_ids;

        mlog!(
            "controller: task {} resumed from snapshot ({} accepted)",
            task_id.short(),
            snapshot.accepted.len()
        );

        self.tasks.write().unwrap().insert(task_id, runtime);
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            controller.drive(task_id).await;
        });

        Ok(task_id)
    }

    /// Get the current status report for a task.
    ///
    /// # Errors
    /// Returns an error if the task id is unknown.
    pub fn status(&self, task_id: &TaskId) -> Result<TaskStatusReport> {
        let runtime = self.runtime(task_id)?;
        Ok(self.build_report(&runtime))
    }

    /// Request cancellation of a task.
    ///
    /// The cancellation signal propagates to every in-flight subtask;
    /// already-accepted results are preserved for audit. Cancelling a
    /// terminal task is a no-op.
    ///
    /// # Errors
    /// Returns an error if the task id is unknown.
    pub fn cancel(&self, task_id: &TaskId) -> Result<()> {
        let runtime = self.runtime(task_id)?;
        if !runtime.lifecycle.read().unwrap().is_terminal() {
            mlog!("controller: task {} cancellation requested", task_id.short());
            runtime.cancel.cancel();
        }
        Ok(())
    }

    /// Wait until a task reaches a terminal state and return its report.
    ///
    /// # Errors
    /// Returns an error if the task id is unknown.
    pub async fn wait(&self, task_id: &TaskId) -> Result<TaskStatusReport> {
        loop {
            let report = self.status(task_id)?;
            if report.state.is_terminal() {
                return Ok(report);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Cancel every live task and wait for agents to go idle.
    pub async fn shutdown(&self) {
        let runtimes: Vec<Arc<TaskRuntime>> =
            self.tasks.read().unwrap().values().cloned().collect();
        for runtime in &runtimes {
            if !runtime.lifecycle.read().unwrap().is_terminal() {
                runtime.cancel.cancel();
            }
        }
        self.registry.drain().await;
    }

    // ========== Internal driving ==========

    async fn drive(self: Arc<Self>, task_id: TaskId) {
        let Ok(runtime) = self.runtime(&task_id) else {
            return;
        };

        // Deadline: same cancellation path as an explicit cancel request
        let deadline = runtime.task.read().unwrap().deadline;
        if let Some(deadline) = deadline {
            let cancel = runtime.cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(deadline) => cancel.cancel(),
                    _ = cancel.cancelled() => {}
                }
            });
        }

        let dag = {
            let prepared = runtime.dag.read().unwrap().clone();
            match prepared {
                // Resumed task: topology restored from the snapshot
                Some(dag) => dag,
                None => {
                    if self.transition(&runtime, TaskState::Decomposing).is_err() {
                        return;
                    }
                    if runtime.cancel.is_cancelled() {
                        let _ = self.transition(&runtime, TaskState::Cancelled);
                        return;
                    }

                    let task_snapshot = runtime.task.read().unwrap().clone();
                    let decomposition = match self.decomposer.decompose(&task_snapshot) {
                        Ok(decomposition) => decomposition,
                        Err(err) => {
                            self.fail_task(&runtime, err.to_string());
                            return;
                        }
                    };

                    *runtime.strategy.write().unwrap() = Some(decomposition.strategy);
                    let dag = Arc::new(RwLock::new(decomposition.dag));
                    *runtime.dag.write().unwrap() = Some(Arc::clone(&dag));

                    if self.transition(&runtime, TaskState::Dispatching).is_err() {
                        return;
                    }
                    // Topology is durable before execution begins
                    self.commit_snapshot(&runtime, &dag);
                    dag
                }
            }
        };

        let task_context = runtime.task.read().unwrap().context.clone();
        let expander: Arc<dyn SubtaskExpander> = self.decomposer.clone();
        let (mut scheduler, events) = DispatchScheduler::new(
            Arc::clone(&dag),
            Arc::clone(&self.registry),
            Arc::clone(&self.supervisor),
            Some(expander),
            task_context,
            SchedulerConfig::from(&self.config),
            runtime.cancel.clone(),
        );

        let seed = std::mem::take(&mut *runtime.seed.write().unwrap());
        if !seed.is_empty() {
            scheduler.seed_accepted(seed);
        }

        let listener = self.spawn_event_listener(Arc::clone(&runtime), Arc::clone(&dag), events);

        let run = scheduler.run().await;
        drop(scheduler);
        let _ = listener.await;

        match run.outcome {
            RunOutcome::Completed => {
                self.ensure_executing(&runtime);
                let _ = self.transition(&runtime, TaskState::Completed);
                mlog!(
                    "controller: task {} completed ({} subtasks accepted)",
                    task_id.short(),
                    run.accepted.len()
                );
            }
            RunOutcome::Failed => {
                runtime.task.write().unwrap().failure = run.failure.clone();
                self.ensure_executing(&runtime);
                let _ = self.transition(&runtime, TaskState::Failed);
                mlog!(
                    "controller: task {} failed: {}",
                    task_id.short(),
                    run.failure.as_deref().unwrap_or("unknown")
                );
            }
            RunOutcome::Cancelled => {
                let _ = self.transition(&runtime, TaskState::Cancelled);
                mlog!("controller: task {} cancelled", task_id.short());
            }
        }

        self.commit_snapshot(&runtime, &dag);
    }

    fn spawn_event_listener(
        self: &Arc<Self>,
        runtime: Arc<TaskRuntime>,
        dag: Arc<RwLock<SubtaskDag>>,
        mut events: mpsc::Receiver<SchedulerEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SchedulerEvent::SubtaskDispatched { subtask_id } => {
                        mlog_debug!(
                            "controller: subtask {} dispatched",
                            subtask_id.short()
                        );
                        // First dispatch moves the task into Executing
                        controller.ensure_executing(&runtime);
                    }
                    SchedulerEvent::SubtaskAccepted {
                        subtask_id,
                        result,
                        decision,
                        aggregate_score,
                    } => {
                        runtime.decisions.write().unwrap().push(decision);
                        runtime.accepted.write().unwrap().push(AcceptedResult {
                            subtask_id,
                            agent_id: result.agent_id,
                            payload: result.payload,
                            latency_ms: result.latency_ms,
                            aggregate_score,
                        });
                        // Commit after every accepted decision
                        controller.commit_snapshot(&runtime, &dag);
                    }
                    SchedulerEvent::SubtaskFailed { subtask_id, reason } => {
                        mlog_warn!(
                            "controller: subtask {} failed: {}",
                            subtask_id.short(),
                            reason
                        );
                    }
                    SchedulerEvent::SubtaskBlocked { subtask_id, reason } => {
                        mlog_warn!(
                            "controller: subtask {} blocked: {}",
                            subtask_id.short(),
                            reason
                        );
                    }
                    SchedulerEvent::AllSubtasksAccepted => {}
                }
            }
        })
    }

    fn ensure_executing(&self, runtime: &TaskRuntime) {
        let mut lifecycle = runtime.lifecycle.write().unwrap();
        if lifecycle.current() == TaskState::Dispatching
            && lifecycle.transition(TaskState::Executing).is_ok()
        {
            runtime.task.write().unwrap().state = TaskState::Executing;
        }
    }

    fn transition(&self, runtime: &TaskRuntime, target: TaskState) -> Result<()> {
        runtime.lifecycle.write().unwrap().transition(target)?;
        runtime.task.write().unwrap().state = target;
        Ok(())
    }

    fn fail_task(&self, runtime: &TaskRuntime, reason: String) {
        mlog_warn!("controller: task failed during decomposition: {}", reason);
        runtime.task.write().unwrap().failure = Some(reason);
        let _ = self.transition(runtime, TaskState::Failed);
    }

    fn commit_snapshot(&self, runtime: &TaskRuntime, dag: &Arc<RwLock<SubtaskDag>>) {
        let Some(store) = &self.store else { return };
        let task = runtime.task.read().unwrap().clone();
        let decisions = runtime.decisions.read().unwrap().clone();
        let accepted = runtime.accepted.read().unwrap().clone();
        let snapshot = {
            let dag = dag.read().unwrap();
            TaskSnapshot::capture(&task, &dag, &decisions, &accepted)
        };
        if let Err(err) = store.commit(&snapshot) {
            mlog_warn!(
                "controller: snapshot commit failed for task {}: {}",
                task.id.short(),
                err
            );
        }
    }

    fn build_report(&self, runtime: &TaskRuntime) -> TaskStatusReport {
        let task = runtime.task.read().unwrap();
        let mut completed = Vec::new();
        let mut pending = Vec::new();
        let mut failed = Vec::new();

        if let Some(dag) = runtime.dag.read().unwrap().as_ref() {
            for subtask in dag.read().unwrap().snapshots() {
                let summary = SubtaskSummary::from_subtask(&subtask);
                match subtask.status {
                    SubtaskStatus::Accepted => completed.push(summary),
                    SubtaskStatus::Failed { .. } | SubtaskStatus::Blocked { .. } => {
                        failed.push(summary)
                    }
                    SubtaskStatus::Pending | SubtaskStatus::Running => pending.push(summary),
                }
            }
        }

        TaskStatusReport {
            task_id: task.id,
            state: task.state,
            strategy: *runtime.strategy.read().unwrap(),
            completed_subtasks: completed,
            pending_subtasks: pending,
            failed_subtasks: failed,
            partial_results: runtime.accepted.read().unwrap().clone(),
            failure: task.failure.clone(),
        }
    }

    fn runtime(&self, task_id: &TaskId) -> Result<Arc<TaskRuntime>> {
        self.tasks
            .read()
            .unwrap()
            .get(task_id)
            .cloned()
            .ok_or(Error::TaskNotFound { id: *task_id })
    }
}

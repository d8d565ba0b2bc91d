//! Dispatch scheduler for subtask execution.
//!
//! The scheduler drives one task's subtask DAG to a terminal outcome: it
//! selects dependency-satisfied subtasks, verifies a candidate agent
//! exists, spawns the supervisor for each dispatch, and folds supervisor
//! outcomes back into the DAG, unblocking dependents as consensus accepts
//! results. It emits events for every lifecycle change.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::core::dag::SubtaskDag;
use crate::core::subtask::{Subtask, SubtaskId};
use crate::mlog_debug;
use crate::orchestration::consensus::{AcceptedResult, ConsensusDecision};
use crate::orchestration::supervisor::{ExecutionResult, ExecutionSupervisor, SubtaskOutcome};
use crate::registry::AgentRegistry;

/// Default global cap on in-flight subtasks per task.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 50;

/// Default initial backoff when no candidate agent is available.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 200;

/// Default backoff ceiling.
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 5_000;

/// Bounded exponential backoff.
///
/// The first delay is the base; each subsequent delay doubles up to the
/// cap. `reset` returns to the base.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    current: Option<Duration>,
}

impl Backoff {
    /// Create a backoff with the given base and cap.
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            current: None,
        }
    }

    /// Get the next delay, doubling from the previous one.
    pub fn next_delay(&mut self) -> Duration {
        let next = match self.current {
            None => self.base,
            Some(previous) => std::cmp::min(previous * 2, self.cap),
        };
        self.current = Some(next);
        next
    }

    /// Reset to the base delay.
    pub fn reset(&mut self) {
        self.current = None;
    }
}

/// Hook invoked after each accepted subtask.
///
/// The hierarchical decomposer uses this to append a second decomposition
/// pass to the DAG once its analysis subtask is accepted. Runs inside the
/// scheduler loop, so appended subtasks are visible before the next
/// ready-set computation.
pub trait SubtaskExpander: Send + Sync {
    /// Inspect an accepted subtask and optionally append new subtasks.
    ///
    /// # Errors
    /// An error fails the whole task (surfaced, never swallowed).
    fn expand_accepted(
        &self,
        dag: &mut SubtaskDag,
        subtask: &Subtask,
        payload: &Value,
    ) -> crate::error::Result<Vec<SubtaskId>>;
}

/// Events emitted by the scheduler for subtask lifecycle changes.
///
/// These events allow external components (controller, persistence) to
/// react to state changes without polling.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    /// A subtask was dispatched to the supervisor.
    SubtaskDispatched {
        /// The dispatched subtask.
        subtask_id: SubtaskId,
    },
    /// Consensus accepted a result for a subtask.
    SubtaskAccepted {
        /// The accepted subtask.
        subtask_id: SubtaskId,
        /// The winning result.
        result: ExecutionResult,
        /// The consensus decision.
        decision: ConsensusDecision,
        /// Aggregate score of the winning result.
        aggregate_score: f64,
    },
    /// A subtask exhausted its attempts without acceptance.
    SubtaskFailed {
        /// The failed subtask.
        subtask_id: SubtaskId,
        /// Reason describing the failure.
        reason: String,
    },
    /// A subtask was transitively blocked by a failed dependency.
    SubtaskBlocked {
        /// The blocked subtask.
        subtask_id: SubtaskId,
        /// Reason why the subtask is blocked.
        reason: String,
    },
    /// Every subtask in the DAG has an accepted decision.
    AllSubtasksAccepted,
}

/// How a scheduler run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every subtask was accepted.
    Completed,
    /// At least one subtask failed with no path forward.
    Failed,
    /// Cancellation was observed.
    Cancelled,
}

/// Summary of one scheduler run.
#[derive(Debug, Clone)]
pub struct SchedulerRun {
    /// Terminal outcome of the run.
    pub outcome: RunOutcome,
    /// Accepted results, in acceptance order.
    pub accepted: Vec<AcceptedResult>,
    /// Consensus decisions, in acceptance order.
    pub decisions: Vec<ConsensusDecision>,
    /// First failure reason, if the run failed.
    pub failure: Option<String>,
}

/// Scheduler tuning knobs, derived from the engine configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Global cap on in-flight subtasks.
    pub max_in_flight: usize,
    /// Initial backoff when nothing can be dispatched.
    pub backoff_base: Duration,
    /// Backoff ceiling.
    pub backoff_cap: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            backoff_cap: Duration::from_millis(DEFAULT_BACKOFF_CAP_MS),
        }
    }
}

impl From<&EngineConfig> for SchedulerConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_in_flight: config.max_in_flight,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms),
        }
    }
}

/// Internal wake reasons for the scheduling loop.
enum Wake {
    Outcome(SubtaskOutcome),
    Cancelled,
    Timer,
}

/// Event-driven dispatcher for one task's subtask DAG.
pub struct DispatchScheduler {
    /// The subtask dependency graph.
    dag: Arc<RwLock<SubtaskDag>>,
    /// Registry used to verify candidate availability before dispatch.
    registry: Arc<AgentRegistry>,
    /// Supervisor that runs dispatched subtasks.
    supervisor: Arc<ExecutionSupervisor>,
    /// Optional expansion hook for hierarchical decomposition.
    expander: Option<Arc<dyn SubtaskExpander>>,
    /// Channel for emitting scheduler events.
    event_tx: mpsc::Sender<SchedulerEvent>,
    /// Task context forwarded to validators.
    task_context: HashMap<String, String>,
    /// Tuning knobs.
    config: SchedulerConfig,
    /// Task-level cancellation token.
    cancel: CancellationToken,
    /// Subtasks with an accepted consensus decision.
    accepted: HashSet<SubtaskId>,
    /// Subtasks currently running under the supervisor.
    in_flight: HashSet<SubtaskId>,
    /// Consensus decisions in acceptance order.
    decisions: Vec<ConsensusDecision>,
    /// Accepted results in acceptance order.
    accepted_results: Vec<AcceptedResult>,
    /// First failure reason observed, if any.
    failure: Option<String>,
    /// Backoff for ticks where nothing could be dispatched.
    backoff: Backoff,
    /// Sender handed to spawned supervisor runs.
    outcome_tx: mpsc::Sender<SubtaskOutcome>,
    /// Receiver for supervisor outcomes.
    outcome_rx: mpsc::Receiver<SubtaskOutcome>,
}

impl DispatchScheduler {
    /// Create a new scheduler for one task.
    ///
    /// Returns the scheduler and a receiver for scheduler events.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dag: Arc<RwLock<SubtaskDag>>,
        registry: Arc<AgentRegistry>,
        supervisor: Arc<ExecutionSupervisor>,
        expander: Option<Arc<dyn SubtaskExpander>>,
        task_context: HashMap<String, String>,
        config: SchedulerConfig,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<SchedulerEvent>) {
        let (event_tx, event_rx) = mpsc::channel(100);
        let (outcome_tx, outcome_rx) = mpsc::channel(100);
        let backoff = Backoff::new(config.backoff_base, config.backoff_cap);
        (
            Self {
                dag,
                registry,
                supervisor,
                expander,
                event_tx,
                task_context,
                config,
                cancel,
                accepted: HashSet::new(),
                in_flight: HashSet::new(),
                decisions: Vec::new(),
                accepted_results: Vec::new(),
                failure: None,
                backoff,
                outcome_tx,
                outcome_rx,
            },
            event_rx,
        )
    }

    /// Seed the accepted set, e.g. when resuming from a snapshot.
    pub fn seed_accepted(&mut self, accepted: impl IntoIterator<Item = SubtaskId>) {
        self.accepted.extend(accepted);
    }

    /// Number of in-flight subtasks.
    pub fn active_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Subtasks ready to dispatch: dependencies accepted, not in flight.
    fn ready_subtasks(&self) -> Vec<SubtaskId> {
        let dag = self.dag.read().unwrap();
        dag.ready_subtasks(&self.accepted)
            .into_iter()
            .filter(|id| !self.in_flight.contains(id))
            .collect()
    }

    /// Dispatch every ready subtask that has a candidate agent, up to the
    /// in-flight cap. Returns the number of subtasks dispatched.
    async fn dispatch_ready(&mut self) -> usize {
        if self.failure.is_some() {
            // Draining after a failure: no new work
            return 0;
        }

        let ready = self.ready_subtasks();
        let mut dispatched = 0;

        for subtask_id in ready {
            if self.in_flight.len() >= self.config.max_in_flight {
                break;
            }

            let record = {
                let dag = self.dag.read().unwrap();
                dag.record(&subtask_id)
            };
            let Some(record) = record else { continue };

            let capability = record.read().unwrap().required_capability.clone();
            if self.registry.find_candidates(&capability).is_empty() {
                // Transient NoCandidateAgent: subtask stays Pending and is
                // retried on the next tick with backoff
                mlog_debug!(
                    "scheduler: no candidate for {} (subtask {}), retrying later",
                    capability,
                    subtask_id.short()
                );
                continue;
            }

            record.write().unwrap().start();
            self.in_flight.insert(subtask_id);

            let supervisor = Arc::clone(&self.supervisor);
            let context = self.task_context.clone();
            let cancel = self.cancel.clone();
            let outcome_tx = self.outcome_tx.clone();
            tokio::spawn(async move {
                let outcome = supervisor.run_subtask(record, context, cancel).await;
                let _ = outcome_tx.send(outcome).await;
            });

            let _ = self
                .event_tx
                .send(SchedulerEvent::SubtaskDispatched { subtask_id })
                .await;
            dispatched += 1;
        }

        dispatched
    }

    /// Fold a supervisor outcome back into the DAG and bookkeeping.
    async fn handle_outcome(&mut self, outcome: SubtaskOutcome) {
        let subtask_id = outcome.subtask_id();
        self.in_flight.remove(&subtask_id);

        match outcome {
            SubtaskOutcome::Accepted {
                result,
                decision,
                aggregate_score,
                ..
            } => {
                let record = {
                    let dag = self.dag.read().unwrap();
                    dag.record(&subtask_id)
                };
                if let Some(record) = record {
                    record.write().unwrap().accept();
                }
                self.accepted.insert(subtask_id);
                self.decisions.push(decision.clone());
                self.accepted_results.push(AcceptedResult {
                    subtask_id,
                    agent_id: result.agent_id,
                    payload: result.payload.clone(),
                    latency_ms: result.latency_ms,
                    aggregate_score,
                });

                // Second decomposition pass: expansion runs inside the loop
                // so new subtasks are visible before the next ready check
                if let Some(expander) = self.expander.clone() {
                    let snapshot = {
                        let dag = self.dag.read().unwrap();
                        dag.snapshot(&subtask_id)
                    };
                    if let Some(snapshot) = snapshot {
                        let expansion = {
                            let mut dag = self.dag.write().unwrap();
                            expander.expand_accepted(&mut dag, &snapshot, &result.payload)
                        };
                        match expansion {
                            Ok(new_ids) if !new_ids.is_empty() => {
                                mlog_debug!(
                                    "scheduler: expansion after {} added {} subtasks",
                                    subtask_id.short(),
                                    new_ids.len()
                                );
                            }
                            Ok(_) => {}
                            Err(err) => {
                                self.failure.get_or_insert(err.to_string());
                            }
                        }
                    }
                }

                let _ = self
                    .event_tx
                    .send(SchedulerEvent::SubtaskAccepted {
                        subtask_id,
                        result,
                        decision,
                        aggregate_score,
                    })
                    .await;
            }
            SubtaskOutcome::Failed { reason, .. } => {
                let blocked = {
                    let dag = self.dag.read().unwrap();
                    if let Some(record) = dag.record(&subtask_id) {
                        record.write().unwrap().fail(&reason);
                    }
                    dag.mark_blocked_from(&subtask_id)
                };

                let _ = self
                    .event_tx
                    .send(SchedulerEvent::SubtaskFailed {
                        subtask_id,
                        reason: reason.clone(),
                    })
                    .await;
                for blocked_id in blocked {
                    let _ = self
                        .event_tx
                        .send(SchedulerEvent::SubtaskBlocked {
                            subtask_id: blocked_id,
                            reason: format!("dependency {} failed", subtask_id.short()),
                        })
                        .await;
                }

                self.failure
                    .get_or_insert(format!("subtask {} failed: {}", subtask_id.short(), reason));
            }
            SubtaskOutcome::Cancelled { .. } => {
                // Cancellation is handled at the loop level; the subtask
                // keeps its last committed status
            }
        }
    }

    /// Run the scheduling loop until the task reaches a terminal outcome.
    ///
    /// This is the main entry point for task execution. It:
    /// 1. Dispatches ready subtasks (dependencies accepted, candidate exists)
    /// 2. Waits for supervisor outcomes, cancellation, or a backoff timer
    /// 3. Folds outcomes back into the DAG, unblocking dependents
    /// 4. Repeats until completion, failure, or cancellation
    pub async fn run(&mut self) -> SchedulerRun {
        loop {
            if self.dag.read().unwrap().all_accepted(&self.accepted) {
                let _ = self.event_tx.send(SchedulerEvent::AllSubtasksAccepted).await;
                return self.finish(RunOutcome::Completed);
            }

            if self.cancel.is_cancelled() {
                return self.finish(RunOutcome::Cancelled);
            }

            if self.failure.is_some() && self.in_flight.is_empty() {
                return self.finish(RunOutcome::Failed);
            }

            let dispatched = self.dispatch_ready().await;
            if dispatched > 0 {
                self.backoff.reset();
            }

            if self.in_flight.is_empty() && dispatched == 0 {
                if self.ready_subtasks().is_empty() {
                    // Nothing running, nothing dispatchable: the remaining
                    // subtasks are failed or blocked
                    self.failure
                        .get_or_insert("no runnable subtasks remain".to_string());
                    return self.finish(RunOutcome::Failed);
                }

                // Ready subtasks exist but no candidate agent: wait with
                // bounded exponential backoff before the next tick
                let delay = self.backoff.next_delay();
                let wake = tokio::select! {
                    _ = tokio::time::sleep(delay) => Wake::Timer,
                    _ = self.cancel.cancelled() => Wake::Cancelled,
                };
                if matches!(wake, Wake::Cancelled) {
                    return self.finish(RunOutcome::Cancelled);
                }
                continue;
            }

            let wake = tokio::select! {
                outcome = self.outcome_rx.recv() => match outcome {
                    Some(outcome) => Wake::Outcome(outcome),
                    None => Wake::Cancelled,
                },
                _ = self.cancel.cancelled() => Wake::Cancelled,
            };

            match wake {
                Wake::Outcome(outcome) => self.handle_outcome(outcome).await,
                Wake::Cancelled => return self.finish(RunOutcome::Cancelled),
                Wake::Timer => {}
            }
        }
    }

    fn finish(&mut self, outcome: RunOutcome) -> SchedulerRun {
        SchedulerRun {
            outcome,
            accepted: std::mem::take(&mut self.accepted_results),
            decisions: std::mem::take(&mut self.decisions),
            failure: self.failure.clone(),
        }
    }
}

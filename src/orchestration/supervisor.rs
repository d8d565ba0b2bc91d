//! Execution supervisor for running subtasks against agents.
//!
//! The supervisor owns the per-attempt machinery: timeout enforcement,
//! cooperative cancellation, agent rotation across retries, competitive
//! fan-out, outcome reporting to the registry, and the hand-off of
//! candidate results to the consensus engine.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::agent::{AgentId, Capability};
use crate::config::EngineConfig;
use crate::core::subtask::{CoordinationMode, Subtask, SubtaskId};
use crate::error::Error;
use crate::mlog_debug;
use crate::orchestration::consensus::{ConsensusDecision, ConsensusEngine, ValidationReport};
use crate::orchestration::scheduler::Backoff;
use crate::plugin::ExecutorSet;
use crate::registry::AgentRegistry;

/// Default per-subtask execution timeout.
pub const DEFAULT_EXECUTION_TIMEOUT_SECS: u64 = 30;

/// Default maximum attempts per subtask.
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Unique identifier for one execution attempt's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultId(pub Uuid);

impl ResultId {
    /// Create a new unique result identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for ResultId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ResultId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The outcome of one execution attempt.
///
/// Immutable once created; one per attempt. A failed attempt carries its
/// error message and an empty payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Unique identifier for this result.
    pub id: ResultId,
    /// The subtask that was attempted.
    pub subtask_id: SubtaskId,
    /// The agent that ran the attempt.
    pub agent_id: AgentId,
    /// The produced payload (Null for failed attempts).
    pub payload: Value,
    /// Wall-clock execution time in milliseconds.
    pub latency_ms: u64,
    /// Error message if the attempt failed.
    pub error: Option<String>,
    /// When the result was produced.
    pub produced_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Create a successful result.
    pub fn success(subtask_id: SubtaskId, agent_id: AgentId, payload: Value, latency_ms: u64) -> Self {
        Self {
            id: ResultId::new(),
            subtask_id,
            agent_id,
            payload,
            latency_ms,
            error: None,
            produced_at: Utc::now(),
        }
    }

    /// Create a failed result.
    pub fn failure(subtask_id: SubtaskId, agent_id: AgentId, error: String, latency_ms: u64) -> Self {
        Self {
            id: ResultId::new(),
            subtask_id,
            agent_id,
            payload: Value::Null,
            latency_ms,
            error: Some(error),
            produced_at: Utc::now(),
        }
    }

    /// Check if the attempt succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Terminal outcome of supervising one subtask.
#[derive(Debug, Clone)]
pub enum SubtaskOutcome {
    /// Consensus accepted a candidate result.
    Accepted {
        /// The subtask that was decided.
        subtask_id: SubtaskId,
        /// The winning result.
        result: ExecutionResult,
        /// The consensus decision.
        decision: ConsensusDecision,
        /// Validation reports for every candidate in the final round.
        reports: Vec<ValidationReport>,
        /// Aggregate score of the winning result.
        aggregate_score: f64,
    },
    /// Attempts exhausted without an accepted result.
    Failed {
        /// The subtask that failed.
        subtask_id: SubtaskId,
        /// Reason describing the final failure.
        reason: String,
    },
    /// Cancellation was observed before a terminal outcome.
    Cancelled {
        /// The subtask whose execution was cancelled.
        subtask_id: SubtaskId,
    },
}

impl SubtaskOutcome {
    /// The subtask this outcome belongs to.
    pub fn subtask_id(&self) -> SubtaskId {
        match self {
            SubtaskOutcome::Accepted { subtask_id, .. } => *subtask_id,
            SubtaskOutcome::Failed { subtask_id, .. } => *subtask_id,
            SubtaskOutcome::Cancelled { subtask_id } => *subtask_id,
        }
    }
}

/// Supervisor tuning knobs, derived from the engine configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Maximum attempts per subtask.
    pub retry_limit: u32,
    /// Default per-attempt timeout.
    pub default_timeout: Duration,
    /// Per-capability timeout overrides.
    pub capability_timeouts: HashMap<Capability, Duration>,
    /// Initial wait when no candidate agent is available.
    pub backoff_base: Duration,
    /// Ceiling for the candidate wait.
    pub backoff_cap: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            retry_limit: DEFAULT_RETRY_LIMIT,
            default_timeout: Duration::from_secs(DEFAULT_EXECUTION_TIMEOUT_SECS),
            capability_timeouts: HashMap::new(),
            backoff_base: Duration::from_millis(200),
            backoff_cap: Duration::from_secs(5),
        }
    }
}

impl From<&EngineConfig> for SupervisorConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            retry_limit: config.retry_limit,
            default_timeout: config.default_timeout(),
            capability_timeouts: config
                .capability_timeout_secs
                .iter()
                .map(|(cap, secs)| (Capability::new(cap.clone()), Duration::from_secs(*secs)))
                .collect(),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_cap: Duration::from_millis(config.backoff_cap_ms),
        }
    }
}

/// Runs subtasks against agents with timeout, retry, and cancellation.
pub struct ExecutionSupervisor {
    /// Registry for candidate lookup, load slots, and outcome reporting.
    registry: Arc<AgentRegistry>,
    /// Executors attached to registered agents.
    executors: Arc<ExecutorSet>,
    /// Consensus engine arbitrating candidate results.
    consensus: Arc<ConsensusEngine>,
    /// Tuning knobs.
    config: SupervisorConfig,
}

impl ExecutionSupervisor {
    /// Create a new supervisor.
    pub fn new(
        registry: Arc<AgentRegistry>,
        executors: Arc<ExecutorSet>,
        consensus: Arc<ConsensusEngine>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            registry,
            executors,
            consensus,
            config,
        }
    }

    /// The configured retry limit.
    pub fn retry_limit(&self) -> u32 {
        self.config.retry_limit
    }

    /// The execution timeout for a capability.
    pub fn timeout_for(&self, capability: &Capability) -> Duration {
        self.config
            .capability_timeouts
            .get(capability)
            .copied()
            .unwrap_or(self.config.default_timeout)
    }

    /// Run one execution attempt on one agent.
    ///
    /// Enforces the per-capability timeout and propagates cancellation via
    /// a child token, so a timed-out or cancelled attempt signals the
    /// executor to stop. Always returns a result; failures are embedded.
    pub async fn execute_once(
        &self,
        subtask: &Subtask,
        agent_id: AgentId,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let executor = match self.executors.get(&agent_id) {
            Ok(executor) => executor,
            Err(err) => return ExecutionResult::failure(subtask.id, agent_id, err.to_string(), 0),
        };

        let timeout = self.timeout_for(&subtask.required_capability);
        let attempt_cancel = cancel.child_token();
        let started = Instant::now();

        let outcome: std::result::Result<crate::error::Result<Value>, ()> = tokio::select! {
            res = tokio::time::timeout(
                timeout,
                executor.execute(
                    &subtask.required_capability,
                    &subtask.input_payload,
                    attempt_cancel.clone(),
                ),
            ) => res.map_err(|_| ()),
            _ = cancel.cancelled() => Ok(Err(Error::TaskCancelled)),
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(Ok(payload)) => {
                ExecutionResult::success(subtask.id, agent_id, payload, latency_ms)
            }
            Ok(Err(err)) => {
                attempt_cancel.cancel();
                ExecutionResult::failure(subtask.id, agent_id, err.to_string(), latency_ms)
            }
            Err(()) => {
                // Timed out: signal the executor to stop, then record the attempt
                attempt_cancel.cancel();
                ExecutionResult::failure(
                    subtask.id,
                    agent_id,
                    Error::ExecutionTimeout(timeout).to_string(),
                    latency_ms,
                )
            }
        }
    }

    /// Drive one subtask to a terminal outcome.
    ///
    /// Each round selects candidates (preferring agents not used in the
    /// previous round when at least two exist), reserves their load slots,
    /// executes solo or competitively, reports every outcome to the
    /// registry, and submits successful candidates to consensus. Rounds
    /// repeat until a candidate is accepted, the attempt budget is
    /// exhausted, or cancellation is observed.
    pub async fn run_subtask(
        &self,
        record: Arc<RwLock<Subtask>>,
        task_context: HashMap<String, String>,
        cancel: CancellationToken,
    ) -> SubtaskOutcome {
        let (subtask_id, capability, coordination) = {
            let subtask = record.read().unwrap();
            (
                subtask.id,
                subtask.required_capability.clone(),
                subtask.coordination,
            )
        };

        let mut previous_round: Vec<AgentId> = Vec::new();
        let mut last_failure = format!("no candidate agent for capability: {}", capability);
        let mut wait = Backoff::new(self.config.backoff_base, self.config.backoff_cap);

        loop {
            if cancel.is_cancelled() {
                return SubtaskOutcome::Cancelled { subtask_id };
            }

            let attempts = record.read().unwrap().attempt_count;
            if attempts >= self.config.retry_limit {
                return SubtaskOutcome::Failed {
                    subtask_id,
                    reason: last_failure,
                };
            }

            // Candidate selection: ranked by the registry, rotated so the
            // previous round's agents go last when alternatives exist.
            let mut candidates = self.registry.find_candidates(&capability);
            if candidates.len() >= 2 && !previous_round.is_empty() {
                let (fresh, used): (Vec<AgentId>, Vec<AgentId>) = candidates
                    .into_iter()
                    .partition(|id| !previous_round.contains(id));
                candidates = fresh;
                candidates.extend(used);
            }

            let want = match coordination {
                CoordinationMode::Solo => 1,
                CoordinationMode::Competitive { width } => width.max(1),
            };

            let mut picked = Vec::new();
            for candidate in candidates {
                if picked.len() == want {
                    break;
                }
                if matches!(self.registry.try_acquire(&candidate), Ok(true)) {
                    picked.push(candidate);
                }
            }

            if picked.is_empty() {
                // Transient NoCandidateAgent: wait with bounded backoff
                let delay = wait.next_delay();
                mlog_debug!(
                    "supervisor: no candidate for {} on subtask {}, waiting {:?}",
                    capability,
                    subtask_id.short(),
                    delay
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return SubtaskOutcome::Cancelled { subtask_id },
                }
                continue;
            }
            wait.reset();

            let snapshot = {
                let mut subtask = record.write().unwrap();
                subtask.record_attempt(picked[0]);
                subtask.clone()
            };

            let results: Vec<ExecutionResult> = if picked.len() == 1 {
                vec![self.execute_once(&snapshot, picked[0], &cancel).await]
            } else {
                let attempts = picked
                    .iter()
                    .map(|agent_id| self.execute_once(&snapshot, *agent_id, &cancel));
                futures::future::join_all(attempts).await
            };

            for result in &results {
                self.registry.release(&result.agent_id);
                let _ = self
                    .registry
                    .report_outcome(&result.agent_id, result.is_success(), result.latency_ms)
                    .await;
            }

            if cancel.is_cancelled() {
                return SubtaskOutcome::Cancelled { subtask_id };
            }

            previous_round = picked;
            let attempts = record.read().unwrap().attempt_count;
            let exhausted = attempts >= self.config.retry_limit;

            let successes: Vec<ExecutionResult> =
                results.iter().filter(|r| r.is_success()).cloned().collect();

            if successes.is_empty() {
                last_failure = results
                    .iter()
                    .filter_map(|r| r.error.clone())
                    .next()
                    .unwrap_or_else(|| "execution failed".to_string());
                if exhausted {
                    return SubtaskOutcome::Failed {
                        subtask_id,
                        reason: last_failure,
                    };
                }
                continue;
            }

            let (decision, reports) =
                self.consensus
                    .evaluate(subtask_id, &successes, &task_context, exhausted);

            if let Some(chosen) = decision.chosen_result {
                if let Some(result) = successes.iter().find(|r| r.id == chosen).cloned() {
                    let aggregate_score = reports
                        .iter()
                        .find(|r| r.result_id == chosen)
                        .map(|r| r.aggregate_score)
                        .unwrap_or(0.0);
                    return SubtaskOutcome::Accepted {
                        subtask_id,
                        result,
                        decision,
                        reports,
                        aggregate_score,
                    };
                }
            }

            last_failure = Error::ConsensusRejected { subtask_id }.to_string();
            if exhausted {
                return SubtaskOutcome::Failed {
                    subtask_id,
                    reason: last_failure,
                };
            }
        }
    }
}

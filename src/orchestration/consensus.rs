//! Consensus and validation engine.
//!
//! Candidate results are scored across pluggable validation categories;
//! the aggregate is a weighted mean. A candidate is accepted when its
//! aggregate reaches the accept threshold; among several accepted
//! candidates the highest aggregate wins, with lower latency breaking
//! ties. Consensus is a pure function of its inputs, so re-validating the
//! same result set always yields the same decision.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::subtask::SubtaskId;
use crate::mlog_debug;
use crate::orchestration::supervisor::{ExecutionResult, ResultId};
use crate::plugin::ValidationScorer;

/// Default minimum aggregate score for acceptance.
pub const DEFAULT_ACCEPT_THRESHOLD: f64 = 0.85;

/// Verdict for one validated candidate result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Aggregate score met the accept threshold.
    Accept,
    /// Below threshold with attempts remaining; another attempt is due.
    Retry,
    /// Below threshold with the attempt budget exhausted.
    Reject,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Accept => write!(f, "accept"),
            Verdict::Retry => write!(f, "retry"),
            Verdict::Reject => write!(f, "reject"),
        }
    }
}

/// How a consensus decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMethod {
    /// One candidate validated alone (solo coordination).
    SoloValidation,
    /// Several candidates competed; the highest aggregate won.
    HighestScore,
}

/// Validation scores for one candidate result.
///
/// Immutable once created; one per evaluated ExecutionResult.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// The subtask this report belongs to.
    pub subtask_id: SubtaskId,
    /// The candidate result that was scored.
    pub result_id: ResultId,
    /// Per-category scores, each in [0, 1].
    pub scores: BTreeMap<String, f64>,
    /// Weighted mean of the category scores, in [0, 1].
    pub aggregate_score: f64,
    /// Verdict derived from the aggregate and the attempt budget.
    pub verdict: Verdict,
}

/// Terminal consensus artifact for a subtask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusDecision {
    /// The subtask decided.
    pub subtask_id: SubtaskId,
    /// The winning result, if any candidate was accepted.
    pub chosen_result: Option<ResultId>,
    /// Every candidate that took part in the decision.
    pub participating_results: Vec<ResultId>,
    /// How the decision was reached.
    pub method: ConsensusMethod,
}

impl ConsensusDecision {
    /// Check whether a candidate was accepted.
    pub fn is_accepted(&self) -> bool {
        self.chosen_result.is_some()
    }
}

/// An accepted result as retained for reports and snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedResult {
    /// The subtask the result answers.
    pub subtask_id: SubtaskId,
    /// The agent that produced the winning result.
    pub agent_id: crate::agent::AgentId,
    /// The winning payload.
    pub payload: serde_json::Value,
    /// Execution latency of the winning attempt.
    pub latency_ms: u64,
    /// Aggregate validation score of the winning result.
    pub aggregate_score: f64,
}

/// Scores candidates and arbitrates among them.
///
/// Categories are pluggable; the engine treats them uniformly. Weights
/// default to 1.0 per category; scorer outputs are clamped into [0, 1].
pub struct ConsensusEngine {
    scorers: Vec<Arc<dyn ValidationScorer>>,
    weights: HashMap<String, f64>,
    accept_threshold: f64,
}

impl ConsensusEngine {
    /// Create an engine from scorers, weights, and an accept threshold.
    pub fn new(
        scorers: Vec<Arc<dyn ValidationScorer>>,
        weights: HashMap<String, f64>,
        accept_threshold: f64,
    ) -> Self {
        Self {
            scorers,
            weights,
            accept_threshold,
        }
    }

    /// The configured accept threshold.
    pub fn accept_threshold(&self) -> f64 {
        self.accept_threshold
    }

    /// Score one candidate across all categories.
    ///
    /// Returns the per-category scores and the weighted-mean aggregate.
    /// With no scorers configured every candidate trivially aggregates
    /// to 1.0.
    pub fn score_candidate(
        &self,
        result: &ExecutionResult,
        task_context: &HashMap<String, String>,
    ) -> (BTreeMap<String, f64>, f64) {
        let mut scores = BTreeMap::new();
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;

        for scorer in &self.scorers {
            let category = scorer.category().to_string();
            let raw = scorer.score(&result.payload, task_context);
            let score = raw.clamp(0.0, 1.0);
            let weight = self.weights.get(&category).copied().unwrap_or(1.0);
            weighted_sum += weight * score;
            weight_total += weight;
            scores.insert(category, score);
        }

        let aggregate = if weight_total > 0.0 {
            weighted_sum / weight_total
        } else {
            1.0
        };

        (scores, aggregate)
    }

    /// Validate candidate results for a subtask and decide.
    ///
    /// `attempts_exhausted` flips below-threshold verdicts from Retry to
    /// Reject. Candidates are expected to be successful executions; the
    /// supervisor never forwards errored attempts here.
    pub fn evaluate(
        &self,
        subtask_id: SubtaskId,
        results: &[ExecutionResult],
        task_context: &HashMap<String, String>,
        attempts_exhausted: bool,
    ) -> (ConsensusDecision, Vec<ValidationReport>) {
        let method = if results.len() <= 1 {
            ConsensusMethod::SoloValidation
        } else {
            ConsensusMethod::HighestScore
        };

        let mut reports = Vec::with_capacity(results.len());
        for result in results {
            let (scores, aggregate) = self.score_candidate(result, task_context);
            let verdict = if aggregate >= self.accept_threshold {
                Verdict::Accept
            } else if attempts_exhausted {
                Verdict::Reject
            } else {
                Verdict::Retry
            };
            mlog_debug!(
                "consensus: subtask {} result {} aggregate={:.3} verdict={}",
                subtask_id.short(),
                result.id.short(),
                aggregate,
                verdict
            );
            reports.push(ValidationReport {
                subtask_id,
                result_id: result.id,
                scores,
                aggregate_score: aggregate,
                verdict,
            });
        }

        // Winner-take-all: highest aggregate among accepted candidates,
        // lower latency breaking ties, result id as the final tie-breaker
        // so the decision is deterministic.
        let chosen_result = reports
            .iter()
            .filter(|r| r.verdict == Verdict::Accept)
            .map(|r| {
                let latency = results
                    .iter()
                    .find(|res| res.id == r.result_id)
                    .map(|res| res.latency_ms)
                    .unwrap_or(u64::MAX);
                (r.result_id, r.aggregate_score, latency)
            })
            .max_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.2.cmp(&a.2))
                    .then_with(|| b.0.cmp(&a.0))
            })
            .map(|(id, _, _)| id);

        let decision = ConsensusDecision {
            subtask_id,
            chosen_result,
            participating_results: results.iter().map(|r| r.id).collect(),
            method,
        };

        (decision, reports)
    }
}

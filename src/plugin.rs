//! Plugin seams for capability executors and validation scorers.
//!
//! The engine never implements agent skills itself: each agent is backed by
//! a `CapabilityExecutor` registered at startup, and each validation
//! category is a `ValidationScorer`. Both are black boxes behind
//! object-safe traits.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentId, Capability};
use crate::error::{Error, Result};

/// A pluggable capability executor.
///
/// Implementations perform the actual work of a subtask (code generation,
/// doc generation, scanning, ...). Executors must honor the cancellation
/// token: when it fires, return promptly with an error.
#[async_trait]
pub trait CapabilityExecutor: Send + Sync {
    /// The capabilities this executor can perform.
    fn capabilities(&self) -> HashSet<Capability>;

    /// Execute one unit of work.
    ///
    /// # Errors
    /// Returns an error if the work fails or was cancelled.
    async fn execute(
        &self,
        capability: &Capability,
        payload: &Value,
        cancel: CancellationToken,
    ) -> Result<Value>;
}

/// A pluggable validation category scorer.
///
/// Scorers judge one dimension of a candidate payload (schema conformance,
/// internal consistency, policy compliance, ...) and return a score in
/// [0, 1]. Scores outside the range are clamped by the consensus engine.
pub trait ValidationScorer: Send + Sync {
    /// The category name this scorer judges.
    fn category(&self) -> &str;

    /// Score a candidate payload against the task context.
    fn score(&self, candidate: &Value, task_context: &HashMap<String, String>) -> f64;
}

/// Executors attached to registered agents.
///
/// Populated at startup; looked up by the supervisor on every attempt.
#[derive(Default)]
pub struct ExecutorSet {
    inner: RwLock<HashMap<AgentId, Arc<dyn CapabilityExecutor>>>,
}

impl ExecutorSet {
    /// Create an empty executor set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an executor to an agent.
    pub fn attach(&self, agent_id: AgentId, executor: Arc<dyn CapabilityExecutor>) {
        self.inner.write().unwrap().insert(agent_id, executor);
    }

    /// Detach an agent's executor.
    pub fn detach(&self, agent_id: &AgentId) {
        self.inner.write().unwrap().remove(agent_id);
    }

    /// Look up the executor attached to an agent.
    ///
    /// # Errors
    /// Returns an error if no executor is attached.
    pub fn get(&self, agent_id: &AgentId) -> Result<Arc<dyn CapabilityExecutor>> {
        self.inner
            .read()
            .unwrap()
            .get(agent_id)
            .cloned()
            .ok_or(Error::NoExecutor { id: *agent_id })
    }

    /// Number of attached executors.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    /// Check if no executors are attached.
    pub fn is_empty(&self) -> bool {
        self.inner.read().unwrap().is_empty()
    }
}

/// Built-in executor that echoes its input back as the result payload.
///
/// Used by the CLI demo and tests; it declares whatever capabilities it is
/// constructed with and completes immediately.
pub struct EchoExecutor {
    capabilities: HashSet<Capability>,
}

impl EchoExecutor {
    /// Create an echo executor declaring the given capabilities.
    pub fn new(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self {
            capabilities: capabilities.into_iter().collect(),
        }
    }
}

#[async_trait]
impl CapabilityExecutor for EchoExecutor {
    fn capabilities(&self) -> HashSet<Capability> {
        self.capabilities.clone()
    }

    async fn execute(
        &self,
        capability: &Capability,
        payload: &Value,
        cancel: CancellationToken,
    ) -> Result<Value> {
        if cancel.is_cancelled() {
            return Err(Error::TaskCancelled);
        }
        Ok(serde_json::json!({
            "capability": capability.as_str(),
            "input": payload,
        }))
    }
}

/// Built-in scorer that checks the candidate payload is a non-empty
/// JSON object or array.
pub struct CompletenessScorer;

impl ValidationScorer for CompletenessScorer {
    fn category(&self) -> &str {
        "completeness"
    }

    fn score(&self, candidate: &Value, _task_context: &HashMap<String, String>) -> f64 {
        match candidate {
            Value::Object(map) if !map.is_empty() => 1.0,
            Value::Array(items) if !items.is_empty() => 1.0,
            Value::String(s) if !s.is_empty() => 1.0,
            Value::Null => 0.0,
            _ => 0.5,
        }
    }
}

/// Built-in scorer that checks the candidate payload parses as structured
/// JSON (object or array) rather than a bare scalar.
pub struct SchemaConformanceScorer;

impl ValidationScorer for SchemaConformanceScorer {
    fn category(&self) -> &str {
        "schema_conformance"
    }

    fn score(&self, candidate: &Value, _task_context: &HashMap<String, String>) -> f64 {
        match candidate {
            Value::Object(_) | Value::Array(_) => 1.0,
            _ => 0.0,
        }
    }
}

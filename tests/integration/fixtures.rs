//! Test fixtures for integration tests.
//!
//! Provides scripted capability executors, validation scorers, and a
//! controller harness tuned for fast test runs.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use maestro::agent::{AgentId, AgentProfile, Capability};
use maestro::config::{EngineConfig, StepDef, TemplateDef};
use maestro::error::Error;
use maestro::orchestration::OrchestrationController;
use maestro::plugin::{CapabilityExecutor, ValidationScorer};

/// Scorer that returns a fixed score for every candidate.
pub struct FixedScorer(pub f64);

impl ValidationScorer for FixedScorer {
    fn category(&self) -> &str {
        "fixed"
    }

    fn score(&self, _candidate: &Value, _ctx: &HashMap<String, String>) -> f64 {
        self.0
    }
}

/// Scorer that reads the candidate's `quality` field.
pub struct QualityScorer;

impl ValidationScorer for QualityScorer {
    fn category(&self) -> &str {
        "quality"
    }

    fn score(&self, candidate: &Value, _ctx: &HashMap<String, String>) -> f64 {
        candidate["quality"].as_f64().unwrap_or(0.0)
    }
}

/// Executor that returns a fixed payload for every capability it serves.
pub struct FixedPayloadExecutor {
    capabilities: HashSet<Capability>,
    payload: Value,
}

impl FixedPayloadExecutor {
    pub fn new(capabilities: &[&str], payload: Value) -> Arc<Self> {
        Arc::new(Self {
            capabilities: capabilities.iter().map(|c| Capability::new(*c)).collect(),
            payload,
        })
    }
}

#[async_trait]
impl CapabilityExecutor for FixedPayloadExecutor {
    fn capabilities(&self) -> HashSet<Capability> {
        self.capabilities.clone()
    }

    async fn execute(
        &self,
        _capability: &Capability,
        _payload: &Value,
        _cancel: CancellationToken,
    ) -> maestro::Result<Value> {
        Ok(self.payload.clone())
    }
}

/// Executor that stalls past the timeout for its first N calls, then
/// succeeds instantly.
pub struct SlowStartExecutor {
    capabilities: HashSet<Capability>,
    slow_calls: AtomicU32,
    stall: Duration,
    calls: AtomicU32,
}

impl SlowStartExecutor {
    pub fn new(capabilities: &[&str], slow_calls: u32, stall: Duration) -> Arc<Self> {
        Arc::new(Self {
            capabilities: capabilities.iter().map(|c| Capability::new(*c)).collect(),
            slow_calls: AtomicU32::new(slow_calls),
            stall,
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityExecutor for SlowStartExecutor {
    fn capabilities(&self) -> HashSet<Capability> {
        self.capabilities.clone()
    }

    async fn execute(
        &self,
        capability: &Capability,
        _payload: &Value,
        cancel: CancellationToken,
    ) -> maestro::Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.slow_calls.load(Ordering::SeqCst);
        if remaining > 0 {
            self.slow_calls.store(remaining - 1, Ordering::SeqCst);
            tokio::select! {
                _ = tokio::time::sleep(self.stall) => {}
                _ = cancel.cancelled() => return Err(Error::TaskCancelled),
            }
        }
        Ok(serde_json::json!({"capability": capability.as_str(), "attempt": "done"}))
    }
}

/// Executor that never finishes until cancelled.
pub struct HangingExecutor {
    capabilities: HashSet<Capability>,
}

impl HangingExecutor {
    pub fn new(capabilities: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            capabilities: capabilities.iter().map(|c| Capability::new(*c)).collect(),
        })
    }
}

#[async_trait]
impl CapabilityExecutor for HangingExecutor {
    fn capabilities(&self) -> HashSet<Capability> {
        self.capabilities.clone()
    }

    async fn execute(
        &self,
        _capability: &Capability,
        _payload: &Value,
        cancel: CancellationToken,
    ) -> maestro::Result<Value> {
        cancel.cancelled().await;
        Err(Error::TaskCancelled)
    }
}

/// Executor serving the `analyze` capability with a scripted plan.
pub struct PlanningExecutor {
    plan: Value,
}

impl PlanningExecutor {
    pub fn new(plan: Value) -> Arc<Self> {
        Arc::new(Self { plan })
    }
}

#[async_trait]
impl CapabilityExecutor for PlanningExecutor {
    fn capabilities(&self) -> HashSet<Capability> {
        [Capability::new("analyze")].into_iter().collect()
    }

    async fn execute(
        &self,
        _capability: &Capability,
        _payload: &Value,
        _cancel: CancellationToken,
    ) -> maestro::Result<Value> {
        Ok(self.plan.clone())
    }
}

/// Engine configuration tuned for fast tests: tight timeouts, short
/// backoffs, defaults elsewhere.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.default_timeout_secs = 1;
    config.backoff_base_ms = 5;
    config.backoff_cap_ms = 20;
    config
}

/// A custom template added to the config under the given keyword.
pub fn template(name: &str, keyword: &str, steps: &[(&str, &str)], parallel: bool) -> TemplateDef {
    TemplateDef {
        name: name.to_string(),
        keywords: vec![keyword.to_string()],
        steps: steps
            .iter()
            .map(|(step, capability)| StepDef {
                name: step.to_string(),
                capability: capability.to_string(),
                competitive: false,
            })
            .collect(),
        parallel,
    }
}

/// Build a controller with the given config and a single scorer.
pub fn controller_with_scorer(
    config: EngineConfig,
    scorer: Arc<dyn ValidationScorer>,
) -> Arc<OrchestrationController> {
    let (controller, _registry_events) = OrchestrationController::new(config, vec![scorer]);
    Arc::new(controller)
}

/// Build a controller that accepts every candidate (fixed score 1.0).
pub fn accepting_controller(config: EngineConfig) -> Arc<OrchestrationController> {
    controller_with_scorer(config, Arc::new(FixedScorer(1.0)))
}

/// Register an agent with the given capabilities and executor.
pub async fn add_agent(
    controller: &Arc<OrchestrationController>,
    name: &str,
    capabilities: &[&str],
    max_concurrency: usize,
    executor: Arc<dyn CapabilityExecutor>,
) -> AgentId {
    let caps: Vec<Capability> = capabilities.iter().map(|c| Capability::new(*c)).collect();
    controller
        .register_agent(AgentProfile::new(name, caps, max_concurrency), executor)
        .await
}

/// Register an agent that echoes a fixed payload for its capabilities.
pub async fn add_fixed_agent(
    controller: &Arc<OrchestrationController>,
    name: &str,
    capabilities: &[&str],
    payload: Value,
) -> AgentId {
    add_agent(
        controller,
        name,
        capabilities,
        4,
        FixedPayloadExecutor::new(capabilities, payload),
    )
    .await
}

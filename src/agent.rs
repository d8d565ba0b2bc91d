//! Agent data model for the registry.
//!
//! Agents are capability-tagged workers that execute subtasks. The registry
//! tracks each agent's declared capabilities, concurrency budget, rolling
//! success rate, and health.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a registered agent.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub Uuid);

impl AgentId {
    /// Create a new unique agent identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AgentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A tag describing one kind of work an agent can perform.
///
/// Capabilities are opaque to the engine: subtasks require one, agents
/// declare a set, and dispatch matches the two.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    /// Create a capability tag.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// The tag as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Capability {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// Health of an agent as tracked by the registry.
///
/// Quarantine is a reversible soft-disable: quarantined agents are skipped
/// by candidate lookup but never deleted, and recover on the next success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentHealth {
    /// Agent is operating normally.
    #[default]
    Healthy,
    /// Agent has accumulated failures but is still schedulable.
    Degraded,
    /// Agent is soft-disabled after a run of consecutive failures.
    Quarantined,
}

impl std::fmt::Display for AgentHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentHealth::Healthy => write!(f, "healthy"),
            AgentHealth::Degraded => write!(f, "degraded"),
            AgentHealth::Quarantined => write!(f, "quarantined"),
        }
    }
}

/// Registry record for one agent.
///
/// Mutated only through the registry, which serializes updates per agent.
/// Invariant: `current_load <= max_concurrency` at every instant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Unique identifier for this agent.
    pub id: AgentId,
    /// Human-readable name for logs and reports.
    pub name: String,
    /// The kinds of work this agent can perform.
    pub capabilities: HashSet<Capability>,
    /// Maximum number of subtasks this agent may run simultaneously.
    pub max_concurrency: usize,
    /// Number of subtasks currently running on this agent.
    pub current_load: usize,
    /// Exponentially-weighted moving average of outcomes, in [0, 1].
    pub success_rate: f64,
    /// Current health as tracked by outcome reporting.
    pub health: AgentHealth,
    /// Length of the current run of consecutive failures.
    pub consecutive_failures: u32,
    /// When the agent was registered.
    pub registered_at: DateTime<Utc>,
}

impl AgentProfile {
    /// Create a new profile with a fresh id, no load, and a neutral
    /// success rate of 1.0 (agents start fully trusted).
    pub fn new(
        name: &str,
        capabilities: impl IntoIterator<Item = Capability>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            id: AgentId::new(),
            name: name.to_string(),
            capabilities: capabilities.into_iter().collect(),
            max_concurrency,
            current_load: 0,
            success_rate: 1.0,
            health: AgentHealth::Healthy,
            consecutive_failures: 0,
            registered_at: Utc::now(),
        }
    }

    /// Check whether this agent declares the given capability.
    pub fn has_capability(&self, capability: &Capability) -> bool {
        self.capabilities.contains(capability)
    }

    /// Check whether this agent can accept another subtask right now.
    ///
    /// Quarantined agents and agents at their concurrency limit are
    /// not available.
    pub fn is_available(&self) -> bool {
        self.health != AgentHealth::Quarantined && self.current_load < self.max_concurrency
    }

    /// Fold one outcome into the rolling success rate.
    ///
    /// `new = alpha * outcome + (1 - alpha) * old`, outcome being 1.0 for
    /// success and 0.0 for failure.
    pub fn update_success_rate(&mut self, success: bool, alpha: f64) {
        let outcome = if success { 1.0 } else { 0.0 };
        self.success_rate = alpha * outcome + (1.0 - alpha) * self.success_rate;
    }
}

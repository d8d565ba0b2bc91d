//! Agent registry for candidate lookup and outcome tracking.
//!
//! The `AgentRegistry` tracks known agents, their declared capabilities,
//! load, and a rolling success-rate score. It emits events for health
//! changes via a channel.
//!
//! ## Quarantine
//!
//! Outcome reporting never deletes an agent. A run of consecutive failures
//! degrades and then quarantines it; quarantined agents are skipped by
//! candidate lookup until their next reported success, which restores
//! `Healthy`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::agent::{AgentHealth, AgentId, AgentProfile, Capability};
use crate::error::{Error, Result};
use crate::{mlog_debug, mlog_warn};

/// Default number of consecutive failures before an agent is Degraded.
pub const DEFAULT_DEGRADE_AFTER: u32 = 2;

/// Default number of consecutive failures before an agent is Quarantined.
pub const DEFAULT_QUARANTINE_AFTER: u32 = 4;

/// Default EWMA smoothing factor for success-rate updates.
pub const DEFAULT_EWMA_ALPHA: f64 = 0.2;

/// Thresholds controlling health transitions on consecutive failures.
#[derive(Debug, Clone)]
pub struct HealthPolicy {
    /// Consecutive failures before health drops to Degraded.
    pub degrade_after: u32,
    /// Consecutive failures before health drops to Quarantined.
    pub quarantine_after: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            degrade_after: DEFAULT_DEGRADE_AFTER,
            quarantine_after: DEFAULT_QUARANTINE_AFTER,
        }
    }
}

impl HealthPolicy {
    /// Create a policy with a custom quarantine threshold.
    pub fn with_quarantine_after(quarantine_after: u32) -> Self {
        Self {
            quarantine_after,
            ..Default::default()
        }
    }
}

/// Events emitted by the registry for agent lifecycle changes.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// An agent was registered.
    Registered {
        /// The registered agent.
        agent_id: AgentId,
    },
    /// An agent was deregistered.
    Deregistered {
        /// The removed agent.
        agent_id: AgentId,
    },
    /// An agent's health dropped to Degraded.
    Degraded {
        /// The degraded agent.
        agent_id: AgentId,
    },
    /// An agent's health dropped to Quarantined.
    Quarantined {
        /// The quarantined agent.
        agent_id: AgentId,
        /// Length of the failure run that triggered quarantine.
        consecutive_failures: u32,
    },
    /// A previously unhealthy agent recovered to Healthy.
    Recovered {
        /// The recovered agent.
        agent_id: AgentId,
    },
}

/// Registry of known agents.
///
/// The outer map lock is only held to insert, remove, or look up an entry;
/// every profile sits behind its own lock so outcome reporting for one
/// agent never contends with lookups for another.
pub struct AgentRegistry {
    /// Registered agents, each behind a per-agent lock.
    agents: RwLock<HashMap<AgentId, Arc<RwLock<AgentProfile>>>>,
    /// EWMA smoothing factor for success-rate updates.
    alpha: f64,
    /// Health transition thresholds.
    policy: HealthPolicy,
    /// Channel for emitting registry events.
    event_tx: mpsc::Sender<RegistryEvent>,
}

impl AgentRegistry {
    /// Create a new registry.
    ///
    /// Returns the registry and a receiver for registry events.
    pub fn new(alpha: f64, policy: HealthPolicy) -> (Self, mpsc::Receiver<RegistryEvent>) {
        let (event_tx, event_rx) = mpsc::channel(100);
        (
            Self {
                agents: RwLock::new(HashMap::new()),
                alpha,
                policy,
                event_tx,
            },
            event_rx,
        )
    }

    /// Create a registry with the default alpha and policy.
    pub fn with_defaults() -> (Self, mpsc::Receiver<RegistryEvent>) {
        Self::new(DEFAULT_EWMA_ALPHA, HealthPolicy::default())
    }

    /// Register an agent.
    ///
    /// Returns the agent's id.
    pub async fn register(&self, profile: AgentProfile) -> AgentId {
        let id = profile.id;
        mlog_debug!("registry: register agent {} ({})", id.short(), profile.name);
        self.agents
            .write()
            .unwrap()
            .insert(id, Arc::new(RwLock::new(profile)));
        let _ = self
            .event_tx
            .send(RegistryEvent::Registered { agent_id: id })
            .await;
        id
    }

    /// Deregister an agent.
    ///
    /// # Errors
    /// Returns an error if the agent is not registered.
    pub async fn deregister(&self, id: &AgentId) -> Result<()> {
        if self.agents.write().unwrap().remove(id).is_none() {
            return Err(Error::AgentNotFound { id: *id });
        }
        let _ = self
            .event_tx
            .send(RegistryEvent::Deregistered { agent_id: *id })
            .await;
        Ok(())
    }

    /// Find candidate agents for a capability.
    ///
    /// Returns agents that declare the capability, are not quarantined, and
    /// have spare concurrency, ordered by success rate descending. Ties are
    /// broken by registration time so ranking is deterministic.
    pub fn find_candidates(&self, capability: &Capability) -> Vec<AgentId> {
        let agents = self.agents.read().unwrap();
        let mut candidates: Vec<(AgentId, f64, chrono::DateTime<chrono::Utc>)> = agents
            .values()
            .filter_map(|record| {
                let profile = record.read().unwrap();
                if profile.has_capability(capability) && profile.is_available() {
                    Some((profile.id, profile.success_rate, profile.registered_at))
                } else {
                    None
                }
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.2.cmp(&b.2))
        });

        candidates.into_iter().map(|(id, _, _)| id).collect()
    }

    /// Try to reserve one concurrency slot on an agent.
    ///
    /// Returns `true` if a slot was reserved. Never lets `current_load`
    /// exceed `max_concurrency`.
    ///
    /// # Errors
    /// Returns an error if the agent is not registered.
    pub fn try_acquire(&self, id: &AgentId) -> Result<bool> {
        let record = self.record(id)?;
        let mut profile = record.write().unwrap();
        if profile.is_available() {
            profile.current_load += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Release a previously reserved concurrency slot.
    pub fn release(&self, id: &AgentId) {
        if let Ok(record) = self.record(id) {
            let mut profile = record.write().unwrap();
            profile.current_load = profile.current_load.saturating_sub(1);
        }
    }

    /// Report the outcome of one execution attempt.
    ///
    /// Updates the success-rate EWMA and the consecutive-failure run, and
    /// applies the health policy. Never removes the agent.
    ///
    /// # Errors
    /// Returns an error if the agent is not registered.
    pub async fn report_outcome(&self, id: &AgentId, success: bool, latency_ms: u64) -> Result<()> {
        let record = self.record(id)?;

        let event = {
            let mut profile = record.write().unwrap();
            profile.update_success_rate(success, self.alpha);

            if success {
                profile.consecutive_failures = 0;
                if profile.health != AgentHealth::Healthy {
                    profile.health = AgentHealth::Healthy;
                    Some(RegistryEvent::Recovered { agent_id: *id })
                } else {
                    None
                }
            } else {
                profile.consecutive_failures += 1;
                if profile.consecutive_failures >= self.policy.quarantine_after
                    && profile.health != AgentHealth::Quarantined
                {
                    profile.health = AgentHealth::Quarantined;
                    Some(RegistryEvent::Quarantined {
                        agent_id: *id,
                        consecutive_failures: profile.consecutive_failures,
                    })
                } else if profile.consecutive_failures >= self.policy.degrade_after
                    && profile.health == AgentHealth::Healthy
                {
                    profile.health = AgentHealth::Degraded;
                    Some(RegistryEvent::Degraded { agent_id: *id })
                } else {
                    None
                }
            }
        };

        mlog_debug!(
            "registry: outcome for {} success={} latency_ms={}",
            id.short(),
            success,
            latency_ms
        );

        if let Some(event) = event {
            if let RegistryEvent::Quarantined {
                consecutive_failures,
                ..
            } = &event
            {
                mlog_warn!(
                    "registry: agent {} quarantined after {} consecutive failures",
                    id.short(),
                    consecutive_failures
                );
            }
            let _ = self.event_tx.send(event).await;
        }

        Ok(())
    }

    /// Get a cloned snapshot of an agent's profile.
    pub fn profile(&self, id: &AgentId) -> Option<AgentProfile> {
        self.agents
            .read()
            .unwrap()
            .get(id)
            .map(|r| r.read().unwrap().clone())
    }

    /// Get cloned snapshots of every registered agent.
    pub fn profiles(&self) -> Vec<AgentProfile> {
        self.agents
            .read()
            .unwrap()
            .values()
            .map(|r| r.read().unwrap().clone())
            .collect()
    }

    /// Get the number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.read().unwrap().len()
    }

    /// Check if no agents are registered.
    pub fn is_empty(&self) -> bool {
        self.agents.read().unwrap().is_empty()
    }

    /// Wait until no agent holds a concurrency slot.
    ///
    /// Used at teardown after cancellation has been propagated; in-flight
    /// attempts release their slots as they observe the cancel signal.
    pub async fn drain(&self) {
        loop {
            let busy = self
                .agents
                .read()
                .unwrap()
                .values()
                .any(|r| r.read().unwrap().current_load > 0);
            if !busy {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn record(&self, id: &AgentId) -> Result<Arc<RwLock<AgentProfile>>> {
        self.agents
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or(Error::AgentNotFound { id: *id })
    }
}

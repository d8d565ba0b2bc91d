//! Engine configuration.
//!
//! All tuning knobs for the orchestration pipeline live here and load from
//! `~/.maestro/maestro.toml`, falling back to defaults when the file is
//! missing. Custom decomposition templates can also be declared in the
//! same file.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{mlog_debug, Error, Result};

/// A template step as declared in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDef {
    /// Human-readable step name.
    pub name: String,
    /// Capability an agent must declare to run the step.
    pub capability: String,
    /// Whether the step runs in competitive coordination mode.
    #[serde(default)]
    pub competitive: bool,
}

/// A decomposition template as declared in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDef {
    /// Template name.
    pub name: String,
    /// Keywords matched (whole-word, case-insensitive) against descriptions.
    pub keywords: Vec<String>,
    /// Ordered steps.
    pub steps: Vec<StepDef>,
    /// Independent steps (true) versus a sequential chain (false).
    #[serde(default)]
    pub parallel: bool,
}

/// Engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// EWMA smoothing factor for agent success rates.
    pub ewma_alpha: f64,
    /// Minimum aggregate score for a candidate result to be accepted.
    pub accept_threshold: f64,
    /// Per-category validation weights; categories absent here weigh 1.0.
    pub category_weights: HashMap<String, f64>,
    /// Maximum execution attempts per subtask.
    pub retry_limit: u32,
    /// Default per-subtask execution timeout, in seconds.
    pub default_timeout_secs: u64,
    /// Per-capability timeout overrides, in seconds.
    pub capability_timeout_secs: HashMap<String, u64>,
    /// Initial scheduler backoff when no candidate agent is available, in ms.
    pub backoff_base_ms: u64,
    /// Backoff ceiling, in ms.
    pub backoff_cap_ms: u64,
    /// Global cap on in-flight subtasks per task.
    pub max_in_flight: usize,
    /// Consecutive failures before an agent is Degraded.
    pub degrade_after: u32,
    /// Consecutive failures before an agent is Quarantined.
    pub quarantine_after: u32,
    /// Maximum hierarchical decomposition depth.
    pub max_decomposition_depth: u32,
    /// Number of agents per round in competitive coordination mode.
    pub competitive_width: usize,
    /// Directory for task snapshots; defaults to `~/.maestro/state`.
    pub state_dir: Option<String>,
    /// Extra decomposition templates; appended to the built-in set.
    pub templates: Vec<TemplateDef>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ewma_alpha: 0.2,
            accept_threshold: 0.85,
            category_weights: HashMap::new(),
            retry_limit: 3,
            default_timeout_secs: 30,
            capability_timeout_secs: HashMap::new(),
            backoff_base_ms: 200,
            backoff_cap_ms: 5_000,
            max_in_flight: 50,
            degrade_after: 2,
            quarantine_after: 4,
            max_decomposition_depth: 2,
            competitive_width: 2,
            state_dir: None,
            templates: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn maestro_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".maestro"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::maestro_dir()?.join("maestro.toml"))
    }

    /// Default directory for task snapshots.
    pub fn default_state_dir() -> Result<PathBuf> {
        Ok(Self::maestro_dir()?.join("state"))
    }

    /// The default per-subtask timeout as a Duration.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// The timeout for a specific capability, falling back to the default.
    pub fn timeout_for(&self, capability: &str) -> Duration {
        self.capability_timeout_secs
            .get(capability)
            .map(|secs| Duration::from_secs(*secs))
            .unwrap_or_else(|| self.default_timeout())
    }

    /// Resolved state directory.
    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Self::default_state_dir(),
        }
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        mlog_debug!("EngineConfig::load path={}", path.display());
        if !path.exists() {
            mlog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        mlog_debug!(
            "Config loaded: retry_limit={} accept_threshold={} max_in_flight={}",
            config.retry_limit,
            config.accept_threshold,
            config.max_in_flight
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let dir = Self::maestro_dir()?;
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        mlog_debug!("Config saved to {}", path.display());
        Ok(())
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

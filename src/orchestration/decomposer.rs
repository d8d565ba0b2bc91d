//! Task decomposer: splits a task description into a subtask DAG.
//!
//! Three strategies:
//! - *Sequential*: the description matches a template whose steps form an
//!   ordered chain; subtask i depends on subtask i-1.
//! - *Parallel*: the description matches a template with independent steps.
//! - *Hierarchical*: no template matches; a single `analyze` subtask is
//!   emitted, and its accepted output drives a second decomposition pass,
//!   bounded by a maximum depth to prevent unbounded expansion.
//!
//! Decomposition is deterministic for a fixed description and context.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use crate::agent::Capability;
use crate::config::EngineConfig;
use crate::core::dag::{DependencyKind, SubtaskDag};
use crate::core::subtask::{CoordinationMode, Subtask, SubtaskId};
use crate::error::{Error, Result};
use crate::mlog_debug;
use crate::orchestration::scheduler::SubtaskExpander;
use crate::orchestration::templates::{TaskTemplate, TemplateLibrary};
use crate::task::{Strategy, Task};

/// Capability tag of the hierarchical analysis subtask.
pub const ANALYZE_CAPABILITY: &str = "analyze";

/// Default maximum number of decomposition passes.
pub const DEFAULT_MAX_DEPTH: u32 = 2;

/// Result of the first decomposition pass.
#[derive(Debug)]
pub struct Decomposition {
    /// The strategy that was selected.
    pub strategy: Strategy,
    /// The matched template's name, when a template was used.
    pub template: Option<String>,
    /// The produced subtask DAG.
    pub dag: SubtaskDag,
}

/// Splits tasks into subtask DAGs.
pub struct Decomposer {
    /// Templates matched against task descriptions.
    library: TemplateLibrary,
    /// Maximum number of decomposition passes.
    max_depth: u32,
    /// Width applied to competitive template steps.
    competitive_width: usize,
    /// Pass depth per pending analysis subtask.
    analysis_depth: Mutex<HashMap<SubtaskId, u32>>,
}

impl Decomposer {
    /// Create a decomposer.
    pub fn new(library: TemplateLibrary, max_depth: u32, competitive_width: usize) -> Self {
        Self {
            library,
            max_depth,
            competitive_width,
            analysis_depth: Mutex::new(HashMap::new()),
        }
    }

    /// Create a decomposer from the engine configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            TemplateLibrary::from_config(&config.templates),
            config.max_decomposition_depth,
            config.competitive_width,
        )
    }

    /// Produce the first-pass subtask DAG for a task.
    ///
    /// Template matching is keyword based; the template with the most
    /// matched keywords wins. Without a match (or with a Hierarchical
    /// strategy hint) a single analysis subtask is emitted instead.
    ///
    /// # Errors
    /// Returns `UndecomposableTask` if a matched template has no steps.
    pub fn decompose(&self, task: &Task) -> Result<Decomposition> {
        let force_hierarchical = task.strategy_hint == Some(Strategy::Hierarchical);
        let template = if force_hierarchical {
            None
        } else {
            self.library.best_match(&task.description)
        };

        match template {
            Some(template) => {
                if template.steps.is_empty() {
                    return Err(Error::UndecomposableTask(format!(
                        "template {} has no steps",
                        template.name
                    )));
                }
                // A Sequential/Parallel hint overrides the template's own shape
                let parallel = match task.strategy_hint {
                    Some(Strategy::Parallel) => true,
                    Some(Strategy::Sequential) => false,
                    _ => template.parallel,
                };
                let strategy = if parallel {
                    Strategy::Parallel
                } else {
                    Strategy::Sequential
                };
                mlog_debug!(
                    "decomposer: task {} matched template {} ({})",
                    task.id.short(),
                    template.name,
                    strategy
                );
                let dag = self.build_from_template(task, template, parallel)?;
                Ok(Decomposition {
                    strategy,
                    template: Some(template.name.clone()),
                    dag,
                })
            }
            None => {
                mlog_debug!(
                    "decomposer: task {} has no template match, using hierarchical fallback",
                    task.id.short()
                );
                let mut dag = SubtaskDag::new();
                let analysis = self.analysis_subtask(task);
                self.analysis_depth
                    .lock()
                    .unwrap()
                    .insert(analysis.id, 1);
                dag.add_subtask(analysis);
                Ok(Decomposition {
                    strategy: Strategy::Hierarchical,
                    template: None,
                    dag,
                })
            }
        }
    }

    fn build_from_template(
        &self,
        task: &Task,
        template: &TaskTemplate,
        parallel: bool,
    ) -> Result<SubtaskDag> {
        let mut dag = SubtaskDag::new();
        let mut previous: Option<SubtaskId> = None;

        for step in &template.steps {
            let mut subtask = Subtask::new(
                task.id,
                &step.name,
                step.capability.clone(),
                serde_json::json!({
                    "description": task.description,
                    "step": step.name,
                    "context": task.context,
                }),
            );
            if step.competitive {
                subtask = subtask.with_coordination(CoordinationMode::Competitive {
                    width: self.competitive_width,
                });
            }
            let id = subtask.id;
            dag.add_subtask(subtask);
            if !parallel {
                if let Some(previous) = previous {
                    dag.add_dependency(&previous, &id, DependencyKind::Ordering)?;
                }
            }
            previous = Some(id);
        }

        Ok(dag)
    }

    fn analysis_subtask(&self, task: &Task) -> Subtask {
        Subtask::new(
            task.id,
            "analyze",
            Capability::new(ANALYZE_CAPABILITY),
            serde_json::json!({
                "description": task.description,
                "context": task.context,
            }),
        )
    }

    /// Parse an accepted analysis payload into (name, capability, payload)
    /// entries.
    ///
    /// The contract is a JSON array of objects, each carrying a
    /// `capability` string, an optional `payload`, and an optional `name`.
    fn parse_analysis(payload: &Value) -> Result<Vec<(String, Capability, Value)>> {
        let entries = payload.as_array().ok_or_else(|| {
            Error::UndecomposableTask(
                "analysis output is not a JSON array of subtask entries".to_string(),
            )
        })?;

        if entries.is_empty() {
            return Err(Error::UndecomposableTask(
                "analysis produced no subtasks".to_string(),
            ));
        }

        let mut parsed = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let capability = entry
                .get("capability")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    Error::UndecomposableTask(format!(
                        "analysis entry {} is missing a capability",
                        i
                    ))
                })?;
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("analysis-step-{}", i + 1));
            let step_payload = entry.get("payload").cloned().unwrap_or(Value::Null);
            parsed.push((name, Capability::new(capability), step_payload));
        }

        Ok(parsed)
    }
}

impl SubtaskExpander for Decomposer {
    /// Second decomposition pass.
    ///
    /// When the accepted subtask is a pending analysis node within the
    /// depth bound, its payload is parsed into concrete subtasks that are
    /// appended to the DAG, each depending on the analysis via a data-flow
    /// edge. Nested `analyze` children are registered for a further pass
    /// only while the depth bound allows.
    fn expand_accepted(
        &self,
        dag: &mut SubtaskDag,
        subtask: &Subtask,
        payload: &Value,
    ) -> Result<Vec<SubtaskId>> {
        let depth = match self.analysis_depth.lock().unwrap().remove(&subtask.id) {
            Some(depth) => depth,
            None => return Ok(Vec::new()),
        };
        if depth >= self.max_depth {
            mlog_debug!(
                "decomposer: analysis {} at depth {} not expanded (max {})",
                subtask.id.short(),
                depth,
                self.max_depth
            );
            return Ok(Vec::new());
        }

        let entries = Self::parse_analysis(payload)?;
        let mut new_ids = Vec::with_capacity(entries.len());

        for (name, capability, step_payload) in entries {
            let is_nested_analysis = capability.as_str() == ANALYZE_CAPABILITY;
            let child = Subtask::new(subtask.task_id, &name, capability, step_payload);
            let child_id = child.id;
            dag.add_subtask(child);
            dag.add_dependency(&subtask.id, &child_id, DependencyKind::DataFlow)?;
            if is_nested_analysis {
                self.analysis_depth
                    .lock()
                    .unwrap()
                    .insert(child_id, depth + 1);
            }
            new_ids.push(child_id);
        }

        mlog_debug!(
            "decomposer: expanded analysis {} into {} subtasks (pass {})",
            subtask.id.short(),
            new_ids.len(),
            depth + 1
        );
        Ok(new_ids)
    }
}

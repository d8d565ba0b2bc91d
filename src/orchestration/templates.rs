//! Decomposition templates and keyword matching.
//!
//! Templates describe known task shapes as ordered capability lists. The
//! decomposer matches a task description against every template's keywords
//! (whole-word, case-insensitive) and picks the template with the most
//! matched keywords; no match at all falls through to the hierarchical
//! strategy.

use regex::Regex;

use crate::agent::Capability;
use crate::config::TemplateDef;

/// One step of a template.
#[derive(Debug, Clone)]
pub struct StepSpec {
    /// Human-readable step name.
    pub name: String,
    /// Capability an agent must declare to run this step.
    pub capability: Capability,
    /// Whether the step runs in competitive coordination mode.
    pub competitive: bool,
}

impl StepSpec {
    /// Create a non-competitive step.
    pub fn new(name: &str, capability: &str) -> Self {
        Self {
            name: name.to_string(),
            capability: Capability::new(capability),
            competitive: false,
        }
    }

    /// Mark the step as competitive.
    pub fn competitive(mut self) -> Self {
        self.competitive = true;
        self
    }
}

/// A known task shape: keywords to match and steps to emit.
#[derive(Debug, Clone)]
pub struct TaskTemplate {
    /// Template name, used in logs and subtask names.
    pub name: String,
    /// Keywords matched against task descriptions.
    pub keywords: Vec<String>,
    /// Ordered steps.
    pub steps: Vec<StepSpec>,
    /// Independent steps (true) versus a sequential chain (false).
    pub parallel: bool,
    /// Compiled whole-word patterns, one per keyword.
    patterns: Vec<Regex>,
}

impl TaskTemplate {
    /// Create a template, compiling one whole-word pattern per keyword.
    pub fn new(name: &str, keywords: &[&str], steps: Vec<StepSpec>, parallel: bool) -> Self {
        let keywords: Vec<String> = keywords.iter().map(|k| k.to_string()).collect();
        let patterns = compile_keywords(&keywords);
        Self {
            name: name.to_string(),
            keywords,
            steps,
            parallel,
            patterns,
        }
    }

    /// Build a template from its configuration form.
    pub fn from_def(def: &TemplateDef) -> Self {
        let patterns = compile_keywords(&def.keywords);
        Self {
            name: def.name.clone(),
            keywords: def.keywords.clone(),
            steps: def
                .steps
                .iter()
                .map(|s| {
                    let step = StepSpec::new(&s.name, &s.capability);
                    if s.competitive {
                        step.competitive()
                    } else {
                        step
                    }
                })
                .collect(),
            parallel: def.parallel,
            patterns,
        }
    }

    /// Count how many of this template's keywords appear in the description.
    ///
    /// Matching is whole-word and case-insensitive; each keyword counts at
    /// most once regardless of repetitions.
    pub fn match_score(&self, description: &str) -> usize {
        self.patterns
            .iter()
            .filter(|p| p.is_match(description))
            .count()
    }
}

fn compile_keywords(keywords: &[String]) -> Vec<Regex> {
    keywords
        .iter()
        .filter_map(|kw| Regex::new(&format!(r"(?i)\b{}\b", regex::escape(kw))).ok())
        .collect()
}

/// The set of templates the decomposer matches against.
#[derive(Debug, Clone)]
pub struct TemplateLibrary {
    templates: Vec<TaskTemplate>,
}

impl TemplateLibrary {
    /// Create a library from an explicit template list.
    pub fn with_templates(templates: Vec<TaskTemplate>) -> Self {
        Self { templates }
    }

    /// The built-in template set.
    pub fn builtin() -> Self {
        Self::with_templates(vec![
            TaskTemplate::new(
                "implement-feature",
                &["implement", "feature", "build", "add"],
                vec![
                    StepSpec::new("design", "design"),
                    StepSpec::new("generate-code", "codegen"),
                    StepSpec::new("generate-tests", "testgen"),
                ],
                false,
            ),
            TaskTemplate::new(
                "audit-codebase",
                &["audit", "review", "scan", "inspect"],
                vec![
                    StepSpec::new("security-scan", "security"),
                    StepSpec::new("static-analysis", "analysis"),
                ],
                true,
            ),
            TaskTemplate::new(
                "write-documentation",
                &["document", "documentation", "describe", "docs"],
                vec![StepSpec::new("generate-docs", "docgen")],
                false,
            ),
        ])
    }

    /// The built-in set extended with templates from configuration.
    pub fn from_config(defs: &[TemplateDef]) -> Self {
        let mut library = Self::builtin();
        library
            .templates
            .extend(defs.iter().map(TaskTemplate::from_def));
        library
    }

    /// All templates, in matching priority order.
    pub fn templates(&self) -> &[TaskTemplate] {
        &self.templates
    }

    /// Find the template with the most matched keywords.
    ///
    /// Returns `None` when no template matches any keyword. Ties are broken
    /// by library order, so selection is deterministic for a fixed
    /// description.
    pub fn best_match(&self, description: &str) -> Option<&TaskTemplate> {
        let mut best: Option<(&TaskTemplate, usize)> = None;
        for template in &self.templates {
            let score = template.match_score(description);
            if score == 0 {
                continue;
            }
            match best {
                Some((_, best_score)) if best_score >= score => {}
                _ => best = Some((template, score)),
            }
        }
        best.map(|(t, _)| t)
    }
}

impl Default for TemplateLibrary {
    fn default() -> Self {
        Self::builtin()
    }
}

//! Step runtime — per-run execution state.
//!
//! A [`Runtime`] owns one run's step sequence, its cursor, and the state
//! map of named step outputs. It resolves typed parameters into concrete
//! values and records outputs under their keys; it does not invoke tools
//! itself (that is the runner's job).

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::plan::{ParamValue, Step};

/// Execution state for a single workflow run.
#[derive(Debug)]
pub struct Runtime {
    steps: Vec<Step>,
    state: HashMap<String, Value>,
    cursor: usize,
}

impl Runtime {
    /// Create a runtime positioned at the first step.
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            state: HashMap::new(),
            cursor: 0,
        }
    }

    /// The step the cursor points at, or `None` when the run is complete.
    pub fn current_step(&self) -> Option<&Step> {
        self.steps.get(self.cursor)
    }

    /// Whether every step has been passed over.
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.steps.len()
    }

    /// All steps in this run, in order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The named outputs recorded so far.
    pub fn state(&self) -> &HashMap<String, Value> {
        &self.state
    }

    /// Resolve a step's parameters into concrete values.
    ///
    /// Literals pass through unchanged; references are replaced with the
    /// referenced output's current contents. A reference to a key that is
    /// not in the state map is fatal for the run.
    pub fn resolve_params(&self, step: &Step) -> Result<BTreeMap<String, Value>> {
        let mut resolved = BTreeMap::new();
        for (name, value) in &step.params {
            let concrete = match value {
                ParamValue::Literal(v) => v.clone(),
                ParamValue::Reference(key) => self
                    .state
                    .get(key)
                    .cloned()
                    .ok_or_else(|| EngineError::UnresolvedReference {
                        step_id: step.id,
                        name: key.clone(),
                    })?,
            };
            resolved.insert(name.clone(), concrete);
        }
        Ok(resolved)
    }

    /// Record a step's output under its key. Steps without an output key
    /// store nothing.
    pub fn store_result(&mut self, step: &Step, output: Value) {
        if let Some(key) = &step.output_key {
            self.state.insert(key.clone(), output);
        }
    }

    /// A human-readable preview of the current step with parameters
    /// resolved, for approval prompts.
    pub fn preview_step(&self, step: &Step) -> Result<String> {
        let resolved = self.resolve_params(step)?;
        let mut parts = Vec::with_capacity(resolved.len());
        for (name, value) in &resolved {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            parts.push(format!("{name}={rendered}"));
        }
        Ok(format!(
            "step {}: {} [{}] ({})",
            step.id,
            step.tool,
            parts.join(", "),
            step.description
        ))
    }

    /// Move the cursor to the next step.
    pub fn advance(&mut self) {
        if self.cursor < self.steps.len() {
            self.cursor += 1;
        }
    }
}

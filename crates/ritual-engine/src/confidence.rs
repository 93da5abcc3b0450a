//! Per-step confidence tracking and graduation.
//!
//! Every step carries a score in `[0.0, 1.0]` that moves with user
//! feedback: approvals raise it, corrections lower it, skips lower it
//! hard. A step at or above [`AUTONOMY_THRESHOLD`] runs without asking.
//! A workflow whose aggregate score, run count, and recent correction
//! history all clear the bar is offered for full graduation.
//!
//! The transition arithmetic lives in free functions so it can be tested
//! without a database; [`ConfidenceTracker`] wires those functions to the
//! workflow and correction stores.

use chrono::Utc;
use ritual_store::{CorrectionStore, WorkflowStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::error::{EngineError, Result};

/// Steps at or above this score execute without approval.
pub const AUTONOMY_THRESHOLD: f64 = 0.80;

/// Minimum completed runs before a workflow may graduate.
pub const MIN_GRADUATION_RUNS: i64 = 3;

/// Corrections within this window block graduation.
const RECENT_WINDOW_SECS: i64 = 7 * 86_400;

/// Minimum occurrences before a recurring correction becomes a pattern.
const MIN_PATTERN_SUPPORT: usize = 3;

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Score after the user approves a step's proposed action.
pub fn on_approval(confidence: f64) -> f64 {
    (confidence + 0.2).clamp(0.0, 1.0)
}

/// Score after the user corrects a step's parameters or output.
pub fn on_correction(confidence: f64) -> f64 {
    (confidence - 0.3).clamp(0.0, 1.0)
}

/// Score after the user skips a step outright.
pub fn on_skip(confidence: f64) -> f64 {
    (confidence - 0.5).clamp(0.0, 1.0)
}

/// Whether a score clears the autonomy bar.
pub fn is_autonomous(confidence: f64) -> bool {
    confidence >= AUTONOMY_THRESHOLD
}

/// Graduation predicate over a workflow's aggregate state.
pub fn ready_for_graduation(
    aggregate_confidence: f64,
    run_count: i64,
    recent_corrections: i64,
) -> bool {
    aggregate_confidence >= AUTONOMY_THRESHOLD
        && run_count >= MIN_GRADUATION_RUNS
        && recent_corrections == 0
}

// ---------------------------------------------------------------------------
// Pattern inference
// ---------------------------------------------------------------------------

/// A recurring correction the user keeps making, suggested as a
/// permanent rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionPattern {
    /// What the corrections have in common, e.g. `*.pdf` or a shared word.
    pub pattern: String,
    /// Suggested rule kind: `filter` for output corrections, `replace`
    /// for parameter edits.
    pub action: String,
    /// How many corrections share this feature.
    pub support: usize,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Applies feedback transitions and persists them.
#[derive(Clone)]
pub struct ConfidenceTracker {
    workflows: WorkflowStore,
    corrections: CorrectionStore,
}

impl ConfidenceTracker {
    /// Create a tracker over the given stores.
    pub fn new(workflows: WorkflowStore, corrections: CorrectionStore) -> Self {
        Self {
            workflows,
            corrections,
        }
    }

    /// Record an approval for a step and return the step's new score.
    #[instrument(skip(self))]
    pub async fn approve(&self, workflow_id: &str, step_id: u32) -> Result<f64> {
        let current = self.step_confidence(workflow_id, step_id).await?;
        let updated = on_approval(current);
        self.persist(workflow_id, step_id, updated).await?;
        debug!(workflow_id, step_id, confidence = updated, "step approved");
        Ok(updated)
    }

    /// Record a correction: append it to the history, then lower the
    /// step's score. Returns the new score.
    #[instrument(skip(self, original_value, corrected_value))]
    pub async fn correct(
        &self,
        workflow_id: &str,
        step_id: u32,
        correction_type: &str,
        original_value: &str,
        corrected_value: &str,
    ) -> Result<f64> {
        self.corrections
            .append(
                workflow_id,
                step_id,
                correction_type,
                original_value,
                corrected_value,
            )
            .await?;

        let current = self.step_confidence(workflow_id, step_id).await?;
        let updated = on_correction(current);
        self.persist(workflow_id, step_id, updated).await?;
        info!(workflow_id, step_id, confidence = updated, "step corrected");
        Ok(updated)
    }

    /// Record a skip and return the step's new score.
    #[instrument(skip(self))]
    pub async fn skip(&self, workflow_id: &str, step_id: u32) -> Result<f64> {
        let current = self.step_confidence(workflow_id, step_id).await?;
        let updated = on_skip(current);
        self.persist(workflow_id, step_id, updated).await?;
        info!(workflow_id, step_id, confidence = updated, "step skipped");
        Ok(updated)
    }

    /// Whether a step currently clears the autonomy bar.
    pub async fn is_step_autonomous(&self, workflow_id: &str, step_id: u32) -> Result<bool> {
        Ok(is_autonomous(
            self.step_confidence(workflow_id, step_id).await?,
        ))
    }

    /// Look for recurring corrections on a step.
    ///
    /// Each correction is reduced to a feature of the value the user
    /// keeps correcting: the original value's file extension when it has
    /// one, otherwise its longest word of at least four characters.
    /// Features shared by [`MIN_PATTERN_SUPPORT`] or more corrections of
    /// the same kind become suggestions.
    #[instrument(skip(self))]
    pub async fn infer_patterns(
        &self,
        workflow_id: &str,
        step_id: u32,
    ) -> Result<Vec<CorrectionPattern>> {
        let history = self.corrections.list_for_step(workflow_id, step_id).await?;

        let mut counts: std::collections::BTreeMap<(String, String), usize> =
            std::collections::BTreeMap::new();
        for correction in &history {
            let Some(feature) = extract_feature(&correction.original_value) else {
                continue;
            };
            let action = action_for(&correction.correction_type);
            *counts.entry((feature, action.to_string())).or_default() += 1;
        }

        let patterns: Vec<CorrectionPattern> = counts
            .into_iter()
            .filter(|(_, support)| *support >= MIN_PATTERN_SUPPORT)
            .map(|((pattern, action), support)| CorrectionPattern {
                pattern,
                action,
                support,
            })
            .collect();

        if !patterns.is_empty() {
            info!(
                workflow_id,
                step_id,
                patterns = patterns.len(),
                "recurring corrections detected"
            );
        }
        Ok(patterns)
    }

    /// Whether a workflow is ready to run fully autonomously: aggregate
    /// score at the bar, enough completed runs, and no corrections in
    /// the last seven days.
    #[instrument(skip(self))]
    pub async fn workflow_ready_for_graduation(&self, workflow_id: &str) -> Result<bool> {
        let workflow = self
            .workflows
            .get(workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })?;

        let since = Utc::now().timestamp() - RECENT_WINDOW_SECS;
        let mut recent = 0;
        for step_index in 0..workflow.step_confidence.len() {
            recent += self
                .corrections
                .count_recent(workflow_id, step_index as u32 + 1, since)
                .await?;
        }

        Ok(ready_for_graduation(
            workflow.confidence,
            workflow.run_count,
            recent,
        ))
    }

    async fn step_confidence(&self, workflow_id: &str, step_id: u32) -> Result<f64> {
        let workflow = self
            .workflows
            .get(workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })?;
        let index = step_index(step_id)?;
        workflow
            .step_confidence
            .get(index)
            .copied()
            .ok_or_else(|| {
                ritual_store::StoreError::InvalidArgument(format!(
                    "step {step_id} out of range for workflow {workflow_id}"
                ))
                .into()
            })
    }

    async fn persist(&self, workflow_id: &str, step_id: u32, value: f64) -> Result<()> {
        let index = step_index(step_id)?;
        self.workflows
            .set_step_confidence(workflow_id, index, value)
            .await?;
        self.workflows.recompute_aggregate(workflow_id).await?;
        Ok(())
    }
}

// Step ids are 1-based in plans; confidence slots are 0-based.
fn step_index(step_id: u32) -> Result<usize> {
    if step_id == 0 {
        return Err(
            ritual_store::StoreError::InvalidArgument("step ids start at 1".into()).into(),
        );
    }
    Ok(step_id as usize - 1)
}

fn action_for(correction_type: &str) -> &'static str {
    match correction_type {
        "param_edit" => "replace",
        _ => "filter",
    }
}

/// Reduce a correction's original value to a comparable feature.
fn extract_feature(value: &str) -> Option<String> {
    // File extension wins: "report.PDF" and "invoice.pdf" share "*.pdf".
    for token in value.split_whitespace() {
        if let Some((stem, ext)) = token.rsplit_once('.')
            && !stem.is_empty()
            && !ext.is_empty()
            && ext.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Some(format!("*.{}", ext.to_ascii_lowercase()));
        }
    }
    value
        .split_whitespace()
        .filter(|t| t.chars().count() >= 4)
        .max_by_key(|t| t.chars().count())
        .map(|t| t.to_ascii_lowercase())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Workflow run driver.
//!
//! [`WorkflowRunner`] executes one workflow end to end: it loads the
//! stored plan, walks the steps through a [`Runtime`], gates low-confidence
//! steps behind an [`ApprovalHandler`], retries transient tool failures,
//! and seals a run record with an event log when the walk ends.
//!
//! Failure semantics per step:
//! - retryable failures consume the retry budget, then fail the step
//! - a non-critical failure is logged and the run continues
//! - a critical failure seals the run as `failed`
//!
//! Skipping a step cascades: later steps that reference the skipped
//! step's output key are skipped too, without consulting the user. A run
//! that finishes with only skipped or non-critical steps seals as
//! `completed`.
//!
//! Approval and correction feedback only moves confidence once the step
//! has actually completed; a step that aborts after approval keeps its
//! score.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use ritual_store::{RunStatus, RunStore, StoredRun, WorkflowStore};
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::confidence::ConfidenceTracker;
use crate::error::{EngineError, Result};
use crate::executor::ToolExecutor;
use crate::plan::Step;
use crate::recovery::{ErrorClass, ErrorRecovery, RetryPolicy, classify};
use crate::runtime::Runtime;

/// What the user decided about a proposed step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepDecision {
    /// Run the step as proposed.
    Approve,
    /// Replace one parameter value, then run the step.
    Correct { field: String, value: Value },
    /// Do not run the step; the run continues without its output.
    Skip,
}

/// Presents a step preview to the user and returns their decision.
///
/// Only consulted for steps below the autonomy threshold.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn review(&self, preview: &str, step: &Step) -> StepDecision;
}

/// Executes workflows against the stores and a tool executor.
pub struct WorkflowRunner {
    workflows: WorkflowStore,
    runs: RunStore,
    tracker: ConfidenceTracker,
    executor: Arc<dyn ToolExecutor>,
    policy: RetryPolicy,
}

impl WorkflowRunner {
    /// Create a runner with the default retry policy.
    pub fn new(
        workflows: WorkflowStore,
        runs: RunStore,
        tracker: ConfidenceTracker,
        executor: Arc<dyn ToolExecutor>,
    ) -> Self {
        Self {
            workflows,
            runs,
            tracker,
            executor,
            policy: RetryPolicy::default(),
        }
    }

    /// Override the per-step retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Execute one full run of a workflow and return the sealed record.
    #[instrument(skip(self, handler))]
    pub async fn run(
        &self,
        workflow_id: &str,
        handler: &dyn ApprovalHandler,
    ) -> Result<StoredRun> {
        let workflow = self
            .workflows
            .get(workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })?;
        let steps: Vec<Step> = serde_json::from_value(workflow.steps.clone())?;

        let run_id = self.runs.start(workflow_id).await?;
        info!(workflow_id, run_id = %run_id, steps = steps.len(), "run started");

        let mut runtime = Runtime::new(steps);
        let mut log: Vec<Value> = Vec::new();
        // Output keys whose producer was skipped; references to them
        // cascade the skip instead of failing the run.
        let mut skipped_keys: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();

        loop {
            let Some(step) = runtime.current_step().cloned() else {
                break;
            };

            // A step depending on a skipped producer can never resolve;
            // skip it too, before resolving or asking the user.
            if step
                .params
                .values()
                .filter_map(crate::plan::ParamValue::as_reference)
                .any(|name| skipped_keys.contains(name))
            {
                if let Some(key) = &step.output_key {
                    skipped_keys.insert(key.clone());
                }
                log.push(json!({
                    "event": "step_skipped",
                    "step_id": step.id,
                    "tool": step.tool,
                    "cascade": true,
                }));
                runtime.advance();
                continue;
            }

            let mut params = match runtime.resolve_params(&step) {
                Ok(params) => params,
                Err(error) => {
                    log.push(json!({
                        "event": "run_failed",
                        "step_id": step.id,
                        "error": error.to_string(),
                    }));
                    return self.seal(workflow_id, &run_id, RunStatus::Failed, None, log).await;
                }
            };

            // Confidence feedback is deferred until the step actually
            // completes; an aborted step must not move its score.
            let mut feedback = None;
            let autonomous = self.tracker.is_step_autonomous(workflow_id, step.id).await?;
            if !autonomous {
                let preview = runtime.preview_step(&step)?;
                match handler.review(&preview, &step).await {
                    StepDecision::Approve => {
                        feedback = Some(Feedback::Approved);
                    }
                    StepDecision::Correct { field, value } => {
                        let original = params
                            .get(&field)
                            .map(render_value)
                            .unwrap_or_default();
                        feedback = Some(Feedback::Corrected {
                            original,
                            corrected: render_value(&value),
                        });
                        params.insert(field, value);
                    }
                    StepDecision::Skip => {
                        self.tracker.skip(workflow_id, step.id).await?;
                        if let Some(key) = &step.output_key {
                            skipped_keys.insert(key.clone());
                        }
                        log.push(json!({
                            "event": "step_skipped",
                            "step_id": step.id,
                            "tool": step.tool,
                        }));
                        runtime.advance();
                        continue;
                    }
                }
            }

            match self.execute_step(&step, &params, &mut log).await? {
                StepOutcome::Completed(output) => {
                    match feedback {
                        Some(Feedback::Approved) => {
                            self.tracker.approve(workflow_id, step.id).await?;
                        }
                        Some(Feedback::Corrected {
                            original,
                            corrected,
                        }) => {
                            self.tracker
                                .correct(
                                    workflow_id,
                                    step.id,
                                    "param_edit",
                                    &original,
                                    &corrected,
                                )
                                .await?;
                        }
                        None => {}
                    }
                    runtime.store_result(&step, output);
                    runtime.advance();
                }
                StepOutcome::FailedNonCritical => {
                    runtime.advance();
                }
                StepOutcome::FailedCritical => {
                    return self.seal(workflow_id, &run_id, RunStatus::Failed, None, log).await;
                }
            }
        }

        let output = json!(runtime.state());
        self.seal(workflow_id, &run_id, RunStatus::Completed, Some(output), log)
            .await
    }

    async fn execute_step(
        &self,
        step: &Step,
        params: &BTreeMap<String, Value>,
        log: &mut Vec<Value>,
    ) -> Result<StepOutcome> {
        let mut recovery = ErrorRecovery::new(self.policy);
        let result = recovery
            .with_retry(|| self.executor.invoke(&step.tool, params))
            .await;

        match result {
            Some(output) => {
                log.push(json!({
                    "event": "step_completed",
                    "step_id": step.id,
                    "tool": step.tool,
                }));
                Ok(StepOutcome::Completed(output))
            }
            None => {
                // with_retry always records the failure when it returns None.
                let (message, class) = match recovery.last_error() {
                    Some(error) => (error.to_string(), classify(error)),
                    None => ("unknown failure".to_string(), ErrorClass::Critical),
                };
                match class {
                    ErrorClass::NonCritical => {
                        warn!(step_id = step.id, %message, "step failed, continuing");
                        log.push(json!({
                            "event": "step_failed",
                            "step_id": step.id,
                            "tool": step.tool,
                            "error": message,
                            "class": "non_critical",
                        }));
                        Ok(StepOutcome::FailedNonCritical)
                    }
                    ErrorClass::Retryable | ErrorClass::Critical => {
                        warn!(step_id = step.id, %message, "step failed, aborting run");
                        log.push(json!({
                            "event": "run_failed",
                            "step_id": step.id,
                            "tool": step.tool,
                            "error": message,
                        }));
                        Ok(StepOutcome::FailedCritical)
                    }
                }
            }
        }
    }

    async fn seal(
        &self,
        workflow_id: &str,
        run_id: &str,
        status: RunStatus,
        output: Option<Value>,
        log: Vec<Value>,
    ) -> Result<StoredRun> {
        self.runs
            .complete(run_id, status, output, Value::Array(log))
            .await?;
        self.workflows
            .record_run_outcome(workflow_id, status == RunStatus::Completed)
            .await?;

        let run = self
            .runs
            .get(run_id)
            .await?
            .ok_or(ritual_store::StoreError::NotFound {
                entity: "run",
                id: run_id.to_string(),
            })?;
        info!(run_id, status = %status, "run sealed");
        Ok(run)
    }
}

enum StepOutcome {
    Completed(Value),
    FailedNonCritical,
    FailedCritical,
}

/// User feedback held back until the step completes.
enum Feedback {
    Approved,
    Corrected { original: String, corrected: String },
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

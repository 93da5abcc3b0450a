//! Workflow persistence.
//!
//! SQLite-backed CRUD for workflow definitions, plus the bookkeeping the
//! engine folds back after every run: per-step confidence scores (a parallel
//! array keyed by step order), the aggregate confidence, and the
//! run/success counters. Step definitions and trigger configuration are
//! stored as JSON.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A persisted workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredWorkflow {
    /// Unique identifier (UUID v7).
    pub id: String,
    /// Human-readable workflow name.
    pub name: String,
    /// Optional description of what the workflow does.
    pub description: Option<String>,
    /// JSON trigger configuration (schedule/file_watch/email_match/manual).
    pub trigger: serde_json::Value,
    /// JSON array of step definitions.
    pub steps: serde_json::Value,
    /// Per-step confidence, parallel to `steps` (index = step order).
    pub step_confidence: Vec<f64>,
    /// Aggregate confidence across all steps.
    pub confidence: f64,
    /// Total number of runs started for this workflow.
    pub run_count: i64,
    /// Number of runs that completed successfully.
    pub success_count: i64,
    /// Whether the workflow is eligible for trigger scheduling.
    pub enabled: bool,
    /// Unix timestamp when the workflow was created.
    pub created_at: i64,
    /// Unix timestamp when the workflow was last updated.
    pub updated_at: i64,
}

// ═══════════════════════════════════════════════════════════════════════
//  WorkflowStore
// ═══════════════════════════════════════════════════════════════════════

/// CRUD and counter operations on workflow rows.
#[derive(Clone)]
pub struct WorkflowStore {
    db: Database,
}

const SELECT_COLUMNS: &str = "id, name, description, trigger, steps, step_confidence, \
     confidence, run_count, success_count, enabled, created_at, updated_at";

impl WorkflowStore {
    /// Create a new workflow store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new workflow and return the stored record.
    ///
    /// Generates a UUID v7 identifier and initializes every step's
    /// confidence to 0.0 (one slot per element of the `steps` array).
    #[instrument(skip(self, steps, trigger))]
    pub async fn create(
        &self,
        name: &str,
        description: Option<&str>,
        trigger: serde_json::Value,
        steps: serde_json::Value,
    ) -> StoreResult<StoredWorkflow> {
        let step_count = steps
            .as_array()
            .ok_or_else(|| StoreError::InvalidArgument("steps must be a JSON array".into()))?
            .len();

        let id = Uuid::now_v7().to_string();
        let name = name.to_string();
        let description = description.map(|s| s.to_string());
        let now = Utc::now().timestamp();
        let step_confidence = vec![0.0_f64; step_count];

        let steps_json = serde_json::to_string(&steps)?;
        let trigger_json = serde_json::to_string(&trigger)?;
        let confidence_json = serde_json::to_string(&step_confidence)?;

        let workflow = StoredWorkflow {
            id: id.clone(),
            name: name.clone(),
            description: description.clone(),
            trigger,
            steps,
            step_confidence,
            confidence: 0.0,
            run_count: 0,
            success_count: 0,
            enabled: true,
            created_at: now,
            updated_at: now,
        };

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO workflows (id, name, description, trigger, steps, step_confidence, confidence, enabled, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0.0, 1, ?7, ?7)",
                    rusqlite::params![id, name, description, trigger_json, steps_json, confidence_json, now],
                )?;
                Ok(())
            })
            .await?;

        debug!(workflow_id = %workflow.id, workflow_name = %workflow.name, "workflow created");
        Ok(workflow)
    }

    /// Fetch a single workflow by ID, returning `None` if not found.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<Option<StoredWorkflow>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM workflows WHERE id = ?1"),
                    rusqlite::params![id],
                    map_row,
                );
                match result {
                    Ok(row) => row.into_stored_workflow().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// Fetch a single workflow by name, returning `None` if not found.
    #[instrument(skip(self))]
    pub async fn get_by_name(&self, name: &str) -> StoreResult<Option<StoredWorkflow>> {
        let name = name.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM workflows WHERE name = ?1"),
                    rusqlite::params![name],
                    map_row,
                );
                match result {
                    Ok(row) => row.into_stored_workflow().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// List workflows ordered by most recently updated, with pagination.
    #[instrument(skip(self))]
    pub async fn list(&self, limit: i64, offset: i64) -> StoreResult<Vec<StoredWorkflow>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM workflows ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2"
                ))?;
                let rows = stmt
                    .query_map(rusqlite::params![limit, offset], map_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter().map(|r| r.into_stored_workflow()).collect()
            })
            .await
    }

    /// List all enabled workflows (for the trigger scheduler).
    #[instrument(skip(self))]
    pub async fn list_enabled(&self) -> StoreResult<Vec<StoredWorkflow>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM workflows WHERE enabled = 1 ORDER BY updated_at DESC"
                ))?;
                let rows = stmt
                    .query_map([], map_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter().map(|r| r.into_stored_workflow()).collect()
            })
            .await
    }

    /// Toggle a workflow's enabled state.
    #[instrument(skip(self))]
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> StoreResult<()> {
        let id = id.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE workflows SET enabled = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![id, enabled, now],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "workflow",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Overwrite one step's confidence score.
    ///
    /// `step_index` is the 0-based position in the step array (step id − 1).
    #[instrument(skip(self))]
    pub async fn set_step_confidence(
        &self,
        id: &str,
        step_index: usize,
        value: f64,
    ) -> StoreResult<()> {
        if !(0.0..=1.0).contains(&value) {
            return Err(StoreError::InvalidArgument(format!(
                "confidence {value} outside [0, 1]"
            )));
        }

        let id = id.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                let json: String = conn
                    .query_row(
                        "SELECT step_confidence FROM workflows WHERE id = ?1",
                        rusqlite::params![id],
                        |row| row.get(0),
                    )
                    .map_err(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                            entity: "workflow",
                            id: id.clone(),
                        },
                        other => StoreError::Sqlite(other),
                    })?;

                let mut scores: Vec<f64> = serde_json::from_str(&json)?;
                let count = scores.len();
                let slot = scores.get_mut(step_index).ok_or_else(|| {
                    StoreError::InvalidArgument(format!(
                        "step index {step_index} out of range ({count} steps)"
                    ))
                })?;
                *slot = value;

                let updated_json = serde_json::to_string(&scores)?;
                conn.execute(
                    "UPDATE workflows SET step_confidence = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![id, updated_json, now],
                )?;
                Ok(())
            })
            .await
    }

    /// Increment the run counter, and the success counter when `success`.
    #[instrument(skip(self))]
    pub async fn record_run_outcome(&self, id: &str, success: bool) -> StoreResult<()> {
        let id = id.to_string();
        let now = Utc::now().timestamp();
        let success_delta: i64 = if success { 1 } else { 0 };

        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE workflows SET run_count = run_count + 1, \
                     success_count = success_count + ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![id, success_delta, now],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound {
                        entity: "workflow",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Recompute the aggregate confidence as the mean of the per-step
    /// scores, persist it, and return the new value.
    #[instrument(skip(self))]
    pub async fn recompute_aggregate(&self, id: &str) -> StoreResult<f64> {
        let id = id.to_string();
        let now = Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                let json: String = conn
                    .query_row(
                        "SELECT step_confidence FROM workflows WHERE id = ?1",
                        rusqlite::params![id],
                        |row| row.get(0),
                    )
                    .map_err(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                            entity: "workflow",
                            id: id.clone(),
                        },
                        other => StoreError::Sqlite(other),
                    })?;

                let scores: Vec<f64> = serde_json::from_str(&json)?;
                let aggregate = if scores.is_empty() {
                    0.0
                } else {
                    scores.iter().sum::<f64>() / scores.len() as f64
                };

                conn.execute(
                    "UPDATE workflows SET confidence = ?2, updated_at = ?3 WHERE id = ?1",
                    rusqlite::params![id, aggregate, now],
                )?;
                Ok(aggregate)
            })
            .await
    }

    /// Delete a workflow by ID. Deletion is always explicit — nothing in
    /// the engine removes workflows as a side effect.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let deleted =
                    conn.execute("DELETE FROM workflows WHERE id = ?1", rusqlite::params![id])?;
                if deleted == 0 {
                    return Err(StoreError::NotFound {
                        entity: "workflow",
                        id,
                    });
                }
                Ok(())
            })
            .await
    }

    /// Return the total number of workflows.
    #[instrument(skip(self))]
    pub async fn count(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM workflows", [], |row| row.get(0))?;
                Ok(count)
            })
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal row mapping
// ═══════════════════════════════════════════════════════════════════════

/// Raw row data from SQLite before JSON deserialization.
///
/// Keeps the `rusqlite` row-mapping closure infallible with respect to
/// JSON; parsing happens in a second step that can return
/// `StoreError::Json`.
struct WorkflowRow {
    id: String,
    name: String,
    description: Option<String>,
    trigger: String,
    steps: String,
    step_confidence: String,
    confidence: f64,
    run_count: i64,
    success_count: i64,
    enabled: bool,
    created_at: i64,
    updated_at: i64,
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkflowRow> {
    Ok(WorkflowRow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        trigger: row.get(3)?,
        steps: row.get(4)?,
        step_confidence: row.get(5)?,
        confidence: row.get(6)?,
        run_count: row.get(7)?,
        success_count: row.get(8)?,
        enabled: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

impl WorkflowRow {
    fn into_stored_workflow(self) -> StoreResult<StoredWorkflow> {
        let trigger: serde_json::Value = serde_json::from_str(&self.trigger)?;
        let steps: serde_json::Value = serde_json::from_str(&self.steps)?;
        let step_confidence: Vec<f64> = serde_json::from_str(&self.step_confidence)?;

        Ok(StoredWorkflow {
            id: self.id,
            name: self.name,
            description: self.description,
            trigger,
            steps,
            step_confidence,
            confidence: self.confidence,
            run_count: self.run_count,
            success_count: self.success_count,
            enabled: self.enabled,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────

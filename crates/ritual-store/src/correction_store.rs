//! Correction persistence.
//!
//! One row per human edit of a step's output or parameters. Rows are
//! append-only — they are never mutated, only queried for pattern
//! inference and graduation checks.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::StoreResult;

/// A persisted correction record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCorrection {
    /// Row ID (autoincrement — insertion order).
    pub id: i64,
    /// Owning workflow.
    pub workflow_id: String,
    /// The step that was corrected (1-based step id).
    pub step_id: u32,
    /// What kind of edit this was (`output_edit`, `param_edit`,
    /// `output_filter`, ...).
    pub correction_type: String,
    /// The value the step produced.
    pub original_value: String,
    /// The value the user replaced it with.
    pub corrected_value: String,
    /// Unix timestamp when the correction was recorded.
    pub created_at: i64,
}

/// Append/query operations on correction rows.
#[derive(Clone)]
pub struct CorrectionStore {
    db: Database,
}

impl CorrectionStore {
    /// Create a new correction store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a correction row and return the stored record.
    #[instrument(skip(self, original_value, corrected_value))]
    pub async fn append(
        &self,
        workflow_id: &str,
        step_id: u32,
        correction_type: &str,
        original_value: &str,
        corrected_value: &str,
    ) -> StoreResult<StoredCorrection> {
        let workflow_id = workflow_id.to_string();
        let correction_type = correction_type.to_string();
        let original_value = original_value.to_string();
        let corrected_value = corrected_value.to_string();
        let now = Utc::now().timestamp();

        let record = self
            .db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO corrections (workflow_id, step_id, correction_type, original_value, corrected_value, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        workflow_id,
                        step_id,
                        correction_type,
                        original_value,
                        corrected_value,
                        now
                    ],
                )?;
                let id = conn.last_insert_rowid();
                Ok(StoredCorrection {
                    id,
                    workflow_id,
                    step_id,
                    correction_type,
                    original_value,
                    corrected_value,
                    created_at: now,
                })
            })
            .await?;

        debug!(
            workflow_id = %record.workflow_id,
            step_id = record.step_id,
            correction_type = %record.correction_type,
            "correction recorded"
        );
        Ok(record)
    }

    /// List all corrections for one (workflow, step), in insertion order.
    #[instrument(skip(self))]
    pub async fn list_for_step(
        &self,
        workflow_id: &str,
        step_id: u32,
    ) -> StoreResult<Vec<StoredCorrection>> {
        let workflow_id = workflow_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, workflow_id, step_id, correction_type, original_value, corrected_value, created_at \
                     FROM corrections WHERE workflow_id = ?1 AND step_id = ?2 ORDER BY id ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![workflow_id, step_id], |row| {
                        Ok(StoredCorrection {
                            id: row.get(0)?,
                            workflow_id: row.get(1)?,
                            step_id: row.get(2)?,
                            correction_type: row.get(3)?,
                            original_value: row.get(4)?,
                            corrected_value: row.get(5)?,
                            created_at: row.get(6)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Count corrections for one (workflow, step) recorded at or after
    /// `since` (unix seconds).
    #[instrument(skip(self))]
    pub async fn count_recent(
        &self,
        workflow_id: &str,
        step_id: u32,
        since: i64,
    ) -> StoreResult<i64> {
        let workflow_id = workflow_id.to_string();
        self.db
            .execute(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM corrections \
                     WHERE workflow_id = ?1 AND step_id = ?2 AND created_at >= ?3",
                    rusqlite::params![workflow_id, step_id, since],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────

//! Run persistence.
//!
//! A run row is created when execution starts and sealed exactly once when
//! it completes or fails. The step-level event log is stored as a JSON
//! array and is append-only after sealing.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The run is in flight.
    Running,
    /// Every step finished (possibly with non-critical step failures).
    Completed,
    /// The run was aborted by a critical failure.
    Failed,
}

impl RunStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> StoreResult<Self> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(StoreError::InvalidArgument(format!(
                "unknown run status `{other}`"
            ))),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRun {
    /// Unique identifier (UUID v7).
    pub id: String,
    /// Owning workflow.
    pub workflow_id: String,
    /// Current lifecycle state.
    pub status: RunStatus,
    /// Result payload, present once sealed.
    pub output: Option<serde_json::Value>,
    /// Ordered step-level events (`{step_id, event, output}` objects).
    pub log: serde_json::Value,
    /// Unix timestamp when the run started.
    pub started_at: i64,
    /// Unix timestamp when the run was sealed; `None` while in flight.
    pub completed_at: Option<i64>,
}

// ═══════════════════════════════════════════════════════════════════════
//  RunStore
// ═══════════════════════════════════════════════════════════════════════

/// Start/seal/query operations on run rows.
#[derive(Clone)]
pub struct RunStore {
    db: Database,
}

const SELECT_COLUMNS: &str = "id, workflow_id, status, output, log, started_at, completed_at";

impl RunStore {
    /// Create a new run store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a run row with status `running` and return its ID.
    #[instrument(skip(self))]
    pub async fn start(&self, workflow_id: &str) -> StoreResult<String> {
        let id = Uuid::now_v7().to_string();
        let workflow_id = workflow_id.to_string();
        let now = Utc::now().timestamp();

        let run_id = id.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO runs (id, workflow_id, status, log, started_at) \
                     VALUES (?1, ?2, 'running', '[]', ?3)",
                    rusqlite::params![id, workflow_id, now],
                )?;
                Ok(())
            })
            .await?;

        debug!(run_id = %run_id, "run started");
        Ok(run_id)
    }

    /// Seal a run with its final status, output payload, and event log.
    ///
    /// Sealing is one-shot: a run that is no longer `running` cannot be
    /// sealed again.
    #[instrument(skip(self, output, log))]
    pub async fn complete(
        &self,
        id: &str,
        status: RunStatus,
        output: Option<serde_json::Value>,
        log: serde_json::Value,
    ) -> StoreResult<()> {
        if status == RunStatus::Running {
            return Err(StoreError::InvalidArgument(
                "cannot seal a run with status `running`".into(),
            ));
        }

        let id = id.to_string();
        let now = Utc::now().timestamp();
        let output_json = output.as_ref().map(serde_json::to_string).transpose()?;
        let log_json = serde_json::to_string(&log)?;
        let status_str = status.as_str();

        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE runs SET status = ?2, output = ?3, log = ?4, completed_at = ?5 \
                     WHERE id = ?1 AND status = 'running'",
                    rusqlite::params![id, status_str, output_json, log_json, now],
                )?;
                if updated == 0 {
                    return Err(StoreError::NotFound { entity: "run", id });
                }
                Ok(())
            })
            .await
    }

    /// Fetch a single run by ID, returning `None` if not found.
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> StoreResult<Option<StoredRun>> {
        let id = id.to_string();
        self.db
            .execute(move |conn| {
                let result = conn.query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM runs WHERE id = ?1"),
                    rusqlite::params![id],
                    map_row,
                );
                match result {
                    Ok(row) => row.into_stored_run().map(Some),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    /// List runs for a workflow, newest first, optionally filtered by
    /// status.
    #[instrument(skip(self))]
    pub async fn list_for_workflow(
        &self,
        workflow_id: &str,
        status: Option<RunStatus>,
        limit: i64,
    ) -> StoreResult<Vec<StoredRun>> {
        let workflow_id = workflow_id.to_string();
        self.db
            .execute(move |conn| {
                let rows = match status {
                    Some(status) => {
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {SELECT_COLUMNS} FROM runs \
                             WHERE workflow_id = ?1 AND status = ?2 \
                             ORDER BY started_at DESC LIMIT ?3"
                        ))?;
                        stmt.query_map(
                            rusqlite::params![workflow_id, status.as_str(), limit],
                            map_row,
                        )?
                        .collect::<Result<Vec<_>, _>>()?
                    }
                    None => {
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {SELECT_COLUMNS} FROM runs \
                             WHERE workflow_id = ?1 ORDER BY started_at DESC LIMIT ?2"
                        ))?;
                        stmt.query_map(rusqlite::params![workflow_id, limit], map_row)?
                            .collect::<Result<Vec<_>, _>>()?
                    }
                };

                rows.into_iter().map(|r| r.into_stored_run()).collect()
            })
            .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal row mapping
// ═══════════════════════════════════════════════════════════════════════

struct RunRow {
    id: String,
    workflow_id: String,
    status: String,
    output: Option<String>,
    log: String,
    started_at: i64,
    completed_at: Option<i64>,
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
    Ok(RunRow {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        status: row.get(2)?,
        output: row.get(3)?,
        log: row.get(4)?,
        started_at: row.get(5)?,
        completed_at: row.get(6)?,
    })
}

impl RunRow {
    fn into_stored_run(self) -> StoreResult<StoredRun> {
        let status = RunStatus::parse(&self.status)?;
        let output: Option<serde_json::Value> =
            self.output.map(|o| serde_json::from_str(&o)).transpose()?;
        let log: serde_json::Value = serde_json::from_str(&self.log)?;

        Ok(StoredRun {
            id: self.id,
            workflow_id: self.workflow_id,
            status,
            output,
            log,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow_store::WorkflowStore;
    use serde_json::json;

    async fn setup() -> (WorkflowStore, RunStore, String) {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let workflows = WorkflowStore::new(db.clone());
        let runs = RunStore::new(db);

        let workflow = workflows
            .create("wf", None, json!({"type": "manual"}), json!([]))
            .await
            .unwrap();
        (workflows, runs, workflow.id)
    }

    #[tokio::test]
    async fn start_creates_running_run() {
        let (_, runs, wf_id) = setup().await;

        let run_id = runs.start(&wf_id).await.unwrap();
        let run = runs.get(&run_id).await.unwrap().unwrap();

        assert_eq!(run.workflow_id, wf_id);
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.output.is_none());
        assert!(run.completed_at.is_none());
        assert_eq!(run.log, json!([]));
    }

    #[tokio::test]
    async fn complete_seals_run() {
        let (_, runs, wf_id) = setup().await;
        let run_id = runs.start(&wf_id).await.unwrap();

        let log = json!([
            {"step_id": 1, "event": "step_completed", "output": ["a.pdf"]},
        ]);
        runs.complete(
            &run_id,
            RunStatus::Completed,
            Some(json!({"rows": 3})),
            log.clone(),
        )
        .await
        .unwrap();

        let run = runs.get(&run_id).await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.output, Some(json!({"rows": 3})));
        assert_eq!(run.log, log);
        assert!(run.completed_at.is_some());
    }

    #[tokio::test]
    async fn sealed_run_cannot_be_sealed_again() {
        let (_, runs, wf_id) = setup().await;
        let run_id = runs.start(&wf_id).await.unwrap();

        runs.complete(&run_id, RunStatus::Failed, None, json!([]))
            .await
            .unwrap();

        let again = runs
            .complete(&run_id, RunStatus::Completed, None, json!([]))
            .await;
        assert!(matches!(again, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn seal_with_running_status_rejected() {
        let (_, runs, wf_id) = setup().await;
        let run_id = runs.start(&wf_id).await.unwrap();

        let result = runs
            .complete(&run_id, RunStatus::Running, None, json!([]))
            .await;
        assert!(matches!(result, Err(StoreError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let (_, runs, wf_id) = setup().await;

        let r1 = runs.start(&wf_id).await.unwrap();
        let r2 = runs.start(&wf_id).await.unwrap();
        let _r3 = runs.start(&wf_id).await.unwrap();

        runs.complete(&r1, RunStatus::Completed, None, json!([]))
            .await
            .unwrap();
        runs.complete(&r2, RunStatus::Failed, None, json!([]))
            .await
            .unwrap();

        let all = runs.list_for_workflow(&wf_id, None, 10).await.unwrap();
        assert_eq!(all.len(), 3);

        let failed = runs
            .list_for_workflow(&wf_id, Some(RunStatus::Failed), 10)
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, r2);

        let running = runs
            .list_for_workflow(&wf_id, Some(RunStatus::Running), 10)
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
    }
}

//! Trigger firing history.
//!
//! An append-only audit trail: one row every time a trigger fires for a
//! workflow, with the context that made it fire (the matched path, the
//! email sender, the tick timestamp, ...).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::StoreResult;

/// A persisted trigger firing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTriggerRecord {
    /// Row ID (autoincrement — insertion order).
    pub id: i64,
    /// The workflow the trigger fired for.
    pub workflow_id: String,
    /// Trigger discriminant (`schedule`, `file_watch`, `email_match`,
    /// `manual`).
    pub trigger_type: String,
    /// JSON payload describing what fired the trigger.
    pub context: serde_json::Value,
    /// Unix timestamp when the firing was recorded.
    pub created_at: i64,
}

/// Append/query operations on the trigger audit trail.
#[derive(Clone)]
pub struct TriggerStore {
    db: Database,
}

impl TriggerStore {
    /// Create a new trigger store backed by `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a trigger record.
    #[instrument(skip(self, context))]
    pub async fn append(
        &self,
        workflow_id: &str,
        trigger_type: &str,
        context: serde_json::Value,
    ) -> StoreResult<StoredTriggerRecord> {
        let workflow_id = workflow_id.to_string();
        let trigger_type = trigger_type.to_string();
        let context_json = serde_json::to_string(&context)?;
        let now = Utc::now().timestamp();

        let record = self
            .db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO trigger_history (workflow_id, trigger_type, context, created_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![workflow_id, trigger_type, context_json, now],
                )?;
                let id = conn.last_insert_rowid();
                Ok(StoredTriggerRecord {
                    id,
                    workflow_id,
                    trigger_type,
                    context,
                    created_at: now,
                })
            })
            .await?;

        debug!(
            workflow_id = %record.workflow_id,
            trigger_type = %record.trigger_type,
            "trigger firing recorded"
        );
        Ok(record)
    }

    /// List all firings for a workflow, in insertion order.
    #[instrument(skip(self))]
    pub async fn list_for_workflow(
        &self,
        workflow_id: &str,
    ) -> StoreResult<Vec<StoredTriggerRecord>> {
        let workflow_id = workflow_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, workflow_id, trigger_type, context, created_at \
                     FROM trigger_history WHERE workflow_id = ?1 ORDER BY id ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![workflow_id], |row| {
                        let context: String = row.get(3)?;
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            context,
                            row.get::<_, i64>(4)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                rows.into_iter()
                    .map(|(id, workflow_id, trigger_type, context, created_at)| {
                        let context: serde_json::Value = serde_json::from_str(&context)?;
                        Ok(StoredTriggerRecord {
                            id,
                            workflow_id,
                            trigger_type,
                            context,
                            created_at,
                        })
                    })
                    .collect()
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────

//! Workflow export and import.
//!
//! A [`WorkflowDocument`] is a portable, human-editable JSON rendering of
//! a stored workflow. Inside a document, step parameters are plain JSON
//! values with a string convention: `"$files"` references an earlier
//! step's output key, and a leading literal dollar is escaped by doubling
//! (`"$$100"` means the text `$100`). The convention exists only at this
//! boundary; stored plans keep typed parameters.

use std::collections::BTreeMap;

use ritual_store::{StoredWorkflow, WorkflowStore};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument};

use crate::error::{EngineError, Result};
use crate::plan::{ParamValue, Step, validate_references};
use crate::trigger::Trigger;

/// Current document format version.
pub const DOCUMENT_VERSION: u32 = 1;

/// What to do when an imported workflow's name is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// Refuse the import.
    Fail,
    /// Import under `<name> (copy)`, appending again until free.
    RenameCopy,
}

/// Portable workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub version: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub trigger: Trigger,
    pub steps: Vec<StepDocument>,
}

/// One step in a document. Ids are positional and assigned on import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDocument {
    pub tool: String,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// Export and import over the workflow store.
#[derive(Clone)]
pub struct ExportImport {
    workflows: WorkflowStore,
}

impl ExportImport {
    /// Create an exporter over the given store.
    pub fn new(workflows: WorkflowStore) -> Self {
        Self { workflows }
    }

    /// Render a stored workflow as a portable document.
    #[instrument(skip(self))]
    pub async fn export(&self, workflow_id: &str) -> Result<WorkflowDocument> {
        let workflow = self
            .workflows
            .get(workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })?;
        document_from_stored(&workflow)
    }

    /// Create a workflow from a document, applying `policy` on a name
    /// collision. Confidence and run history always start fresh.
    #[instrument(skip(self, document))]
    pub async fn import(
        &self,
        document: &WorkflowDocument,
        policy: CollisionPolicy,
    ) -> Result<StoredWorkflow> {
        let steps = steps_from_document(document)?;

        let mut name = document.name.clone();
        while self.workflows.get_by_name(&name).await?.is_some() {
            match policy {
                CollisionPolicy::Fail => {
                    return Err(EngineError::DuplicateName { name });
                }
                CollisionPolicy::RenameCopy => name = format!("{name} (copy)"),
            }
        }

        let workflow = self
            .workflows
            .create(
                &name,
                document.description.as_deref(),
                serde_json::to_value(&document.trigger)?,
                serde_json::to_value(&steps)?,
            )
            .await?;
        info!(workflow_id = %workflow.id, workflow_name = %name, "workflow imported");
        Ok(workflow)
    }
}

/// Build a document from a stored workflow row.
pub fn document_from_stored(workflow: &StoredWorkflow) -> Result<WorkflowDocument> {
    let trigger: Trigger = serde_json::from_value(workflow.trigger.clone())?;
    let steps: Vec<Step> = serde_json::from_value(workflow.steps.clone())?;

    let step_docs = steps
        .into_iter()
        .map(|step| StepDocument {
            tool: step.tool,
            params: step
                .params
                .into_iter()
                .map(|(name, value)| (name, encode_param(value)))
                .collect(),
            output_key: step.output_key,
            description: step.description,
        })
        .collect();

    Ok(WorkflowDocument {
        version: DOCUMENT_VERSION,
        name: workflow.name.clone(),
        description: workflow.description.clone(),
        trigger,
        steps: step_docs,
    })
}

/// Decode a document's steps into a typed plan, validating references.
pub fn steps_from_document(document: &WorkflowDocument) -> Result<Vec<Step>> {
    if document.version != DOCUMENT_VERSION {
        return Err(EngineError::InvalidDocument {
            reason: format!("unsupported version {}", document.version),
        });
    }
    if document.name.trim().is_empty() {
        return Err(EngineError::InvalidDocument {
            reason: "workflow name is empty".into(),
        });
    }
    if document.steps.is_empty() {
        return Err(EngineError::InvalidDocument {
            reason: "document has no steps".into(),
        });
    }

    let steps: Vec<Step> = document
        .steps
        .iter()
        .enumerate()
        .map(|(index, doc)| Step {
            id: index as u32 + 1,
            tool: doc.tool.clone(),
            params: doc
                .params
                .iter()
                .map(|(name, value)| (name.clone(), decode_param(value)))
                .collect(),
            output_key: doc.output_key.clone(),
            description: doc.description.clone(),
        })
        .collect();

    validate_references(&steps)?;
    Ok(steps)
}

fn encode_param(value: ParamValue) -> Value {
    match value {
        ParamValue::Reference(key) => Value::String(format!("${key}")),
        ParamValue::Literal(Value::String(s)) if s.starts_with('$') => {
            Value::String(format!("${s}"))
        }
        ParamValue::Literal(other) => other,
    }
}

fn decode_param(value: &Value) -> ParamValue {
    if let Value::String(s) = value {
        if let Some(escaped) = s.strip_prefix("$$") {
            return ParamValue::literal(format!("${escaped}"));
        }
        if let Some(key) = s.strip_prefix('$') {
            return ParamValue::reference(key);
        }
    }
    ParamValue::Literal(value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ritual_store::Database;
    use serde_json::json;

    use crate::parser::IntentParser;
    use crate::plan::PlanGenerator;

    async fn seeded() -> (ExportImport, WorkflowStore, String) {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let workflows = WorkflowStore::new(db);

        let intent = IntentParser::new().parse(
            "Every Friday at 5pm, pull invoices from Downloads and append them to expenses.csv",
        );
        let steps = PlanGenerator::new().generate(&intent).unwrap();
        let workflow = workflows
            .create(
                &intent.name,
                Some(&intent.raw_text),
                serde_json::to_value(&intent.trigger).unwrap(),
                serde_json::to_value(&steps).unwrap(),
            )
            .await
            .unwrap();

        (ExportImport::new(workflows.clone()), workflows, workflow.id)
    }

    #[tokio::test]
    async fn export_renders_references_with_dollar_prefix() {
        let (exporter, _, id) = seeded().await;
        let document = exporter.export(&id).await.unwrap();

        assert_eq!(document.version, DOCUMENT_VERSION);
        assert_eq!(document.steps.len(), 3);
        assert_eq!(document.steps[1].params["files"], json!("$files"));
        assert_eq!(document.steps[2].params["extracted"], json!("$extracted"));
        // Literals stay plain.
        assert_eq!(document.steps[2].params["path"], json!("expenses.csv"));
    }

    #[tokio::test]
    async fn round_trip_preserves_definition() {
        let (exporter, workflows, id) = seeded().await;
        let document = exporter.export(&id).await.unwrap();

        workflows.delete(&id).await.unwrap();
        let imported = exporter
            .import(&document, CollisionPolicy::Fail)
            .await
            .unwrap();

        assert_eq!(imported.name, document.name);
        assert_eq!(
            imported.trigger,
            serde_json::to_value(&document.trigger).unwrap()
        );
        let steps: Vec<Step> = serde_json::from_value(imported.steps).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].tool, "file_glob");
        assert_eq!(
            steps[1].params["files"],
            ParamValue::reference("files")
        );
        // Fresh learning state.
        assert_eq!(imported.confidence, 0.0);
        assert_eq!(imported.run_count, 0);
    }

    #[tokio::test]
    async fn collision_fails_or_renames_per_policy() {
        let (exporter, _, id) = seeded().await;
        let document = exporter.export(&id).await.unwrap();

        let result = exporter.import(&document, CollisionPolicy::Fail).await;
        assert!(matches!(result, Err(EngineError::DuplicateName { .. })));

        let copy = exporter
            .import(&document, CollisionPolicy::RenameCopy)
            .await
            .unwrap();
        assert_eq!(copy.name, format!("{} (copy)", document.name));

        // Importing again renames twice.
        let second = exporter
            .import(&document, CollisionPolicy::RenameCopy)
            .await
            .unwrap();
        assert_eq!(second.name, format!("{} (copy) (copy)", document.name));
    }

    #[test]
    fn dollar_literals_are_escaped_and_restored() {
        let encoded = encode_param(ParamValue::literal("$100 budget"));
        assert_eq!(encoded, json!("$$100 budget"));
        assert_eq!(
            decode_param(&encoded),
            ParamValue::literal("$100 budget")
        );

        assert_eq!(
            decode_param(&json!("$files")),
            ParamValue::reference("files")
        );
        assert_eq!(decode_param(&json!(42)), ParamValue::literal(42));
    }

    #[test]
    fn forward_reference_in_document_is_rejected() {
        let document = WorkflowDocument {
            version: DOCUMENT_VERSION,
            name: "bad".into(),
            description: None,
            trigger: Trigger::Manual,
            steps: vec![StepDocument {
                tool: "csv_append".into(),
                params: BTreeMap::from([("rows".to_string(), json!("$extracted"))]),
                output_key: None,
                description: String::new(),
            }],
        };
        let result = steps_from_document(&document);
        assert!(matches!(
            result,
            Err(EngineError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let document = WorkflowDocument {
            version: 99,
            name: "x".into(),
            description: None,
            trigger: Trigger::Manual,
            steps: vec![],
        };
        assert!(matches!(
            steps_from_document(&document),
            Err(EngineError::InvalidDocument { .. })
        ));
    }
}

//! Plan generation — turn an [`Intent`] into an ordered step sequence.
//!
//! A plan is one collection step per source followed by one delivery step
//! per destination, threaded through named output keys. Parameters are
//! typed: a [`ParamValue`] is either a literal or an explicit reference to
//! an earlier step's output key. References are resolved by the runtime,
//! never by sniffing string prefixes, so literals that happen to start
//! with `$` are unambiguous.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::parser::{Destination, Intent, SourceKind};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A step parameter: either a literal value or a reference to a prior
/// step's output key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ParamValue {
    /// Passed to the tool as-is.
    Literal(serde_json::Value),
    /// Replaced with the named output's current contents before invocation.
    Reference(String),
}

impl ParamValue {
    /// Construct a literal parameter.
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Construct a reference to an earlier step's output key.
    pub fn reference(name: impl Into<String>) -> Self {
        Self::Reference(name.into())
    }

    /// The referenced output key, if this is a reference.
    pub fn as_reference(&self) -> Option<&str> {
        match self {
            Self::Reference(name) => Some(name),
            Self::Literal(_) => None,
        }
    }
}

/// One tool invocation within a workflow's plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Sequence position, 1-based, unique within a workflow.
    pub id: u32,
    /// The external tool this step invokes.
    pub tool: String,
    /// Named parameters, literal or reference.
    pub params: BTreeMap<String, ParamValue>,
    /// Name under which the step's result is stored for later reference.
    pub output_key: Option<String>,
    /// Human-readable description of what this step does.
    pub description: String,
}

// ---------------------------------------------------------------------------
// Plan generator
// ---------------------------------------------------------------------------

/// Deterministic plan generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanGenerator;

impl PlanGenerator {
    /// Create a new plan generator.
    pub fn new() -> Self {
        Self
    }

    /// Generate the ordered step sequence for an intent.
    ///
    /// Source steps come first (in source order), then destination steps
    /// (in destination order). Each destination references the output key
    /// of the last producer. Deterministic for a given intent.
    pub fn generate(&self, intent: &Intent) -> Result<Vec<Step>> {
        if intent.sources.is_empty() && intent.destinations.is_empty() {
            return Err(EngineError::EmptyPlan {
                intent_name: intent.name.clone(),
            });
        }

        let mut steps = Vec::new();
        let mut used_keys: BTreeSet<String> = BTreeSet::new();
        let mut last_key: Option<String> = None;

        for source in &intent.sources {
            let id = steps.len() as u32 + 1;
            let step = match source.kind {
                SourceKind::LocalFiles => {
                    let path = source.path.clone().unwrap_or_else(|| "~".to_string());
                    let mut params = BTreeMap::new();
                    params.insert("path".to_string(), ParamValue::literal(path.clone()));
                    let description = match &source.hint {
                        Some(hint) if hint == "pdf" => {
                            params.insert(
                                "pattern".to_string(),
                                ParamValue::literal("*.pdf"),
                            );
                            format!("Collect PDF files from {path}")
                        }
                        _ => format!("Collect files from {path}"),
                    };
                    let key = unique_key("files", &mut used_keys);
                    last_key = Some(key.clone());
                    Step {
                        id,
                        tool: "file_glob".to_string(),
                        params,
                        output_key: Some(key),
                        description,
                    }
                }
                SourceKind::Pdf => {
                    let mut params = BTreeMap::new();
                    let description = match &last_key {
                        Some(prev) => {
                            params
                                .insert(prev.clone(), ParamValue::reference(prev.clone()));
                            "Extract structured data from the collected PDFs".to_string()
                        }
                        None => {
                            let path =
                                source.path.clone().unwrap_or_else(|| "~".to_string());
                            params.insert("path".to_string(), ParamValue::literal(path.clone()));
                            format!("Extract structured data from PDFs in {path}")
                        }
                    };
                    let key = unique_key("extracted", &mut used_keys);
                    last_key = Some(key.clone());
                    Step {
                        id,
                        tool: "pdf_extract".to_string(),
                        params,
                        output_key: Some(key),
                        description,
                    }
                }
                SourceKind::Web => {
                    let url = source.path.clone().unwrap_or_default();
                    let mut params = BTreeMap::new();
                    params.insert("url".to_string(), ParamValue::literal(url.clone()));
                    let key = unique_key("page", &mut used_keys);
                    last_key = Some(key.clone());
                    Step {
                        id,
                        tool: "web_fetch".to_string(),
                        params,
                        output_key: Some(key),
                        description: format!("Fetch {url}"),
                    }
                }
            };
            steps.push(step);
        }

        for destination in &intent.destinations {
            let id = steps.len() as u32 + 1;
            let mut params = BTreeMap::new();
            if let Some(prev) = &last_key {
                params.insert(prev.clone(), ParamValue::reference(prev.clone()));
            }

            let step = match destination {
                Destination::File { path } => {
                    params.insert("path".to_string(), ParamValue::literal(path.clone()));
                    let tool = if path.ends_with(".csv") {
                        "csv_append"
                    } else {
                        "file_append"
                    };
                    Step {
                        id,
                        tool: tool.to_string(),
                        params,
                        output_key: None,
                        description: format!("Append results to {path}"),
                    }
                }
                Destination::WebForm { selector } => {
                    params.insert("form".to_string(), ParamValue::literal(selector.clone()));
                    Step {
                        id,
                        tool: "web_form_fill".to_string(),
                        params,
                        output_key: None,
                        description: format!("Fill the {selector} form"),
                    }
                }
            };
            steps.push(step);
        }

        validate_references(&steps)?;
        debug!(intent = %intent.name, steps = steps.len(), "plan generated");
        Ok(steps)
    }
}

/// Check the no-forward-reference invariant: every referenced output key
/// must have been produced by an earlier step.
pub fn validate_references(steps: &[Step]) -> Result<()> {
    let mut produced: BTreeSet<&str> = BTreeSet::new();

    for step in steps {
        for value in step.params.values() {
            if let Some(name) = value.as_reference()
                && !produced.contains(name)
            {
                return Err(EngineError::UnresolvedReference {
                    step_id: step.id,
                    name: name.to_string(),
                });
            }
        }
        if let Some(key) = &step.output_key {
            produced.insert(key);
        }
    }

    Ok(())
}

fn unique_key(base: &str, used: &mut BTreeSet<String>) -> String {
    let mut candidate = base.to_string();
    let mut suffix = 2;
    while used.contains(&candidate) {
        candidate = format!("{base}_{suffix}");
        suffix += 1;
    }
    used.insert(candidate.clone());
    candidate
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{IntentParser, Source};
    use crate::trigger::Trigger;

    fn invoice_intent() -> Intent {
        IntentParser::new().parse(
            "Every Friday at 5pm, pull invoices from Downloads and append them to expenses.csv",
        )
    }

    #[test]
    fn plan_threads_sources_into_destination() {
        let steps = PlanGenerator::new().generate(&invoice_intent()).unwrap();

        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].tool, "file_glob");
        assert_eq!(steps[0].output_key.as_deref(), Some("files"));
        assert_eq!(steps[1].tool, "pdf_extract");
        assert_eq!(steps[1].output_key.as_deref(), Some("extracted"));
        assert_eq!(
            steps[1].params.get("files"),
            Some(&ParamValue::reference("files"))
        );
        assert_eq!(steps[2].tool, "csv_append");
        assert_eq!(
            steps[2].params.get("extracted"),
            Some(&ParamValue::reference("extracted"))
        );
        assert_eq!(steps[2].output_key, None);
    }

    #[test]
    fn step_ids_are_sequential_from_one() {
        let steps = PlanGenerator::new().generate(&invoice_intent()).unwrap();
        for (index, step) in steps.iter().enumerate() {
            assert_eq!(step.id, index as u32 + 1);
        }
    }

    #[test]
    fn first_step_is_a_collection_step() {
        let steps = PlanGenerator::new().generate(&invoice_intent()).unwrap();
        assert!(steps[0].output_key.is_some());
        assert!(steps[0].params.values().all(|v| v.as_reference().is_none()));
    }

    #[test]
    fn generate_is_deterministic() {
        let intent = invoice_intent();
        let a = PlanGenerator::new().generate(&intent).unwrap();
        let b = PlanGenerator::new().generate(&intent).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_intent_is_a_plan_error() {
        let intent = Intent {
            name: "nothing".into(),
            trigger: Trigger::Manual,
            sources: vec![],
            destinations: vec![],
            raw_text: "do nothing".into(),
        };
        let result = PlanGenerator::new().generate(&intent);
        assert!(matches!(result, Err(EngineError::EmptyPlan { .. })));
    }

    #[test]
    fn sources_without_destinations_still_plan() {
        let intent = Intent {
            name: "collect".into(),
            trigger: Trigger::Manual,
            sources: vec![Source {
                kind: SourceKind::LocalFiles,
                hint: None,
                path: Some("~/Desktop".into()),
            }],
            destinations: vec![],
            raw_text: "gather desktop files".into(),
        };
        let steps = PlanGenerator::new().generate(&intent).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].tool, "file_glob");
    }

    #[test]
    fn non_csv_destination_uses_file_append() {
        let intent = IntentParser::new().parse("every day collect Documents files into notes.md");
        let steps = PlanGenerator::new().generate(&intent).unwrap();
        let last = steps.last().unwrap();
        assert_eq!(last.tool, "file_append");
    }

    #[test]
    fn web_form_destination_references_producer() {
        let intent = IntentParser::new()
            .parse("every monday pull invoices from Downloads into the expenses form");
        let steps = PlanGenerator::new().generate(&intent).unwrap();
        let last = steps.last().unwrap();
        assert_eq!(last.tool, "web_form_fill");
        assert_eq!(
            last.params.get("form"),
            Some(&ParamValue::literal("expenses"))
        );
        assert!(last.params.values().any(|v| v.as_reference().is_some()));
    }

    #[test]
    fn duplicate_output_keys_are_disambiguated() {
        let intent = Intent {
            name: "two folders".into(),
            trigger: Trigger::Manual,
            sources: vec![
                Source {
                    kind: SourceKind::LocalFiles,
                    hint: None,
                    path: Some("~/Downloads".into()),
                },
                Source {
                    kind: SourceKind::LocalFiles,
                    hint: None,
                    path: Some("~/Desktop".into()),
                },
            ],
            destinations: vec![Destination::File {
                path: "all.csv".into(),
            }],
            raw_text: "merge folders".into(),
        };
        let steps = PlanGenerator::new().generate(&intent).unwrap();
        assert_eq!(steps[0].output_key.as_deref(), Some("files"));
        assert_eq!(steps[1].output_key.as_deref(), Some("files_2"));
        // Destination references the most recent producer.
        assert_eq!(
            steps[2].params.get("files_2"),
            Some(&ParamValue::reference("files_2"))
        );
    }

    #[test]
    fn validate_references_rejects_forward_reference() {
        let steps = vec![
            Step {
                id: 1,
                tool: "csv_append".into(),
                params: BTreeMap::from([(
                    "rows".to_string(),
                    ParamValue::reference("extracted"),
                )]),
                output_key: None,
                description: "append".into(),
            },
            Step {
                id: 2,
                tool: "pdf_extract".into(),
                params: BTreeMap::new(),
                output_key: Some("extracted".into()),
                description: "extract".into(),
            },
        ];
        let result = validate_references(&steps);
        assert!(matches!(
            result,
            Err(EngineError::UnresolvedReference { step_id: 1, .. })
        ));
    }

    #[test]
    fn param_value_json_shape() {
        let literal = ParamValue::literal("$literally-a-dollar");
        let json = serde_json::to_value(&literal).unwrap();
        assert_eq!(json["kind"], "literal");

        let reference = ParamValue::reference("files");
        let json = serde_json::to_value(&reference).unwrap();
        assert_eq!(json["kind"], "reference");
        assert_eq!(json["value"], "files");

        let back: ParamValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, reference);
    }
}

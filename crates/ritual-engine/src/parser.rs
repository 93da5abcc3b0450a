//! Intent parser — transforms raw user text into structured intents.
//!
//! The parser is deliberately total: it never fails. Fragments it cannot
//! interpret are simply omitted from `sources`/`destinations`, and text
//! with no recognizable trigger phrase falls back to a manual trigger.
//! Heuristics are keyword and regex based; judging the *quality* of the
//! interpretation is out of scope.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::trigger::{self, Trigger};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// What kind of collection a source needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Plain files gathered from a folder.
    LocalFiles,
    /// Structured data extracted from PDFs.
    Pdf,
    /// Content fetched from the web.
    Web,
}

/// Where a workflow's inputs come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub kind: SourceKind,
    /// Free-form qualifier (e.g. "pdf" for invoice-style documents).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Folder or URL the source reads from, when one was named.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Where a workflow's outputs go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Destination {
    /// Append to a file (spreadsheet, log, ...).
    File { path: String },
    /// Fill a named external form.
    WebForm { selector: String },
}

/// A structured interpretation of a natural-language automation request.
///
/// Immutable once parsed — planning and execution never mutate the intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    /// Synthesized summary name, lowercase, never empty.
    pub name: String,
    /// When the workflow should run.
    pub trigger: Trigger,
    /// Input sources, in the order they appeared in the text.
    pub sources: Vec<Source>,
    /// Output destinations, in the order they appeared in the text.
    pub destinations: Vec<Destination>,
    /// The original raw text that was parsed.
    pub raw_text: String,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

static FILE_DEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\w~/.-]+\.(?:csv|xlsx|txt|md|json))\b").unwrap());

static WEB_FORM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:the\s+)?([\w-]+)\s+form\b").unwrap());

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").unwrap());

/// Well-known home folders the parser recognizes as file sources.
const FOLDER_NOUNS: [&str; 4] = ["downloads", "desktop", "documents", "pictures"];

/// The intent parser.
///
/// Stateless; a single instance can parse any number of intents.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntentParser;

impl IntentParser {
    /// Create a new intent parser.
    pub fn new() -> Self {
        Self
    }

    /// Parse raw user text into a structured [`Intent`]. Never fails.
    pub fn parse(&self, text: &str) -> Intent {
        let text = text.trim();
        let lower = text.to_lowercase();

        let trigger = self.parse_trigger(&lower);
        let sources = self.parse_sources(&lower);
        let destinations = self.parse_destinations(&lower);
        let name = self.synthesize_name(&lower, &trigger, &sources, &destinations);

        debug!(
            name = %name,
            trigger = %trigger,
            sources = sources.len(),
            destinations = destinations.len(),
            "intent parsed"
        );

        Intent {
            name,
            trigger,
            sources,
            destinations,
            raw_text: text.to_string(),
        }
    }

    /// Recognize a trigger phrase; anything unmatched is manual.
    fn parse_trigger(&self, lower: &str) -> Trigger {
        if let Some(schedule) = trigger::parse_schedule(lower) {
            return schedule;
        }

        // File-watch and email triggers need event phrasing, otherwise
        // "pull invoices from Downloads" would read as a watch.
        let event_phrased = ["when ", "whenever ", "watch ", "arrives", "appears", "lands"]
            .iter()
            .any(|kw| lower.contains(kw));

        if event_phrased {
            if let Some(email) = trigger::parse_email_trigger(lower) {
                return email;
            }
            if let Some(watch) = trigger::parse_file_watch(lower) {
                return watch;
            }
        }

        Trigger::Manual
    }

    /// Recognize folder/app nouns and document vocabulary as sources.
    fn parse_sources(&self, lower: &str) -> Vec<Source> {
        let mut sources = Vec::new();
        let pdf_vocab = lower.contains("pdf") || lower.contains("invoice");

        if let Some(folder) = FOLDER_NOUNS.iter().find(|name| lower.contains(*name)) {
            let mut capitalized = folder.to_string();
            capitalized[..1].make_ascii_uppercase();
            sources.push(Source {
                kind: SourceKind::LocalFiles,
                hint: pdf_vocab.then(|| "pdf".to_string()),
                path: Some(format!("~/{capitalized}")),
            });
        }

        // Extraction vocabulary turns the gathered files into structured
        // data via a second collection step.
        if pdf_vocab && (lower.contains("extract") || lower.contains("pull")) {
            sources.push(Source {
                kind: SourceKind::Pdf,
                hint: Some("pdf".to_string()),
                path: None,
            });
        }

        if let Some(url) = URL_RE.find(lower) {
            sources.push(Source {
                kind: SourceKind::Web,
                hint: None,
                path: Some(url.as_str().trim_end_matches(&[',', '.'][..]).to_string()),
            });
        }

        sources
    }

    /// Recognize named files, spreadsheet vocabulary, and named forms as
    /// destinations.
    fn parse_destinations(&self, lower: &str) -> Vec<Destination> {
        let mut destinations = Vec::new();

        if let Some(caps) = FILE_DEST_RE.captures(lower) {
            destinations.push(Destination::File {
                path: caps[1].to_string(),
            });
        } else if lower.contains("spreadsheet") {
            destinations.push(Destination::File {
                path: "spreadsheet.csv".to_string(),
            });
        }

        if let Some(caps) = WEB_FORM_RE.captures(lower) {
            destinations.push(Destination::WebForm {
                selector: caps[1].to_string(),
            });
        }

        destinations
    }

    /// Build a short lowercase name from the most salient parsed pieces:
    /// the trigger keyword plus source/destination hints. Never empty.
    fn synthesize_name(
        &self,
        lower: &str,
        trigger: &Trigger,
        sources: &[Source],
        destinations: &[Destination],
    ) -> String {
        let mut parts: Vec<String> = Vec::new();

        match trigger {
            Trigger::Schedule { day_of_week, .. } => match day_of_week {
                Some(day) => parts.push(weekday_keyword(*day).to_string()),
                None => parts.push("daily".to_string()),
            },
            Trigger::FileWatch { .. } => parts.push("on new file".to_string()),
            Trigger::EmailMatch { .. } => parts.push("on email".to_string()),
            Trigger::Manual => {}
        }

        if let Some(source) = sources.first() {
            match (&source.hint, &source.path) {
                (Some(hint), _) => parts.push(format!("{hint} import")),
                (None, Some(path)) => {
                    parts.push(path.trim_start_matches("~/").to_lowercase())
                }
                (None, None) => {}
            }
        }

        if let Some(dest) = destinations.first() {
            match dest {
                Destination::File { path } => parts.push(format!("to {path}")),
                Destination::WebForm { selector } => parts.push(format!("to {selector} form")),
            }
        }

        if parts.is_empty() {
            let fallback: String = lower.split_whitespace().take(4).collect::<Vec<_>>().join(" ");
            if fallback.is_empty() {
                return "untitled task".to_string();
            }
            return fallback;
        }

        parts.join(" ")
    }
}

fn weekday_keyword(day: u8) -> &'static str {
    match day {
        0 => "sunday",
        1 => "monday",
        2 => "tuesday",
        3 => "wednesday",
        4 => "thursday",
        5 => "friday",
        _ => "saturday",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

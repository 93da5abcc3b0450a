//! Trigger system — when a workflow becomes due to run.
//!
//! A [`Trigger`] describes the condition that starts a workflow: a
//! recurring schedule, a file appearing in a watched folder, a matching
//! email, or nothing (manual). This module owns the phrase parsers that
//! recognize trigger descriptions in user text, the matching predicates the
//! scheduler evaluates, and the [`TriggerManager`] that scans persisted
//! workflows for due ones and keeps the firing audit trail.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, TimeZone, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use ritual_store::{StoredTriggerRecord, TriggerStore, WorkflowStore};

use crate::error::Result;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How often a schedule trigger repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    /// Fires every day at the configured time.
    Daily,
    /// Fires once a week on `day_of_week`.
    Weekly,
}

/// The condition that makes a workflow due to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Trigger {
    /// Recurring schedule. Matching is at minute granularity — callers own
    /// not re-firing within the same minute.
    Schedule {
        frequency: Frequency,
        /// 0 = Sunday .. 6 = Saturday. Required for weekly schedules.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        day_of_week: Option<u8>,
        /// 24-hour clock.
        hour: u32,
        /// When unset, any minute within the hour matches.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minute: Option<u32>,
    },

    /// A file appearing under `path` (and matching `pattern`, if set).
    FileWatch {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
    },

    /// An incoming email matching the set patterns. An unset pattern is
    /// vacuously true.
    EmailMatch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_pattern: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subject_pattern: Option<String>,
    },

    /// Started explicitly by the user.
    Manual,
}

impl Default for Trigger {
    fn default() -> Self {
        Self::Manual
    }
}

impl Trigger {
    /// The discriminant string used in the trigger audit trail.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Schedule { .. } => "schedule",
            Self::FileWatch { .. } => "file_watch",
            Self::EmailMatch { .. } => "email_match",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Schedule {
                frequency,
                day_of_week,
                hour,
                minute,
            } => {
                let day = day_of_week.map(weekday_name).unwrap_or("");
                let minute = minute.unwrap_or(0);
                match frequency {
                    Frequency::Daily => write!(f, "daily at {hour:02}:{minute:02}"),
                    Frequency::Weekly => write!(f, "every {day} at {hour:02}:{minute:02}"),
                }
            }
            Self::FileWatch { path, pattern } => match pattern {
                Some(p) => write!(f, "file in {path} matching {p}"),
                None => write!(f, "file in {path}"),
            },
            Self::EmailMatch { .. } => write!(f, "matching email"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// A received email, as seen by [`email_matches`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub from: String,
    pub subject: String,
}

// ---------------------------------------------------------------------------
// Phrase parsing
// ---------------------------------------------------------------------------

/// 0 = Sunday .. 6 = Saturday.
const WEEKDAYS: [&str; 7] = [
    "sunday",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
];

fn weekday_name(day: u8) -> &'static str {
    WEEKDAYS.get(day as usize).copied().unwrap_or("")
}

static AM_PM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})(?::(\d{2}))?\s*(am|pm)").unwrap());

static CLOCK_24_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bat\s+(\d{1,2}):(\d{2})\b").unwrap());

static EXT_PATTERN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\.\w+").unwrap());

static FROM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bfrom\s+(\S+)").unwrap());

static SUBJECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\babout\s+"?([^",.]+)"?"#).unwrap());

/// Extract `(hour, minute)` from a time phrase, if one is present.
///
/// Recognizes "5pm", "9:30am", 24-hour "at 17:30", and the bare words
/// "morning" (08:00) and "evening" (17:00). A `None` minute means the
/// phrase named only an hour.
fn parse_time(lower: &str) -> Option<(u32, Option<u32>)> {
    if let Some(caps) = AM_PM_RE.captures(lower) {
        let raw_hour: u32 = caps[1].parse().ok()?;
        if raw_hour == 0 || raw_hour > 12 {
            return None;
        }
        let minute = caps.get(2).and_then(|m| m.as_str().parse().ok());
        let hour = match (&caps[3], raw_hour) {
            ("am", 12) => 0,
            ("am", h) => h,
            ("pm", 12) => 12,
            (_, h) => h + 12,
        };
        return Some((hour, minute));
    }

    if let Some(caps) = CLOCK_24_RE.captures(lower) {
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps[2].parse().ok()?;
        if hour < 24 && minute < 60 {
            return Some((hour, Some(minute)));
        }
        return None;
    }

    if lower.contains("morning") {
        return Some((8, None));
    }
    if lower.contains("evening") {
        return Some((17, None));
    }

    None
}

/// Parse a schedule phrase into a [`Trigger::Schedule`].
///
/// A weekday name makes the schedule weekly; "daily" / "every day" makes it
/// daily. Returns `None` when the text names neither. When no time phrase
/// is present the hour defaults to 9 and the minute is left unset.
pub fn parse_schedule(text: &str) -> Option<Trigger> {
    let lower = text.to_lowercase();

    let day_of_week = WEEKDAYS
        .iter()
        .position(|day| lower.contains(day))
        .map(|i| i as u8);

    let frequency = if day_of_week.is_some() {
        Frequency::Weekly
    } else if lower.contains("daily") || lower.contains("every day") {
        Frequency::Daily
    } else {
        return None;
    };

    let (hour, minute) = parse_time(&lower).unwrap_or((9, None));

    Some(Trigger::Schedule {
        frequency,
        day_of_week,
        hour,
        minute,
    })
}

/// Parse a file-watch phrase into a [`Trigger::FileWatch`].
///
/// Recognizes well-known home folders and an optional `*.ext` glob. The
/// path is expanded (`~` resolved) at parse time.
pub fn parse_file_watch(text: &str) -> Option<Trigger> {
    let lower = text.to_lowercase();

    let folder = ["downloads", "desktop", "documents", "pictures"]
        .iter()
        .find(|name| lower.contains(*name))?;

    let mut capitalized = folder.to_string();
    capitalized[..1].make_ascii_uppercase();
    let path = expand_home(&format!("~/{capitalized}"))
        .to_string_lossy()
        .into_owned();

    let pattern = EXT_PATTERN_RE
        .find(&lower)
        .map(|m| m.as_str().to_string())
        .or_else(|| {
            (lower.contains("pdf") || lower.contains("invoice")).then(|| "*.pdf".to_string())
        });

    Some(Trigger::FileWatch { path, pattern })
}

/// Parse an email-trigger phrase into a [`Trigger::EmailMatch`].
///
/// Requires the text to mention email at all; "from X" and `about Y`
/// populate the optional sender and subject patterns.
pub fn parse_email_trigger(text: &str) -> Option<Trigger> {
    let lower = text.to_lowercase();
    if !lower.contains("email") && !lower.contains("mail") {
        return None;
    }

    let from_pattern = FROM_RE
        .captures(&lower)
        .map(|c| c[1].trim_matches(|ch: char| ",.;:".contains(ch)).to_string());
    let subject_pattern = SUBJECT_RE
        .captures(&lower)
        .map(|c| c[1].trim().to_string());

    Some(Trigger::EmailMatch {
        from_pattern,
        subject_pattern,
    })
}

// ---------------------------------------------------------------------------
// Matching predicates
// ---------------------------------------------------------------------------

/// Whether a schedule trigger matches the given instant.
///
/// Daily schedules match on hour (and minute, when one is set); weekly
/// schedules additionally require the weekday. Non-schedule triggers never
/// match.
pub fn schedule_matches<Tz: TimeZone>(trigger: &Trigger, now: &DateTime<Tz>) -> bool {
    let Trigger::Schedule {
        frequency,
        day_of_week,
        hour,
        minute,
    } = trigger
    else {
        return false;
    };

    if now.hour() != *hour {
        return false;
    }
    if let Some(minute) = minute
        && now.minute() != *minute
    {
        return false;
    }

    match frequency {
        Frequency::Daily => true,
        Frequency::Weekly => {
            let today = now.weekday().num_days_from_sunday() as u8;
            *day_of_week == Some(today)
        }
    }
}

/// Whether a path satisfies a file-watch trigger: the path must live under
/// the watched directory (after `~` expansion) and match the glob pattern
/// when one is set.
pub fn file_matches(trigger: &Trigger, path: impl AsRef<Path>) -> bool {
    let Trigger::FileWatch {
        path: base,
        pattern,
    } = trigger
    else {
        return false;
    };

    let candidate = expand_home(&path.as_ref().to_string_lossy());
    let base = expand_home(base);

    if !candidate.starts_with(&base) {
        return false;
    }

    match pattern {
        None => true,
        Some(pattern) => {
            let Some(file_name) = candidate.file_name() else {
                return false;
            };
            glob::Pattern::new(pattern)
                .map(|p| p.matches(&file_name.to_string_lossy()))
                .unwrap_or(false)
        }
    }
}

/// Whether an email satisfies an email-match trigger. Both set patterns
/// must hold; an unset pattern is vacuously true.
pub fn email_matches(trigger: &Trigger, email: &EmailMessage) -> bool {
    let Trigger::EmailMatch {
        from_pattern,
        subject_pattern,
    } = trigger
    else {
        return false;
    };

    let from_ok = match from_pattern {
        None => true,
        Some(p) => email.from == *p || email.from.contains(p.as_str()),
    };

    let subject_ok = match subject_pattern {
        None => true,
        Some(p) => email.subject.to_lowercase().contains(&p.to_lowercase()),
    };

    from_ok && subject_ok
}

/// Expand a leading `~` to the user's home directory.
pub(crate) fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    if path == "~"
        && let Some(home) = dirs::home_dir()
    {
        return home;
    }
    PathBuf::from(path)
}

// ---------------------------------------------------------------------------
// Trigger manager
// ---------------------------------------------------------------------------

/// Scans persisted workflows for due ones and records trigger firings.
#[derive(Clone)]
pub struct TriggerManager {
    workflows: WorkflowStore,
    history: TriggerStore,
}

impl TriggerManager {
    /// Create a manager over the workflow and trigger-history stores.
    pub fn new(workflows: WorkflowStore, history: TriggerStore) -> Self {
        Self { workflows, history }
    }

    /// Return the IDs of enabled workflows whose schedule trigger matches
    /// `now`.
    ///
    /// The caller owns minute-granularity dedup: this scan will report the
    /// same workflow for every call within the matching minute.
    pub async fn get_due_workflows<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Result<Vec<String>> {
        let mut due = Vec::new();

        for workflow in self.workflows.list_enabled().await? {
            let trigger: Trigger = match serde_json::from_value(workflow.trigger.clone()) {
                Ok(t) => t,
                Err(e) => {
                    debug!(workflow_id = %workflow.id, error = %e, "unparseable trigger, skipping");
                    continue;
                }
            };

            if schedule_matches(&trigger, now) {
                debug!(workflow_id = %workflow.id, trigger = %trigger, "workflow due");
                due.push(workflow.id);
            }
        }

        Ok(due)
    }

    /// Record a trigger firing in the audit trail.
    pub async fn record_trigger(
        &self,
        workflow_id: &str,
        trigger_type: &str,
        context: serde_json::Value,
    ) -> Result<()> {
        info!(workflow_id, trigger_type, "trigger fired");
        self.history
            .append(workflow_id, trigger_type, context)
            .await?;
        Ok(())
    }

    /// Return all recorded firings for a workflow, in insertion order.
    pub async fn get_trigger_history(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<StoredTriggerRecord>> {
        Ok(self.history.list_for_workflow(workflow_id).await?)
    }
}

impl TriggerManager {
    /// Convenience: record a schedule firing with the tick timestamp as
    /// context.
    pub async fn record_schedule_firing<Tz: TimeZone>(
        &self,
        workflow_id: &str,
        now: &DateTime<Tz>,
    ) -> Result<()> {
        self.record_trigger(
            workflow_id,
            "schedule",
            json!({"fired_at": now.to_utc().to_rfc3339()}),
        )
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ritual_store::Database;

    #[test]
    fn parse_weekly_schedule_with_pm_time() {
        let trigger = parse_schedule("Every Friday at 5pm, pull invoices").unwrap();
        assert_eq!(
            trigger,
            Trigger::Schedule {
                frequency: Frequency::Weekly,
                day_of_week: Some(5),
                hour: 17,
                minute: None,
            }
        );
    }

    #[test]
    fn parse_daily_schedule_with_minutes() {
        let trigger = parse_schedule("every day at 9:30am").unwrap();
        assert_eq!(
            trigger,
            Trigger::Schedule {
                frequency: Frequency::Daily,
                day_of_week: None,
                hour: 9,
                minute: Some(30),
            }
        );
    }

    #[test]
    fn parse_schedule_morning_evening_defaults() {
        let morning = parse_schedule("every monday morning").unwrap();
        let Trigger::Schedule { hour, .. } = morning else {
            panic!("expected schedule");
        };
        assert_eq!(hour, 8);

        let evening = parse_schedule("daily in the evening").unwrap();
        let Trigger::Schedule { hour, .. } = evening else {
            panic!("expected schedule");
        };
        assert_eq!(hour, 17);
    }

    #[test]
    fn parse_schedule_default_hour_without_time() {
        let trigger = parse_schedule("every tuesday").unwrap();
        assert_eq!(
            trigger,
            Trigger::Schedule {
                frequency: Frequency::Weekly,
                day_of_week: Some(2),
                hour: 9,
                minute: None,
            }
        );
    }

    #[test]
    fn parse_schedule_midnight_and_noon() {
        let Some(Trigger::Schedule { hour, .. }) = parse_schedule("every sunday at 12am") else {
            panic!("expected schedule");
        };
        assert_eq!(hour, 0);

        let Some(Trigger::Schedule { hour, .. }) = parse_schedule("every sunday at 12pm") else {
            panic!("expected schedule");
        };
        assert_eq!(hour, 12);
    }

    #[test]
    fn parse_schedule_rejects_plain_text() {
        assert!(parse_schedule("rename my vacation photos").is_none());
    }

    #[test]
    fn parse_file_watch_with_extension() {
        let trigger = parse_file_watch("when a new *.pdf lands in Downloads").unwrap();
        let Trigger::FileWatch { path, pattern } = trigger else {
            panic!("expected file watch");
        };
        assert!(path.ends_with("Downloads"));
        assert_eq!(pattern.as_deref(), Some("*.pdf"));
    }

    #[test]
    fn parse_file_watch_invoice_vocabulary_implies_pdf() {
        let trigger = parse_file_watch("watch downloads for invoices").unwrap();
        let Trigger::FileWatch { pattern, .. } = trigger else {
            panic!("expected file watch");
        };
        assert_eq!(pattern.as_deref(), Some("*.pdf"));
    }

    #[test]
    fn parse_email_trigger_patterns() {
        let trigger =
            parse_email_trigger("when an email arrives from billing@acme.com about invoices")
                .unwrap();
        assert_eq!(
            trigger,
            Trigger::EmailMatch {
                from_pattern: Some("billing@acme.com".into()),
                subject_pattern: Some("invoices".into()),
            }
        );
    }

    #[test]
    fn parse_email_trigger_requires_email_vocabulary() {
        assert!(parse_email_trigger("fetch invoices from Downloads").is_none());
    }

    #[test]
    fn schedule_matches_weekly_at_minute_granularity() {
        let trigger = Trigger::Schedule {
            frequency: Frequency::Weekly,
            day_of_week: Some(5),
            hour: 17,
            minute: None,
        };

        // 2026-08-21 is a Friday.
        let friday_5pm = Utc.with_ymd_and_hms(2026, 8, 21, 17, 3, 0).unwrap();
        assert!(schedule_matches(&trigger, &friday_5pm));

        let friday_4pm = Utc.with_ymd_and_hms(2026, 8, 21, 16, 0, 0).unwrap();
        assert!(!schedule_matches(&trigger, &friday_4pm));

        let saturday_5pm = Utc.with_ymd_and_hms(2026, 8, 22, 17, 0, 0).unwrap();
        assert!(!schedule_matches(&trigger, &saturday_5pm));
    }

    #[test]
    fn schedule_matches_daily_with_explicit_minute() {
        let trigger = Trigger::Schedule {
            frequency: Frequency::Daily,
            day_of_week: None,
            hour: 9,
            minute: Some(30),
        };

        let on_time = Utc.with_ymd_and_hms(2026, 8, 23, 9, 30, 0).unwrap();
        assert!(schedule_matches(&trigger, &on_time));

        let wrong_minute = Utc.with_ymd_and_hms(2026, 8, 23, 9, 31, 0).unwrap();
        assert!(!schedule_matches(&trigger, &wrong_minute));
    }

    #[test]
    fn non_schedule_trigger_never_time_matches() {
        let now = Utc::now();
        assert!(!schedule_matches(&Trigger::Manual, &now));
        assert!(!schedule_matches(
            &Trigger::FileWatch {
                path: "~/Downloads".into(),
                pattern: None
            },
            &now
        ));
    }

    #[test]
    fn file_matches_glob_and_containment() {
        let trigger = Trigger::FileWatch {
            path: "~/Downloads".into(),
            pattern: Some("*.pdf".into()),
        };

        assert!(file_matches(&trigger, "~/Downloads/x.pdf"));
        assert!(!file_matches(&trigger, "~/Downloads/x.txt"));
        assert!(!file_matches(&trigger, "~/Documents/x.pdf"));
    }

    #[test]
    fn file_matches_without_pattern_accepts_any_file() {
        let trigger = Trigger::FileWatch {
            path: "~/Downloads".into(),
            pattern: None,
        };
        assert!(file_matches(&trigger, "~/Downloads/anything.bin"));
        assert!(!file_matches(&trigger, "~/Desktop/anything.bin"));
    }

    #[test]
    fn email_matches_unset_patterns_are_vacuous() {
        let trigger = Trigger::EmailMatch {
            from_pattern: None,
            subject_pattern: None,
        };
        let email = EmailMessage {
            from: "anyone@example.com".into(),
            subject: "whatever".into(),
        };
        assert!(email_matches(&trigger, &email));
    }

    #[test]
    fn email_matches_is_and_of_set_patterns() {
        let trigger = Trigger::EmailMatch {
            from_pattern: Some("acme.com".into()),
            subject_pattern: Some("Invoice".into()),
        };

        let hit = EmailMessage {
            from: "billing@acme.com".into(),
            subject: "your invoice for August".into(),
        };
        assert!(email_matches(&trigger, &hit));

        let wrong_sender = EmailMessage {
            from: "billing@other.com".into(),
            subject: "your invoice for August".into(),
        };
        assert!(!email_matches(&trigger, &wrong_sender));

        let wrong_subject = EmailMessage {
            from: "billing@acme.com".into(),
            subject: "newsletter".into(),
        };
        assert!(!email_matches(&trigger, &wrong_subject));
    }

    #[test]
    fn trigger_json_roundtrip() {
        let trigger = Trigger::Schedule {
            frequency: Frequency::Weekly,
            day_of_week: Some(5),
            hour: 17,
            minute: None,
        };
        let value = serde_json::to_value(&trigger).unwrap();
        assert_eq!(value["type"], "schedule");
        assert_eq!(value["day_of_week"], 5);

        let back: Trigger = serde_json::from_value(value).unwrap();
        assert_eq!(back, trigger);
    }

    async fn setup_manager() -> (TriggerManager, WorkflowStore) {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let workflows = WorkflowStore::new(db.clone());
        let history = TriggerStore::new(db);
        (
            TriggerManager::new(workflows.clone(), history),
            workflows,
        )
    }

    #[tokio::test]
    async fn due_scan_matches_only_enabled_schedules() {
        let (manager, workflows) = setup_manager().await;

        let friday_5pm = serde_json::to_value(Trigger::Schedule {
            frequency: Frequency::Weekly,
            day_of_week: Some(5),
            hour: 17,
            minute: None,
        })
        .unwrap();

        let due_wf = workflows
            .create("due", None, friday_5pm.clone(), serde_json::json!([]))
            .await
            .unwrap();
        let disabled_wf = workflows
            .create("disabled", None, friday_5pm, serde_json::json!([]))
            .await
            .unwrap();
        let manual_wf = workflows
            .create(
                "manual",
                None,
                serde_json::to_value(Trigger::Manual).unwrap(),
                serde_json::json!([]),
            )
            .await
            .unwrap();

        workflows.set_enabled(&disabled_wf.id, false).await.unwrap();

        let now = Utc.with_ymd_and_hms(2026, 8, 21, 17, 0, 0).unwrap();
        let due = manager.get_due_workflows(&now).await.unwrap();

        assert_eq!(due, vec![due_wf.id.clone()]);
        assert!(!due.contains(&manual_wf.id));
    }

    #[tokio::test]
    async fn trigger_history_roundtrip() {
        let (manager, workflows) = setup_manager().await;
        let workflow = workflows
            .create(
                "wf",
                None,
                serde_json::to_value(Trigger::Manual).unwrap(),
                serde_json::json!([]),
            )
            .await
            .unwrap();

        manager
            .record_trigger(&workflow.id, "manual", json!({"source": "user"}))
            .await
            .unwrap();
        manager
            .record_schedule_firing(&workflow.id, &Utc::now())
            .await
            .unwrap();

        let history = manager.get_trigger_history(&workflow.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].trigger_type, "manual");
        assert_eq!(history[1].trigger_type, "schedule");
    }
}

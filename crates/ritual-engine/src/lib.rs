//! Workflow automation core.
//!
//! The engine turns a natural-language request into a persistent,
//! confidence-gated workflow:
//!
//! 1. [`IntentParser`] extracts a trigger, data sources, and destinations
//!    from the request text.
//! 2. [`PlanGenerator`] turns the intent into an ordered step plan with
//!    typed parameters.
//! 3. [`WorkflowRunner`] executes runs: low-confidence steps ask for
//!    approval, high-confidence steps run on their own, and transient
//!    tool failures are retried.
//! 4. [`ConfidenceTracker`] moves per-step scores with every approval,
//!    correction, and skip, and detects recurring corrections.
//! 5. [`TriggerManager`] decides which workflows are due for the current
//!    instant and keeps the firing audit trail.
//!
//! Persistence lives in the `ritual-store` crate; external effects go
//! through the [`ToolExecutor`] seam.

pub mod confidence;
pub mod error;
pub mod executor;
pub mod export;
pub mod parser;
pub mod plan;
pub mod recovery;
pub mod runner;
pub mod runtime;
pub mod trigger;

pub use confidence::{AUTONOMY_THRESHOLD, ConfidenceTracker, CorrectionPattern};
pub use error::{EngineError, Result};
pub use executor::{ToolError, ToolExecutor};
pub use export::{CollisionPolicy, ExportImport, WorkflowDocument};
pub use parser::{Destination, Intent, IntentParser, Source, SourceKind};
pub use plan::{ParamValue, PlanGenerator, Step};
pub use recovery::{Backoff, ErrorClass, ErrorRecovery, RetryPolicy};
pub use runner::{ApprovalHandler, StepDecision, WorkflowRunner};
pub use runtime::Runtime;
pub use trigger::{EmailMessage, Frequency, Trigger, TriggerManager};

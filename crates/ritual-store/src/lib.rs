//! Persistence for ritual.
//!
//! This crate provides:
//!
//! - **Database handle**: SQLite behind an async-friendly wrapper via
//!   [`db::Database`].
//! - **Migrations**: versioned, idempotent schema setup via [`migration`].
//! - **Stores**: one per table family — [`workflow_store::WorkflowStore`],
//!   [`run_store::RunStore`], [`correction_store::CorrectionStore`], and
//!   [`trigger_store::TriggerStore`].

pub mod correction_store;
pub mod db;
pub mod error;
pub mod migration;
pub mod run_store;
pub mod trigger_store;
pub mod workflow_store;

pub use correction_store::{CorrectionStore, StoredCorrection};
pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use run_store::{RunStatus, RunStore, StoredRun};
pub use trigger_store::{StoredTriggerRecord, TriggerStore};
pub use workflow_store::{StoredWorkflow, WorkflowStore};

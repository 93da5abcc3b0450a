//! Engine error types.
//!
//! All engine subsystems surface errors through [`EngineError`]. Each
//! variant carries enough context for callers to decide how to handle the
//! failure.

/// Unified error type for the workflow engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // -- Planning errors -----------------------------------------------------
    /// The intent has neither sources nor destinations, so no plan can be
    /// generated. Surfaced to the caller; a run never starts.
    #[error("cannot plan `{intent_name}`: intent has no sources or destinations")]
    EmptyPlan { intent_name: String },

    // -- Runtime errors ------------------------------------------------------
    /// A step parameter references an output key that no earlier step
    /// produced. This signals a planner bug or out-of-order execution and
    /// is fatal — never retried.
    #[error("unresolved reference `${name}` in step {step_id}")]
    UnresolvedReference { step_id: u32, name: String },

    // -- Export/import errors ------------------------------------------------
    /// Import would collide with an existing workflow name.
    #[error("workflow `{name}` already exists")]
    DuplicateName { name: String },

    /// An export document is malformed.
    #[error("invalid workflow document: {reason}")]
    InvalidDocument { reason: String },

    // -- Workflow errors -----------------------------------------------------
    /// The referenced workflow does not exist.
    #[error("workflow not found: {workflow_id}")]
    WorkflowNotFound { workflow_id: String },

    // -- Upstream crate errors -----------------------------------------------
    /// An error propagated from the storage layer.
    #[error("store error: {0}")]
    Store(#[from] ritual_store::StoreError),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the engine crate.
pub type Result<T> = std::result::Result<T, EngineError>;

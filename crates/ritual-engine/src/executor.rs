//! Tool execution seam.
//!
//! The engine never talks to the outside world directly; every step is
//! dispatched through a [`ToolExecutor`]. Implementations live with the
//! host application (filesystem globbing, PDF extraction, HTTP fetches),
//! and tests substitute scripted fakes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

/// Failure from an external tool invocation.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Could not reach the resource. Retryable.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The invocation timed out. Retryable.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The target resource does not exist. Not retryable, but the run
    /// may continue without this step's output.
    #[error("not found: {0}")]
    NotFound(String),

    /// The tool ran and failed. Fatal for the run.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The tool name is not known to this executor. Fatal for the run.
    #[error("unknown tool: {0}")]
    UnknownTool(String),
}

/// Dispatches a named tool with resolved parameters.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Invoke `tool` with `params` and return its output value.
    async fn invoke(
        &self,
        tool: &str,
        params: &BTreeMap<String, Value>,
    ) -> Result<Value, ToolError>;
}

use actors::BackendError;
use db::DbError;
use jobs_core::{JobId, ValidationError};
use thiserror::Error;

/// Errors returned by the orchestrator facade.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The submission was rejected before anything was written.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Job not found: {0}")]
    NotFound(JobId),
    #[error("Job record store error: {0}")]
    RecordStore(#[from] DbError),
    #[error("Queue backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Orchestrator is shutting down")]
    ShuttingDown,
    #[error("Failed to start: {0}")]
    Startup(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

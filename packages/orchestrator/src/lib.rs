//! Document job orchestration.
//!
//! [`Orchestrator`] is the entry point: it validates submissions, writes the
//! job record, enqueues the job and runs the worker pool over the pipeline
//! handlers.
//!
//! # Usage
//!
//! ```ignore
//! use orchestrator::{Orchestrator, OrchestratorConfig, telemetry};
//!
//! telemetry::init_tracing();
//! let orchestrator = Orchestrator::start(OrchestratorConfig::from_env()?, collaborators).await?;
//! orchestrator.schedule_recurring_maintenance().await?;
//!
//! let id = orchestrator
//!     .submit_resume_optimization(
//!         "user-1",
//!         "ada@example.com",
//!         "doc-1",
//!         "Rust engineer",
//!         "modern",
//!         true,
//!     )
//!     .await?;
//! let status = orchestrator.job_status(id).await?;
//!
//! orchestrator.shutdown().await?;
//! ```

mod config;
mod error;
mod intake;
mod orchestrator;
pub mod scheduler;
pub mod telemetry;

pub use config::{
    ENV_DB_DATABASE, ENV_DB_ENDPOINT, ENV_DB_NAMESPACE, ENV_SHUTDOWN_GRACE_SECS,
    ENV_STALE_DOCUMENT_HOURS, OrchestratorConfig,
};
pub use error::OrchestratorError;
pub use intake::JobIntake;
pub use orchestrator::{JobStatusView, Orchestrator};

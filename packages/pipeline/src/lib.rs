//! Job handlers for the document pipelines.
//!
//! One [`JobHandler`](actors::JobHandler) per job kind:
//! - [`ResumeOptimizationHandler`] - lookup, optimize, render, notify
//! - [`TemplateGenerationHandler`] - create document, optionally optimize, render, notify
//! - [`NotificationDeliveryHandler`] - decode attachments and deliver once
//! - [`MaintenanceHandler`] - purge, cancel, cleanup and reclaim sweeps
//!
//! Handlers reach external engines only through the traits in
//! [`collaborators`], and submit follow-up jobs through a [`JobSubmitter`].

pub mod collaborators;
mod maintenance;
mod notification;
mod resume;
mod submitter;
mod template;

use std::sync::Arc;

use actors::{JobHandlerRegistry, QueueBackend};
use db::repositories::JobRecordRepository;

pub use collaborators::{
    CollaboratorError, CollaboratorFuture, DocumentRenderer, DocumentStore, NotificationSender,
    TextOptimizer,
};
pub use maintenance::{MaintenanceHandler, MaintenanceSettings};
pub use notification::NotificationDeliveryHandler;
pub use resume::{OPTIMIZATION_COMPLETE_TEMPLATE, ResumeOptimizationHandler};
pub use submitter::{JobSubmitter, SubmitFuture};
pub use template::{TEMPLATE_READY_TEMPLATE, TemplateGenerationHandler};

/// The external engines the pipelines call.
#[derive(Clone)]
pub struct Collaborators {
    pub documents: Arc<dyn DocumentStore>,
    pub optimizer: Arc<dyn TextOptimizer>,
    pub renderer: Arc<dyn DocumentRenderer>,
    pub sender: Arc<dyn NotificationSender>,
}

/// Build a registry with a handler for every job kind.
pub fn handler_registry(
    collaborators: &Collaborators,
    submitter: Arc<dyn JobSubmitter>,
    records: JobRecordRepository,
    backend: Arc<dyn QueueBackend>,
    settings: MaintenanceSettings,
) -> JobHandlerRegistry {
    let mut registry = JobHandlerRegistry::new();
    registry.register(ResumeOptimizationHandler::new(collaborators.clone(), submitter.clone()));
    registry.register(TemplateGenerationHandler::new(collaborators.clone(), submitter));
    registry.register(NotificationDeliveryHandler::new(collaborators.sender.clone()));
    registry.register(MaintenanceHandler::new(
        records,
        collaborators.documents.clone(),
        backend,
        settings,
    ));
    registry
}

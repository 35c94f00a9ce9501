//! Job handler trait and registry.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use jobs_core::{HandlerError, Job, JobId, JobKind, QueueName};

use crate::backend::QueueBackend;

/// Result type for job handlers. The value becomes the record's output.
pub type HandlerResult = Result<serde_json::Value, HandlerError>;

/// Future type for async job handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Trait for job handlers.
///
/// Implement this trait to define how jobs of a specific kind are processed.
pub trait JobHandler: Send + Sync + 'static {
    /// The job kind this handler processes.
    fn kind(&self) -> JobKind;

    /// Process a job and return its output.
    fn handle(&self, job: &Job, progress: ProgressReporter) -> HandlerFuture;
}

/// Registry for job handlers.
///
/// Maps job kinds to their handlers for dynamic dispatch.
#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
}

impl JobHandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler, replacing any previous one for the same kind.
    pub fn register<H: JobHandler>(&mut self, handler: H) {
        self.handlers.insert(handler.kind(), Arc::new(handler));
    }

    /// Get the handler for a job kind.
    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(&kind).cloned()
    }
}

/// A simple function-based job handler.
pub struct FnHandler<F>
where
    F: Fn(&Job, ProgressReporter) -> HandlerFuture + Send + Sync + 'static,
{
    kind: JobKind,
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Job, ProgressReporter) -> HandlerFuture + Send + Sync + 'static,
{
    /// Create a new function-based handler.
    pub fn new(kind: JobKind, handler: F) -> Self {
        Self { kind, handler }
    }
}

impl<F> JobHandler for FnHandler<F>
where
    F: Fn(&Job, ProgressReporter) -> HandlerFuture + Send + Sync + 'static,
{
    fn kind(&self) -> JobKind {
        self.kind
    }

    fn handle(&self, job: &Job, progress: ProgressReporter) -> HandlerFuture {
        (self.handler)(job, progress)
    }
}

/// Reports a running job's progress to the queue backend.
///
/// Cheap to clone. Reports are fire-and-forget and clamped to 0-100.
#[derive(Clone)]
pub struct ProgressReporter {
    queue: QueueName,
    job_id: JobId,
    backend: Option<Arc<dyn QueueBackend>>,
    last: Arc<AtomicU8>,
}

impl ProgressReporter {
    pub fn new(backend: Arc<dyn QueueBackend>, queue: QueueName, job_id: JobId) -> Self {
        Self {
            queue,
            job_id,
            backend: Some(backend),
            last: Arc::new(AtomicU8::new(0)),
        }
    }

    /// A reporter that only remembers the last value. Used when a handler is
    /// run outside a worker.
    pub fn detached(queue: QueueName, job_id: JobId) -> Self {
        Self {
            queue,
            job_id,
            backend: None,
            last: Arc::new(AtomicU8::new(0)),
        }
    }

    pub fn report(&self, progress: u8) {
        let progress = progress.min(100);
        self.last.store(progress, Ordering::Relaxed);
        if let Some(backend) = &self.backend {
            backend.report_progress(self.queue, self.job_id, progress);
        }
    }

    /// Last value passed to [`report`](Self::report).
    pub fn last(&self) -> u8 {
        self.last.load(Ordering::Relaxed)
    }
}

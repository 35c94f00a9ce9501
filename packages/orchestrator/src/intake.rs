//! Validated submission: record first, then enqueue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use actors::{EnqueueRequest, QueueBackend};
use db::repositories::JobRecordRepository;
use jobs_core::{HandlerError, JobId, JobRecord, JobRequest, Priority};
use pipeline::{JobSubmitter, SubmitFuture};

use crate::error::OrchestratorError;

const ENQUEUE_FAILED_REASON: &str = "job could not be queued";

/// Turns requests into a `Pending` record plus a queued job.
///
/// Shared by the facade and by handlers that chain follow-up jobs. Closing the
/// intake refuses outside submissions only; jobs finishing during shutdown can
/// still chain their follow-ups, which stay queued for the next start.
pub struct JobIntake {
    records: JobRecordRepository,
    backend: Arc<dyn QueueBackend>,
    closed: AtomicBool,
}

impl JobIntake {
    pub fn new(records: JobRecordRepository, backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            records,
            backend,
            closed: AtomicBool::new(false),
        }
    }

    /// Submit with the priority the request's policy assigns.
    pub async fn submit(&self, request: JobRequest) -> Result<JobId, OrchestratorError> {
        let priority = request.priority();
        self.submit_with_priority(request, priority).await
    }

    pub async fn submit_with_priority(
        &self,
        request: JobRequest,
        priority: Priority,
    ) -> Result<JobId, OrchestratorError> {
        if self.is_closed() {
            return Err(OrchestratorError::ShuttingDown);
        }
        self.record_and_enqueue(request, priority).await
    }

    async fn record_and_enqueue(
        &self,
        request: JobRequest,
        priority: Priority,
    ) -> Result<JobId, OrchestratorError> {
        request.validate()?;

        let id = JobId::new();
        let kind = request.kind();
        let payload = request.to_payload();

        let record = JobRecord::pending(id, kind, priority, payload.clone())
            .with_related_entity(request.related_entity_id(id));
        self.records.create(&record).await?;

        if let Err(e) = self
            .backend
            .enqueue(EnqueueRequest::new(id, kind, payload, priority))
            .await
        {
            tracing::warn!(job_id = %id, %kind, "Failed to enqueue job: {}", e);
            if let Err(cancel_err) = self.records.cancel(id, ENQUEUE_FAILED_REASON).await {
                tracing::warn!(
                    job_id = %id,
                    "Failed to cancel unqueued job record: {}",
                    cancel_err
                );
            }
            return Err(e.into());
        }

        tracing::info!(job_id = %id, %kind, %priority, "Job submitted");
        Ok(id)
    }

    /// Refuse further outside submissions.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl JobSubmitter for JobIntake {
    fn submit_chained(&self, request: JobRequest, priority: Priority) -> SubmitFuture<'_> {
        Box::pin(async move {
            self.record_and_enqueue(request, priority)
                .await
                .map_err(|e| match e {
                    OrchestratorError::Validation(err) => HandlerError::from(err),
                    other => HandlerError::transient(other.to_string()),
                })
        })
    }
}

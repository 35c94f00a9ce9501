use std::future::Future;
use std::pin::Pin;

use jobs_core::{HandlerError, JobId, JobRequest, Priority};

pub type SubmitFuture<'a> = Pin<Box<dyn Future<Output = Result<JobId, HandlerError>> + Send + 'a>>;

/// Submits follow-up jobs from inside a running handler.
///
/// Implemented by the orchestrator's intake, which validates the request,
/// writes its record and enqueues it like any other submission. The chained
/// job runs with `priority` instead of the policy priority of `request`.
pub trait JobSubmitter: Send + Sync {
    fn submit_chained(&self, request: JobRequest, priority: Priority) -> SubmitFuture<'_>;
}

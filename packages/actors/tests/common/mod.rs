#![allow(dead_code)]

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use actors::{ActorQueueBackend, BackendError, EnqueueRequest, QueueBackend};
use db::repositories::{JobRecordRepository, QueueEntryRepository, ScheduleRepository};
use db::{Database, DbConfig, DbError};
use jobs_core::{JobId, JobKind, JobRecord, Priority, QueueName, QueuePolicy};

pub async fn setup_db() -> Result<Database, DbError> {
    let database = format!("test_{}", ulid::Ulid::new());
    db::init(&DbConfig::memory().with_database(database)).await
}

/// Default policies with a 10 ms retry base so retry tests finish quickly.
pub fn fast_policies() -> BTreeMap<QueueName, QueuePolicy> {
    QueueName::ALL
        .into_iter()
        .map(|q| (q, QueuePolicy::for_queue(q).with_backoff_base(Duration::from_millis(10))))
        .collect()
}

pub async fn start_backend(
    db: &Database,
    policies: &BTreeMap<QueueName, QueuePolicy>,
) -> Result<Arc<ActorQueueBackend>, BackendError> {
    let backend = ActorQueueBackend::start(
        policies,
        QueueEntryRepository::new(db.clone()),
        ScheduleRepository::new(db.clone()),
    )
    .await?;
    Ok(Arc::new(backend))
}

/// Write a pending record and enqueue the matching job, as the orchestrator does.
pub async fn submit(
    records: &JobRecordRepository,
    backend: &dyn QueueBackend,
    kind: JobKind,
    priority: Priority,
    payload: serde_json::Value,
) -> Result<JobId, Box<dyn std::error::Error>> {
    let id = JobId::new();
    records
        .create(&JobRecord::pending(id, kind, priority, payload.clone()))
        .await?;
    backend
        .enqueue(EnqueueRequest::new(id, kind, payload, priority))
        .await?;
    Ok(id)
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Dequeue, retrying until a job is ready or `timeout` elapses.
pub async fn dequeue_within(
    backend: &dyn QueueBackend,
    queue: QueueName,
    kind: JobKind,
    timeout: Duration,
) -> Result<Option<jobs_core::Job>, BackendError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(job) = backend.dequeue(queue, kind, "test-worker").await? {
            return Ok(Some(job));
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

//! Queue backend abstraction and its actor-based implementation.
//!
//! Workers and the orchestrator only talk to [`QueueBackend`]. The shipped
//! [`ActorQueueBackend`] runs one [`QueueActor`] per named queue and persists
//! entries and recurring schedules through the db repositories.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::time::Duration;

use db::DbError;
use db::repositories::{QueueEntryRepository, ScheduleRepository};
use jobs_core::{
    HandlerError, Job, JobId, JobKind, Priority, QueueCounts, QueueName, QueuePolicy,
    RecurringSchedule,
};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef, RpcReplyPort};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::messages::QueueMessage;
use crate::queue_actor::{QueueActor, QueueActorArgs};

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Queue backend errors.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Queue backend unavailable: {0}")]
    Unavailable(String),
    #[error("Unknown job: {0}")]
    UnknownJob(JobId),
    #[error("Invalid schedule {schedule_id}: {message}")]
    InvalidSchedule { schedule_id: String, message: String },
    #[error("Persistence error: {0}")]
    Persistence(#[from] DbError),
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    /// Re-enqueued; becomes ready again after `delay`.
    Retrying { delay: Duration },
    /// No attempts left, or the error was permanent.
    Exhausted,
}

/// A job to place on its kind's queue.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    /// Id assigned at submission and shared with the job record.
    pub id: JobId,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub delay: Option<Duration>,
}

impl EnqueueRequest {
    pub fn new(id: JobId, kind: JobKind, payload: serde_json::Value, priority: Priority) -> Self {
        Self {
            id,
            kind,
            payload,
            priority,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queue(&self) -> QueueName {
        self.kind.queue()
    }

    /// Build the queue entry with the retry settings the policy gives its kind.
    pub fn into_job(self, policy: &QueuePolicy) -> Job {
        let mut options = policy.job_options(self.kind);
        options.delay_ms = self.delay.map(|d| d.as_millis() as u64);

        Job::new(self.id, self.kind, self.payload, &options).with_priority(self.priority)
    }
}

/// Future type returned by backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

/// Named queues with priority ordering, retries and recurring triggers.
pub trait QueueBackend: Send + Sync + 'static {
    fn enqueue(&self, request: EnqueueRequest) -> BackendFuture<'_, JobId>;

    /// Next ready job of `kind`, if any. The job becomes active for `worker_id`.
    fn dequeue(
        &self,
        queue: QueueName,
        kind: JobKind,
        worker_id: &str,
    ) -> BackendFuture<'_, Option<Job>>;

    fn ack(&self, queue: QueueName, id: JobId) -> BackendFuture<'_, ()>;

    fn nack(
        &self,
        queue: QueueName,
        id: JobId,
        error: HandlerError,
    ) -> BackendFuture<'_, NackOutcome>;

    /// Remove an active job that will not run. It counts as neither completed
    /// nor failed.
    fn discard(&self, queue: QueueName, id: JobId) -> BackendFuture<'_, ()>;

    /// Fire-and-forget progress update.
    fn report_progress(&self, queue: QueueName, id: JobId, progress: u8);

    fn progress(&self, queue: QueueName, id: JobId) -> BackendFuture<'_, Option<u8>>;

    /// Whether the job still has an unfinished entry.
    fn is_live(&self, queue: QueueName, id: JobId) -> BackendFuture<'_, bool>;

    /// Nack every job held by a worker that died, as if its handler had
    /// returned `error`.
    fn fail_worker(
        &self,
        queue: QueueName,
        worker_id: &str,
        error: HandlerError,
    ) -> BackendFuture<'_, Vec<(JobId, NackOutcome)>>;

    fn statistics(&self) -> BackendFuture<'_, BTreeMap<QueueName, QueueCounts>>;

    /// Insert or replace the trigger with the schedule's id.
    fn upsert_recurring(&self, schedule: RecurringSchedule) -> BackendFuture<'_, ()>;

    fn recurring(&self, queue: QueueName) -> BackendFuture<'_, Vec<RecurringSchedule>>;

    /// Stop handing out jobs and firing triggers. In-flight jobs may still ack,
    /// and enqueued jobs are kept for the next start.
    fn drain(&self) -> BackendFuture<'_, ()>;

    /// Stop every queue.
    fn close(&self) -> BackendFuture<'_, ()>;
}

/// Parse a cron expression. Five-field expressions get a leading seconds field.
pub fn parse_cron(schedule_id: &str, expression: &str) -> Result<cron::Schedule, BackendError> {
    let normalized = if expression.split_whitespace().count() == 5 {
        format!("0 {}", expression.trim())
    } else {
        expression.trim().to_string()
    };

    cron::Schedule::from_str(&normalized).map_err(|e| BackendError::InvalidSchedule {
        schedule_id: schedule_id.to_string(),
        message: e.to_string(),
    })
}

/// [`QueueBackend`] backed by one ractor actor per queue.
pub struct ActorQueueBackend {
    queues: HashMap<QueueName, ActorRef<QueueMessage>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ActorQueueBackend {
    /// Spawn the queue actors. Each actor restores its persisted entries and
    /// schedules before accepting messages.
    pub async fn start(
        policies: &BTreeMap<QueueName, QueuePolicy>,
        entries: QueueEntryRepository,
        schedules: ScheduleRepository,
    ) -> Result<Self, BackendError> {
        let mut queues = HashMap::new();
        let mut handles = Vec::new();

        for queue in QueueName::ALL {
            let policy = policies
                .get(&queue)
                .cloned()
                .unwrap_or_else(|| QueuePolicy::for_queue(queue));

            let args = QueueActorArgs {
                queue,
                policy,
                entries: entries.clone(),
                schedules: schedules.clone(),
            };

            let (actor, handle) = Actor::spawn(None, QueueActor, args)
                .await
                .map_err(|e| {
                    BackendError::Unavailable(format!("failed to start queue {queue}: {e}"))
                })?;

            queues.insert(queue, actor);
            handles.push(handle);
        }

        tracing::info!("Queue backend started with {} queues", queues.len());

        Ok(Self {
            queues,
            handles: Mutex::new(handles),
        })
    }

    fn actor(&self, queue: QueueName) -> Result<&ActorRef<QueueMessage>, BackendError> {
        self.queues
            .get(&queue)
            .ok_or_else(|| BackendError::Unavailable(format!("queue {queue} is not running")))
    }

    async fn call<T, F>(&self, queue: QueueName, build: F) -> Result<T, BackendError>
    where
        T: Send + 'static,
        F: FnOnce(RpcReplyPort<T>) -> QueueMessage + Send,
    {
        let actor = self.actor(queue)?;
        match ractor::rpc::call(actor, build, Some(CALL_TIMEOUT)).await {
            Ok(CallResult::Success(value)) => Ok(value),
            Ok(CallResult::Timeout) => {
                Err(BackendError::Unavailable(format!("queue {queue} timed out")))
            }
            Ok(CallResult::SenderError) | Err(_) => {
                Err(BackendError::Unavailable(format!("queue {queue} stopped")))
            }
        }
    }
}

impl QueueBackend for ActorQueueBackend {
    fn enqueue(&self, request: EnqueueRequest) -> BackendFuture<'_, JobId> {
        Box::pin(async move {
            let queue = request.queue();
            self.call(queue, |reply| QueueMessage::Enqueue {
                request: Box::new(request),
                reply,
            })
            .await?
        })
    }

    fn dequeue(
        &self,
        queue: QueueName,
        kind: JobKind,
        worker_id: &str,
    ) -> BackendFuture<'_, Option<Job>> {
        let worker_id = worker_id.to_string();
        Box::pin(async move {
            self.call(queue, |reply| QueueMessage::Dequeue { kind, worker_id, reply })
                .await
        })
    }

    fn ack(&self, queue: QueueName, id: JobId) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.call(queue, |reply| QueueMessage::Ack { job_id: id, reply })
                .await?
        })
    }

    fn nack(
        &self,
        queue: QueueName,
        id: JobId,
        error: HandlerError,
    ) -> BackendFuture<'_, NackOutcome> {
        Box::pin(async move {
            self.call(queue, |reply| QueueMessage::Nack {
                job_id: id,
                error,
                reply,
            })
            .await?
        })
    }

    fn discard(&self, queue: QueueName, id: JobId) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            self.call(queue, |reply| QueueMessage::Discard { job_id: id, reply })
                .await
        })
    }

    fn report_progress(&self, queue: QueueName, id: JobId, progress: u8) {
        if let Ok(actor) = self.actor(queue) {
            let _ = actor.send_message(QueueMessage::Progress { job_id: id, progress });
        }
    }

    fn progress(&self, queue: QueueName, id: JobId) -> BackendFuture<'_, Option<u8>> {
        Box::pin(async move {
            self.call(queue, |reply| QueueMessage::GetProgress { job_id: id, reply })
                .await
        })
    }

    fn is_live(&self, queue: QueueName, id: JobId) -> BackendFuture<'_, bool> {
        Box::pin(async move {
            self.call(queue, |reply| QueueMessage::IsLive { job_id: id, reply })
                .await
        })
    }

    fn fail_worker(
        &self,
        queue: QueueName,
        worker_id: &str,
        error: HandlerError,
    ) -> BackendFuture<'_, Vec<(JobId, NackOutcome)>> {
        let worker_id = worker_id.to_string();
        Box::pin(async move {
            self.call(queue, |reply| QueueMessage::FailWorker {
                worker_id,
                error,
                reply,
            })
            .await
        })
    }

    fn statistics(&self) -> BackendFuture<'_, BTreeMap<QueueName, QueueCounts>> {
        Box::pin(async move {
            let mut stats = BTreeMap::new();
            for queue in QueueName::ALL {
                let counts = self.call(queue, |reply| QueueMessage::Counts { reply }).await?;
                stats.insert(queue, counts);
            }
            Ok(stats)
        })
    }

    fn upsert_recurring(&self, schedule: RecurringSchedule) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            let queue = schedule.queue();
            self.call(queue, |reply| QueueMessage::UpsertRecurring { schedule, reply })
                .await?
        })
    }

    fn recurring(&self, queue: QueueName) -> BackendFuture<'_, Vec<RecurringSchedule>> {
        Box::pin(async move {
            self.call(queue, |reply| QueueMessage::ListRecurring { reply })
                .await
        })
    }

    fn drain(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            for actor in self.queues.values() {
                let _ = actor.send_message(QueueMessage::Drain);
            }
            Ok(())
        })
    }

    fn close(&self) -> BackendFuture<'_, ()> {
        Box::pin(async move {
            for actor in self.queues.values() {
                actor.stop(None);
            }

            let handles = std::mem::take(&mut *self.handles.lock().await);
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::warn!("Queue actor did not stop cleanly: {}", e);
                }
            }

            tracing::info!("Queue backend closed");
            Ok(())
        })
    }
}

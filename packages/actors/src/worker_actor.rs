//! Worker actor for executing jobs.

use std::sync::Arc;
use std::time::Duration;

use db::DbError;
use db::repositories::JobRecordRepository;
use jobs_core::{HandlerError, Job, JobKind, JobRecord, JobStatus, QueueName, Transition};
use ractor::{Actor, ActorProcessingErr, ActorRef};

use crate::backend::{NackOutcome, QueueBackend};
use crate::handler::{JobHandlerRegistry, ProgressReporter};
use crate::messages::WorkerMessage;

/// Worker actor arguments.
#[derive(Clone)]
pub struct WorkerArgs {
    pub worker_id: String,
    pub queue: QueueName,
    /// The kind this worker's concurrency slot belongs to.
    pub kind: JobKind,
    pub backend: Arc<dyn QueueBackend>,
    pub handlers: Arc<JobHandlerRegistry>,
    pub records: JobRecordRepository,
    /// How long to wait before polling again when the queue is empty.
    pub poll_interval: Duration,
}

/// State for the worker actor.
pub struct WorkerActorState {
    args: WorkerArgs,
    /// Jobs this worker has run to an ack or nack.
    pub processed: u64,
}

/// What the worker should do with a dequeued job after touching its record.
enum Admission {
    Run,
    Skip(JobStatus),
}

impl WorkerActorState {
    fn new(args: WorkerArgs) -> Self {
        Self { args, processed: 0 }
    }

    /// Move the record to processing. A record that is already processing
    /// belongs to an earlier attempt of the same job.
    async fn admit(&self, job: &Job) -> Result<Admission, DbError> {
        if job.schedule_id.is_some() {
            let record = JobRecord::pending(job.id, job.kind, job.priority, job.payload.clone());
            self.args.records.ensure(&record).await?;
        }

        match self.args.records.begin_processing(job.id).await? {
            Transition::Applied(_) => Ok(Admission::Run),
            Transition::Ignored(record) if record.status == JobStatus::Processing => {
                tracing::debug!(
                    job_id = %job.id,
                    attempt = job.attempt,
                    "Resuming job already processing"
                );
                Ok(Admission::Run)
            }
            Transition::Ignored(record) => Ok(Admission::Skip(record.status)),
        }
    }

    async fn nack(&self, job: &Job, error: HandlerError) {
        let queue = self.args.queue;
        let message = error.message().to_string();

        match self.args.backend.nack(queue, job.id, error).await {
            Ok(NackOutcome::Exhausted) => {
                if let Err(e) = self.args.records.fail(job.id, &message).await {
                    tracing::warn!("Failed to mark job {} failed: {}", job.id, e);
                }
                tracing::warn!(job_id = %job.id, kind = %job.kind, error = %message, "Job failed");
            }
            Ok(NackOutcome::Retrying { delay }) => {
                tracing::info!(
                    job_id = %job.id,
                    kind = %job.kind,
                    attempt = job.attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Job attempt failed, retrying"
                );
            }
            Err(e) => tracing::warn!("Failed to nack job {}: {}", job.id, e),
        }
    }

    async fn ack(&self, job: &Job) {
        if let Err(e) = self.args.backend.ack(self.args.queue, job.id).await {
            tracing::warn!("Failed to ack job {}: {}", job.id, e);
        }
    }

    async fn process(&mut self, job: Job) {
        match self.admit(&job).await {
            Ok(Admission::Run) => {}
            Ok(Admission::Skip(status)) => {
                tracing::info!(
                    job_id = %job.id,
                    %status,
                    "Skipping job whose record is already {}",
                    status
                );
                if let Err(e) = self.args.backend.discard(self.args.queue, job.id).await {
                    tracing::warn!("Failed to discard job {}: {}", job.id, e);
                }
                return;
            }
            Err(DbError::NotFound(_)) => {
                self.nack(&job, HandlerError::permanent("job record is missing")).await;
                return;
            }
            Err(e) => {
                tracing::warn!("Failed to start job {}: {}", job.id, e);
                self.nack(&job, HandlerError::transient("job record store unavailable")).await;
                return;
            }
        }

        let Some(handler) = self.args.handlers.get(job.kind) else {
            let error = HandlerError::permanent(format!("no handler registered for {}", job.kind));
            self.nack(&job, error).await;
            return;
        };

        tracing::debug!(
            job_id = %job.id,
            kind = %job.kind,
            worker = %self.args.worker_id,
            "Running job"
        );
        let progress = ProgressReporter::new(self.args.backend.clone(), self.args.queue, job.id);

        match handler.handle(&job, progress).await {
            Ok(output) => match self.args.records.complete(job.id, output).await {
                Ok(_) => {
                    self.ack(&job).await;
                    tracing::info!(job_id = %job.id, kind = %job.kind, "Job completed");
                }
                Err(e) => {
                    tracing::warn!("Failed to record completion of job {}: {}", job.id, e);
                    self.nack(&job, HandlerError::transient("job record store unavailable")).await;
                }
            },
            Err(error) => self.nack(&job, error).await,
        }

        self.processed += 1;
    }
}

/// Worker actor that executes jobs of one kind from one queue.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::debug!("Starting worker: {}", args.worker_id);

        // Start the poll loop
        let interval = args.poll_interval;
        let myself_clone = myself.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if myself_clone.send_message(WorkerMessage::Poll).is_err() {
                    break;
                }
            }
        });

        Ok(WorkerActorState::new(args))
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll => {
                let args = &state.args;
                let job = match args.backend.dequeue(args.queue, args.kind, &args.worker_id).await {
                    Ok(job) => job,
                    Err(e) => {
                        tracing::debug!("Worker {} could not dequeue: {}", args.worker_id, e);
                        None
                    }
                };

                if let Some(job) = job {
                    state.process(job).await;
                    // More work may be waiting; don't sit out a full interval.
                    let _ = myself.send_message(WorkerMessage::Poll);
                }
            }
        }

        Ok(())
    }
}

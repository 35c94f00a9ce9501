//! Supervisor actor owning the worker pool.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use db::repositories::JobRecordRepository;
use jobs_core::{HandlerError, QueueName, QueuePolicy};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorCell, ActorId, ActorProcessingErr, ActorRef, SupervisionEvent};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::backend::{BackendError, NackOutcome, QueueBackend};
use crate::handler::JobHandlerRegistry;
use crate::messages::{ShutdownReport, SupervisorMessage, WorkerMessage};
use crate::worker_actor::{WorkerActor, WorkerArgs};

const DRAIN_POLL: Duration = Duration::from_millis(50);

/// Error recorded for an attempt whose worker died mid-job.
pub const WORKER_LOST_ERROR: &str = "worker stopped while the job was running";

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Per-queue policies; their concurrency maps decide how many workers run.
    pub policies: BTreeMap<QueueName, QueuePolicy>,
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            policies: QueueName::ALL
                .into_iter()
                .map(|q| (q, QueuePolicy::for_queue(q)))
                .collect(),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Everything the supervisor needs to spawn workers.
pub struct SupervisorArgs {
    pub config: WorkerPoolConfig,
    pub backend: Arc<dyn QueueBackend>,
    pub handlers: Arc<JobHandlerRegistry>,
    pub records: JobRecordRepository,
}

struct WorkerSlot {
    actor: ActorRef<WorkerMessage>,
    args: WorkerArgs,
    handle: JoinHandle<()>,
}

/// State for the supervisor actor.
pub struct SupervisorState {
    backend: Arc<dyn QueueBackend>,
    records: JobRecordRepository,
    workers: HashMap<ActorId, WorkerSlot>,
    stopping: bool,
}

async fn spawn_worker(
    supervisor: ActorCell,
    state: &mut SupervisorState,
    args: WorkerArgs,
) -> Result<(), ActorProcessingErr> {
    let (actor, handle) = Actor::spawn_linked(None, WorkerActor, args.clone(), supervisor)
        .await
        .map_err(|e| {
            ActorProcessingErr::from(format!("Failed to spawn worker {}: {}", args.worker_id, e))
        })?;

    state
        .workers
        .insert(actor.get_id(), WorkerSlot { actor, args, handle });
    Ok(())
}

/// Supervisor actor that spawns, restarts and stops workers.
pub struct Supervisor;

impl Actor for Supervisor {
    type Msg = SupervisorMessage;
    type State = SupervisorState;
    type Arguments = SupervisorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker pool supervisor");

        let mut state = SupervisorState {
            backend: args.backend.clone(),
            records: args.records.clone(),
            workers: HashMap::new(),
            stopping: false,
        };

        for (queue, policy) in &args.config.policies {
            for (kind, slots) in &policy.concurrency {
                for slot in 0..*slots {
                    let worker = WorkerArgs {
                        worker_id: format!("{}-{}-{}", queue, kind, slot),
                        queue: *queue,
                        kind: *kind,
                        backend: args.backend.clone(),
                        handlers: args.handlers.clone(),
                        records: args.records.clone(),
                        poll_interval: args.config.poll_interval,
                    };
                    spawn_worker(myself.get_cell(), &mut state, worker).await?;
                }
            }
        }

        tracing::info!("Worker pool started with {} workers", state.workers.len());
        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisorMessage::WorkerCount { reply } => {
                let _ = reply.send(state.workers.len());
            }

            SupervisorMessage::Shutdown { grace, reply } => {
                tracing::info!("Shutting down worker pool");
                state.stopping = true;

                if let Err(e) = state.backend.drain().await {
                    tracing::warn!("Failed to drain queues: {}", e);
                }

                let deadline = tokio::time::Instant::now() + grace;
                let mut in_flight = active_jobs(state.backend.as_ref()).await;
                while in_flight > 0 && tokio::time::Instant::now() < deadline {
                    tokio::time::sleep(DRAIN_POLL).await;
                    in_flight = active_jobs(state.backend.as_ref()).await;
                }

                if in_flight > 0 {
                    tracing::warn!("Grace period elapsed with {} job(s) still running", in_flight);
                }

                let workers: Vec<WorkerSlot> =
                    state.workers.drain().map(|(_, slot)| slot).collect();
                let count = workers.len();
                for slot in &workers {
                    if in_flight > 0 {
                        slot.actor.kill();
                    } else {
                        slot.actor.stop(None);
                    }
                }
                for slot in workers {
                    if let Err(e) = slot.handle.await {
                        tracing::warn!(
                            "Worker {} did not stop cleanly: {}",
                            slot.args.worker_id,
                            e
                        );
                    }
                }

                tracing::info!("Worker pool stopped ({} workers)", count);
                let _ = reply.send(ShutdownReport {
                    workers: count,
                    abandoned: in_flight,
                });
                myself.stop(None);
            }
        }

        Ok(())
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        message: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            SupervisionEvent::ActorFailed(cell, error) => {
                let Some(slot) = state.workers.remove(&cell.get_id()) else {
                    return Ok(());
                };
                if state.stopping {
                    return Ok(());
                }

                tracing::warn!("Worker {} failed: {}", slot.args.worker_id, error);
                fail_held_jobs(state, &slot.args).await;

                tracing::info!("Restarting worker {}", slot.args.worker_id);
                spawn_worker(myself.get_cell(), state, slot.args).await?;
            }
            SupervisionEvent::ActorTerminated(cell, _, reason) => {
                if let Some(slot) = state.workers.remove(&cell.get_id()) {
                    tracing::debug!("Worker {} terminated: {:?}", slot.args.worker_id, reason);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// The crash counts as a failed attempt of whatever the worker was running.
async fn fail_held_jobs(state: &SupervisorState, worker: &WorkerArgs) {
    let error = HandlerError::transient(WORKER_LOST_ERROR);
    let outcomes = match state
        .backend
        .fail_worker(worker.queue, &worker.worker_id, error)
        .await
    {
        Ok(outcomes) => outcomes,
        Err(e) => {
            tracing::warn!("Failed to release jobs of worker {}: {}", worker.worker_id, e);
            return;
        }
    };

    for (job_id, outcome) in outcomes {
        match outcome {
            NackOutcome::Exhausted => {
                if let Err(e) = state.records.fail(job_id, WORKER_LOST_ERROR).await {
                    tracing::warn!("Failed to mark job {} failed: {}", job_id, e);
                }
                tracing::warn!(
                    job_id = %job_id,
                    worker = %worker.worker_id,
                    "Job failed with its worker"
                );
            }
            NackOutcome::Retrying { delay } => tracing::info!(
                job_id = %job_id,
                delay_ms = delay.as_millis() as u64,
                "Job of lost worker scheduled for retry"
            ),
        }
    }
}

async fn active_jobs(backend: &dyn QueueBackend) -> u64 {
    match backend.statistics().await {
        Ok(stats) => stats.values().map(|c| c.active).sum(),
        Err(e) => {
            tracing::warn!("Failed to read queue statistics during drain: {}", e);
            0
        }
    }
}

/// Handle to a running worker pool.
pub struct WorkerPool {
    supervisor: ActorRef<SupervisorMessage>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Start the supervisor and one worker per configured concurrency slot.
    pub async fn start(
        config: WorkerPoolConfig,
        backend: Arc<dyn QueueBackend>,
        handlers: Arc<JobHandlerRegistry>,
        records: JobRecordRepository,
    ) -> Result<Self, ractor::SpawnErr> {
        let args = SupervisorArgs {
            config,
            backend,
            handlers,
            records,
        };
        let (supervisor, handle) = Actor::spawn(None, Supervisor, args).await?;

        Ok(Self {
            supervisor,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub async fn worker_count(&self) -> Result<usize, BackendError> {
        match ractor::rpc::call(
            &self.supervisor,
            |reply| SupervisorMessage::WorkerCount { reply },
            Some(Duration::from_secs(5)),
        )
        .await
        {
            Ok(CallResult::Success(count)) => Ok(count),
            _ => Err(BackendError::Unavailable("worker pool is not running".into())),
        }
    }

    /// Drain the queues, wait up to `grace` for running jobs, then stop every
    /// worker. Later calls return an empty report.
    pub async fn shutdown(&self, grace: Duration) -> Result<ShutdownReport, BackendError> {
        let Some(handle) = self.handle.lock().await.take() else {
            return Ok(ShutdownReport::default());
        };

        let timeout = grace + Duration::from_secs(5);
        let report = match ractor::rpc::call(
            &self.supervisor,
            |reply| SupervisorMessage::Shutdown { grace, reply },
            Some(timeout),
        )
        .await
        {
            Ok(CallResult::Success(report)) => report,
            _ => {
                self.supervisor.kill();
                return Err(BackendError::Unavailable("worker pool did not stop in time".into()));
            }
        };

        if let Err(e) = handle.await {
            tracing::warn!("Supervisor did not stop cleanly: {}", e);
        }
        Ok(report)
    }
}

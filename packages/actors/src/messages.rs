//! Message types for actor communication.

use std::time::Duration;

use jobs_core::{HandlerError, Job, JobId, JobKind, QueueCounts, RecurringSchedule};
use ractor::RpcReplyPort;

use crate::backend::{BackendError, EnqueueRequest, NackOutcome};

/// Messages for the QueueActor.
#[derive(Debug)]
pub enum QueueMessage {
    /// Add a job built from the request and the queue policy. Replies once
    /// the entry is persisted.
    Enqueue {
        request: Box<EnqueueRequest>,
        reply: RpcReplyPort<Result<JobId, BackendError>>,
    },

    /// Hand the next ready job of `kind` to a worker.
    Dequeue {
        kind: JobKind,
        worker_id: String,
        reply: RpcReplyPort<Option<Job>>,
    },

    /// The job finished successfully.
    Ack {
        job_id: JobId,
        reply: RpcReplyPort<Result<(), BackendError>>,
    },

    /// The job will not run; forget it without finalizing.
    Discard {
        job_id: JobId,
        reply: RpcReplyPort<()>,
    },

    /// The job attempt failed.
    Nack {
        job_id: JobId,
        error: HandlerError,
        reply: RpcReplyPort<Result<NackOutcome, BackendError>>,
    },

    /// Live progress from a running handler, 0-100.
    Progress { job_id: JobId, progress: u8 },

    /// Last reported progress of an active job.
    GetProgress {
        job_id: JobId,
        reply: RpcReplyPort<Option<u8>>,
    },

    /// Whether the job still has an unfinished entry.
    IsLive {
        job_id: JobId,
        reply: RpcReplyPort<bool>,
    },

    /// Fail the current attempt of every job held by a lost worker.
    FailWorker {
        worker_id: String,
        error: HandlerError,
        reply: RpcReplyPort<Vec<(JobId, NackOutcome)>>,
    },

    /// Current queue counts.
    Counts { reply: RpcReplyPort<QueueCounts> },

    /// Insert or replace a recurring trigger.
    UpsertRecurring {
        schedule: RecurringSchedule,
        reply: RpcReplyPort<Result<(), BackendError>>,
    },

    /// Registered recurring triggers.
    ListRecurring {
        reply: RpcReplyPort<Vec<RecurringSchedule>>,
    },

    /// Timer callback for a recurring trigger.
    FireRecurring { schedule_id: String },

    /// Stop handing out work and firing triggers.
    Drain,
}

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Try to take and run one job.
    Poll,
}

/// Messages for the Supervisor.
#[derive(Debug)]
pub enum SupervisorMessage {
    /// Number of live worker actors.
    WorkerCount { reply: RpcReplyPort<usize> },

    /// Drain, wait for in-flight jobs up to `grace`, then stop every worker.
    Shutdown {
        grace: Duration,
        reply: RpcReplyPort<ShutdownReport>,
    },
}

/// Outcome of a worker pool shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Workers stopped.
    pub workers: usize,
    /// Jobs still running when the grace period ran out.
    pub abandoned: u64,
}

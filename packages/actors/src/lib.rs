//! Actor system for the document job queues.
//!
//! This crate provides the Ractor-based queue backend and worker pool.
//!
//! # Architecture
//!
//! - `QueueActor` - Owns one named queue: priority ordering, delays, retries,
//!   retention and recurring triggers, persisted through the db repositories
//! - `ActorQueueBackend` - [`QueueBackend`] implementation over the queue actors
//! - `Supervisor` - Spawns one `WorkerActor` per concurrency slot, restarts
//!   workers that fail and counts the job they held as a failed attempt
//! - `WorkerActor` - Pulls jobs of one kind, drives the job record and runs the
//!   registered handler
//!
//! # Usage
//!
//! ```ignore
//! use actors::{ActorQueueBackend, JobHandlerRegistry, WorkerPool, WorkerPoolConfig};
//!
//! let backend = Arc::new(ActorQueueBackend::start(&policies, entries, schedules).await?);
//! let config = WorkerPoolConfig::default();
//! let pool = WorkerPool::start(config, backend.clone(), handlers, records).await?;
//!
//! // later
//! pool.shutdown(Duration::from_secs(30)).await?;
//! backend.close().await?;
//! ```

mod backend;
mod handler;
mod messages;
mod queue_actor;
mod supervisor;
mod worker_actor;

pub use backend::{
    ActorQueueBackend, BackendError, BackendFuture, EnqueueRequest, NackOutcome, QueueBackend,
    parse_cron,
};
pub use handler::{
    FnHandler, HandlerFuture, HandlerResult, JobHandler, JobHandlerRegistry, ProgressReporter,
};
pub use messages::{QueueMessage, ShutdownReport, SupervisorMessage, WorkerMessage};
pub use queue_actor::{QueueActor, QueueActorArgs};
pub use supervisor::{Supervisor, WORKER_LOST_ERROR, WorkerPool, WorkerPoolConfig};
pub use worker_actor::{WorkerActor, WorkerArgs};

/// Re-export ractor types for convenience.
pub use ractor::{Actor, ActorRef, RpcReplyPort, concurrency};

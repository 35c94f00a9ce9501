//! Core domain types for the document job system.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobKind and Priority for queue entries
//! - JobRecord and JobStatus for the durable lifecycle row
//! - QueueName, QueuePolicy and RecurringSchedule for queue configuration
//! - Submission payloads with their validation and priority policy

mod error;
mod job;
mod payload;
mod queue;
mod record;

pub use error::{HandlerError, ValidationError};
pub use job::{Backoff, Job, JobId, JobKind, JobOptions, Priority};
pub use payload::{
    AttachmentPayload, JobRequest, MaintenanceOperation, MaintenancePayload, NotificationPayload,
    PackageTier, ResumeOptimizationPayload, TemplateGenerationPayload, decode_payload,
    generated_document_id,
};
pub use queue::{QueueCounts, QueueName, QueuePolicy, RecurringSchedule, RetrySettings};
pub use record::{JobRecord, JobStatus, Transition};

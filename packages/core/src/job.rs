//! Job domain types for queue entries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::queue::QueueName;

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID.
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Execution priority. Lower values are dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Paid or urgent work, and the premium template package.
    pub const URGENT: Priority = Priority(1);
    /// The basic template package.
    pub const ELEVATED: Priority = Priority(3);
    /// Everything else.
    pub const STANDARD: Priority = Priority(5);

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::STANDARD
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of work a job performs. Used to route jobs to handlers and to
/// account per-kind concurrency budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ResumeOptimization,
    TemplateGeneration,
    NotificationDelivery,
    Maintenance,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::ResumeOptimization,
        JobKind::TemplateGeneration,
        JobKind::NotificationDelivery,
        JobKind::Maintenance,
    ];

    /// The queue jobs of this kind are routed to.
    pub fn queue(self) -> QueueName {
        match self {
            JobKind::ResumeOptimization | JobKind::TemplateGeneration => QueueName::Main,
            JobKind::NotificationDelivery => QueueName::Notification,
            JobKind::Maintenance => QueueName::Maintenance,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::ResumeOptimization => "resume_optimization",
            JobKind::TemplateGeneration => "template_generation",
            JobKind::NotificationDelivery => "notification_delivery",
            JobKind::Maintenance => "maintenance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        JobKind::ALL.into_iter().find(|kind| kind.as_str() == s)
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry delay policy. Only exponential backoff is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    Exponential { base_delay_ms: u64 },
}

impl Backoff {
    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential {
            base_delay_ms: base.as_millis() as u64,
        }
    }

    /// Delay before the retry that follows a failure at `attempt` (0-based):
    /// `base * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Exponential { base_delay_ms } => {
                let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
                Duration::from_millis(base_delay_ms.saturating_mul(factor))
            }
        }
    }
}

/// Per-enqueue execution options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Hold the job back for this long before it becomes ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

/// A job represents one unit of queued work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier, shared with the job record.
    pub id: JobId,
    /// The queue this job belongs to.
    pub queue: QueueName,
    /// Type of job (used for routing to handlers).
    pub kind: JobKind,
    /// Immutable input snapshot.
    pub payload: serde_json::Value,
    pub priority: Priority,
    /// Number of failed attempts so far.
    #[serde(default)]
    pub attempt: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Earliest time the job may be dequeued.
    pub run_at: DateTime<Utc>,
    pub enqueued_at: DateTime<Utc>,
    /// Set when the job was produced by a recurring schedule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_id: Option<String>,
}

impl Job {
    /// Create a job ready to run immediately.
    pub fn new(id: JobId, kind: JobKind, payload: serde_json::Value, options: &JobOptions) -> Self {
        let now = Utc::now();
        let run_at = options
            .delay_ms
            .map(|ms| now + chrono::Duration::milliseconds(ms as i64))
            .unwrap_or(now);
        Self {
            id,
            queue: kind.queue(),
            kind,
            payload,
            priority: Priority::default(),
            attempt: 0,
            max_attempts: options.max_attempts.max(1),
            backoff: options.backoff,
            run_at,
            enqueued_at: now,
            schedule_id: None,
        }
    }

    /// Set the priority for this job.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Mark this job as produced by a recurring schedule.
    pub fn with_schedule(mut self, schedule_id: impl Into<String>) -> Self {
        self.schedule_id = Some(schedule_id.into());
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.run_at <= now
    }
}

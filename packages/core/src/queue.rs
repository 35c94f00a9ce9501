//! Queue domain types: names, policies, statistics and recurring schedules.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::job::{Backoff, JobKind, JobOptions, Priority};

/// The named queues jobs are routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Main,
    Notification,
    Maintenance,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [
        QueueName::Main,
        QueueName::Notification,
        QueueName::Maintenance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::Main => "main",
            QueueName::Notification => "notification",
            QueueName::Maintenance => "maintenance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "main" => Some(QueueName::Main),
            "notification" => Some(QueueName::Notification),
            "maintenance" => Some(QueueName::Maintenance),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry, retention and concurrency policy for one queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuePolicy {
    /// Default attempts for jobs enqueued without an override.
    pub max_attempts: u32,
    /// Base delay of the exponential retry backoff.
    pub backoff_base_ms: u64,
    /// How many completed entries to retain.
    pub keep_completed: usize,
    /// How many failed entries to retain.
    pub keep_failed: usize,
    /// Worker count per job kind. Kinds missing here get no workers.
    pub concurrency: BTreeMap<JobKind, u32>,
    /// Attempt and backoff settings for kinds that differ from the queue default.
    #[serde(default)]
    pub kind_retry: BTreeMap<JobKind, RetrySettings>,
}

/// Attempts and backoff base for one job kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl QueuePolicy {
    /// Default policy for the given queue.
    pub fn for_queue(queue: QueueName) -> Self {
        let (max_attempts, concurrency) = match queue {
            QueueName::Main => (
                3,
                BTreeMap::from([
                    (JobKind::ResumeOptimization, 5),
                    (JobKind::TemplateGeneration, 3),
                ]),
            ),
            QueueName::Notification => (5, BTreeMap::from([(JobKind::NotificationDelivery, 10)])),
            // Maintenance runs once and never concurrently.
            QueueName::Maintenance => (1, BTreeMap::from([(JobKind::Maintenance, 1)])),
        };
        Self {
            max_attempts,
            backoff_base_ms: 2000,
            keep_completed: 100,
            keep_failed: 50,
            concurrency,
            kind_retry: BTreeMap::new(),
        }
    }

    /// Retry settings for `kind`, falling back to the queue default.
    pub fn retry_for(&self, kind: JobKind) -> RetrySettings {
        self.kind_retry.get(&kind).copied().unwrap_or(RetrySettings {
            max_attempts: self.max_attempts,
            backoff_base_ms: self.backoff_base_ms,
        })
    }

    /// Enqueue options for a job of `kind`.
    pub fn job_options(&self, kind: JobKind) -> JobOptions {
        let retry = self.retry_for(kind);
        JobOptions {
            max_attempts: retry.max_attempts,
            backoff: Backoff::exponential(Duration::from_millis(retry.backoff_base_ms)),
            delay_ms: None,
        }
    }

    pub fn concurrency_for(&self, kind: JobKind) -> u32 {
        self.concurrency.get(&kind).copied().unwrap_or(0)
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base_ms = base.as_millis() as u64;
        self
    }

    pub fn with_retention(mut self, keep_completed: usize, keep_failed: usize) -> Self {
        self.keep_completed = keep_completed;
        self.keep_failed = keep_failed;
        self
    }

    pub fn with_concurrency(mut self, kind: JobKind, workers: u32) -> Self {
        self.concurrency.insert(kind, workers);
        self
    }

    /// Give `kind` its own attempts and backoff base on this queue.
    pub fn with_kind_retry(
        mut self,
        kind: JobKind,
        max_attempts: u32,
        backoff_base: Duration,
    ) -> Self {
        self.kind_retry.insert(
            kind,
            RetrySettings {
                max_attempts,
                backoff_base_ms: backoff_base.as_millis() as u64,
            },
        );
        self
    }
}

/// Counts of jobs in each transient state of a queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

impl QueueCounts {
    /// Jobs not yet finalized.
    pub fn outstanding(&self) -> u64 {
        self.waiting + self.active + self.delayed
    }
}

/// A cron-style trigger that periodically enqueues a fixed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringSchedule {
    /// Stable identifier; registering the same id again replaces the trigger.
    pub schedule_id: String,
    pub cron_expression: String,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: Priority,
}

impl RecurringSchedule {
    pub fn new(
        schedule_id: impl Into<String>,
        cron_expression: impl Into<String>,
        kind: JobKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            schedule_id: schedule_id.into(),
            cron_expression: cron_expression.into(),
            kind,
            payload,
            priority: Priority::default(),
        }
    }

    pub fn queue(&self) -> QueueName {
        self.kind.queue()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policies() {
        let main = QueuePolicy::for_queue(QueueName::Main);
        assert_eq!(main.max_attempts, 3);
        assert_eq!(main.backoff_base_ms, 2000);
        assert_eq!(main.concurrency_for(JobKind::ResumeOptimization), 5);
        assert_eq!(main.concurrency_for(JobKind::TemplateGeneration), 3);
        assert_eq!(main.concurrency_for(JobKind::Maintenance), 0);

        let notification = QueuePolicy::for_queue(QueueName::Notification);
        assert_eq!(notification.max_attempts, 5);
        assert_eq!(notification.concurrency_for(JobKind::NotificationDelivery), 10);

        let maintenance = QueuePolicy::for_queue(QueueName::Maintenance);
        assert_eq!(maintenance.max_attempts, 1);
        assert_eq!(maintenance.concurrency_for(JobKind::Maintenance), 1);
        assert_eq!((maintenance.keep_completed, maintenance.keep_failed), (100, 50));
    }

    #[test]
    fn kind_retry_overrides_queue_default() {
        let policy = QueuePolicy::for_queue(QueueName::Main).with_kind_retry(
            JobKind::TemplateGeneration,
            5,
            Duration::from_millis(500),
        );

        let template = policy.job_options(JobKind::TemplateGeneration);
        assert_eq!(template.max_attempts, 5);
        assert_eq!(template.backoff.delay_for(1), Duration::from_millis(1000));

        let resume = policy.job_options(JobKind::ResumeOptimization);
        assert_eq!(resume.max_attempts, 3);
        assert_eq!(resume.backoff.delay_for(0), Duration::from_millis(2000));
    }
}

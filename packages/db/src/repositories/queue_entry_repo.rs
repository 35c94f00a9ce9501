//! Queue entry repository: the persisted side of the queue backend.

use chrono::{DateTime, Utc};
use jobs_core::{Job, JobId, QueueName};
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

const TABLE: &str = "queue_entry";

/// Where an entry sits inside its queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Ready to be dequeued.
    Waiting,
    /// Held back until `job.run_at` (explicit delay or retry backoff).
    Delayed,
    /// Handed to a worker.
    Active,
    /// Acknowledged; kept for retention.
    Completed,
    /// Exhausted or permanently failed; kept for retention.
    Failed,
}

impl EntryState {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryState::Waiting => "waiting",
            EntryState::Delayed => "delayed",
            EntryState::Active => "active",
            EntryState::Completed => "completed",
            EntryState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(EntryState::Waiting),
            "delayed" => Some(EntryState::Delayed),
            "active" => Some(EntryState::Active),
            "completed" => Some(EntryState::Completed),
            "failed" => Some(EntryState::Failed),
            _ => None,
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, EntryState::Completed | EntryState::Failed)
    }
}

/// A job together with its queue bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub job: Job,
    pub state: EntryState,
    /// Last progress reported by the handler, 0-100.
    pub progress: u8,
    pub worker_id: Option<String>,
    pub last_error: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn new(job: Job) -> Self {
        let state = if job.is_due(Utc::now()) {
            EntryState::Waiting
        } else {
            EntryState::Delayed
        };
        Self {
            job,
            state,
            progress: 0,
            worker_id: None,
            last_error: None,
            finished_at: None,
        }
    }
}

/// Internal row type. The job itself is stored as a JSON document.
#[derive(Debug, Serialize, Deserialize)]
struct QueueEntryRow {
    job_id: String,
    queue: String,
    state: String,
    job: serde_json::Value,
    progress: u8,
    worker_id: Option<String>,
    last_error: Option<String>,
    finished_at: Option<i64>,
}

impl QueueEntryRow {
    fn from_entry(entry: &QueueEntry) -> Result<Self, DbError> {
        Ok(Self {
            job_id: entry.job.id.to_string(),
            queue: entry.job.queue.as_str().to_string(),
            state: entry.state.as_str().to_string(),
            job: serde_json::to_value(&entry.job)
                .map_err(|e| DbError::Serialization(e.to_string()))?,
            progress: entry.progress,
            worker_id: entry.worker_id.clone(),
            last_error: entry.last_error.clone(),
            finished_at: entry.finished_at.map(|t| t.timestamp_millis()),
        })
    }

    fn into_entry(self) -> Result<QueueEntry, DbError> {
        let job: Job =
            serde_json::from_value(self.job).map_err(|e| DbError::Serialization(e.to_string()))?;
        let state = EntryState::parse(&self.state)
            .ok_or_else(|| DbError::Serialization(format!("unknown entry state: {}", self.state)))?;

        Ok(QueueEntry {
            job,
            state,
            progress: self.progress,
            worker_id: self.worker_id,
            last_error: self.last_error,
            finished_at: self.finished_at.and_then(DateTime::from_timestamp_millis),
        })
    }
}

/// Repository for persisted queue entries.
#[derive(Clone)]
pub struct QueueEntryRepository {
    db: Database,
}

impl QueueEntryRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace the entry keyed by its job id.
    pub async fn upsert(&self, entry: &QueueEntry) -> Result<(), DbError> {
        let row = QueueEntryRow::from_entry(entry)?;

        let _: Option<QueueEntryRow> = self
            .db
            .upsert((TABLE, entry.job.id.to_string()))
            .content(row)
            .await?;

        Ok(())
    }

    pub async fn delete(&self, id: JobId) -> Result<(), DbError> {
        let _: Option<QueueEntryRow> = self.db.delete((TABLE, id.to_string())).await?;
        Ok(())
    }

    /// All entries of a queue, in enqueue order.
    pub async fn list_for_queue(&self, queue: QueueName) -> Result<Vec<QueueEntry>, DbError> {
        let mut response = self
            .db
            .query("SELECT * FROM queue_entry WHERE queue = $queue ORDER BY job_id ASC")
            .bind(("queue", queue.as_str().to_string()))
            .await?;

        let rows: Vec<QueueEntryRow> = response.take(0)?;
        rows.into_iter().map(QueueEntryRow::into_entry).collect()
    }
}

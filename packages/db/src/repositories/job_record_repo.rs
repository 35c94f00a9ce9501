//! Job record repository: the durable lifecycle store for every job.
//!
//! Every status change is a single conditional `UPDATE ... WHERE status = $from`
//! keyed by job id, so duplicate acknowledgements and concurrent writers can
//! never move a record backwards.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use jobs_core::{JobId, JobKind, JobRecord, JobStatus, Priority, Transition};
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

const TABLE: &str = "job_record";

/// Repository for job record persistence operations.
#[derive(Clone)]
pub struct JobRecordRepository {
    db: Database,
}

/// Internal row type. Timestamps are epoch milliseconds.
#[derive(Debug, Serialize, Deserialize)]
struct JobRecordRow {
    job_id: String,
    kind: String,
    related_entity_id: Option<String>,
    status: String,
    priority: u8,
    input: serde_json::Value,
    output: Option<serde_json::Value>,
    error: Option<String>,
    created_at: i64,
    started_at: Option<i64>,
    completed_at: Option<i64>,
    failed_at: Option<i64>,
    cancelled_at: Option<i64>,
}

impl JobRecordRow {
    fn from_record(record: &JobRecord) -> Self {
        Self {
            job_id: record.id.to_string(),
            kind: record.kind.as_str().to_string(),
            related_entity_id: record.related_entity_id.clone(),
            status: record.status.as_str().to_string(),
            priority: record.priority.value(),
            input: record.input.clone(),
            output: record.output.clone(),
            error: record.error.clone(),
            created_at: record.created_at.timestamp_millis(),
            started_at: record.started_at.map(|t| t.timestamp_millis()),
            completed_at: record.completed_at.map(|t| t.timestamp_millis()),
            failed_at: record.failed_at.map(|t| t.timestamp_millis()),
            cancelled_at: record.cancelled_at.map(|t| t.timestamp_millis()),
        }
    }

    fn into_record(self) -> Result<JobRecord, DbError> {
        let id = JobId::parse(&self.job_id)
            .map_err(|e| DbError::Serialization(format!("bad job id {}: {}", self.job_id, e)))?;
        let kind = JobKind::parse(&self.kind)
            .ok_or_else(|| DbError::Serialization(format!("unknown job kind: {}", self.kind)))?;
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| DbError::Serialization(format!("unknown job status: {}", self.status)))?;

        Ok(JobRecord {
            id,
            kind,
            related_entity_id: self.related_entity_id,
            status,
            priority: Priority(self.priority),
            input: self.input,
            output: self.output,
            error: self.error,
            created_at: millis_to_time(self.created_at)?,
            started_at: self.started_at.map(millis_to_time).transpose()?,
            completed_at: self.completed_at.map(millis_to_time).transpose()?,
            failed_at: self.failed_at.map(millis_to_time).transpose()?,
            cancelled_at: self.cancelled_at.map(millis_to_time).transpose()?,
        })
    }
}

fn millis_to_time(ms: i64) -> Result<DateTime<Utc>, DbError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| DbError::Serialization(format!("timestamp out of range: {ms}")))
}

fn rows_into_records(rows: Vec<JobRecordRow>) -> Result<Vec<JobRecord>, DbError> {
    rows.into_iter().map(JobRecordRow::into_record).collect()
}

/// Filter options for listing job records.
#[derive(Debug, Default, Clone)]
pub struct RecordFilter {
    pub status: Option<JobStatus>,
    pub kind: Option<JobKind>,
    pub limit: Option<usize>,
}

impl JobRecordRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a new record. Fails if a record with the same id exists.
    pub async fn create(&self, record: &JobRecord) -> Result<JobRecord, DbError> {
        let row = JobRecordRow::from_record(record);

        let created: Option<JobRecordRow> = self
            .db
            .create((TABLE, record.id.to_string()))
            .content(row)
            .await?;

        created
            .ok_or_else(|| DbError::Query(format!("Failed to create job record {}", record.id)))?
            .into_record()
    }

    /// Get a record by ID.
    pub async fn get(&self, id: JobId) -> Result<JobRecord, DbError> {
        self.find(id)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("Job record not found: {}", id)))
    }

    pub async fn find(&self, id: JobId) -> Result<Option<JobRecord>, DbError> {
        let row: Option<JobRecordRow> = self.db.select((TABLE, id.to_string())).await?;
        row.map(JobRecordRow::into_record).transpose()
    }

    /// Return the existing record for `record.id`, creating it when missing.
    pub async fn ensure(&self, record: &JobRecord) -> Result<JobRecord, DbError> {
        match self.find(record.id).await? {
            Some(existing) => Ok(existing),
            None => self.create(record).await,
        }
    }

    /// `Pending -> Processing`.
    pub async fn begin_processing(&self, id: JobId) -> Result<Transition, DbError> {
        self.transition(id, JobStatus::Pending, JobStatus::Processing, None, None)
            .await
    }

    /// `Processing -> Completed`, storing the job output.
    pub async fn complete(
        &self,
        id: JobId,
        output: serde_json::Value,
    ) -> Result<Transition, DbError> {
        self.transition(
            id,
            JobStatus::Processing,
            JobStatus::Completed,
            Some(output),
            None,
        )
        .await
    }

    /// `Processing -> Failed`, storing a human-readable error.
    pub async fn fail(&self, id: JobId, error: &str) -> Result<Transition, DbError> {
        self.transition(
            id,
            JobStatus::Processing,
            JobStatus::Failed,
            None,
            Some(error.to_string()),
        )
        .await
    }

    /// `Pending -> Cancelled`.
    pub async fn cancel(&self, id: JobId, reason: &str) -> Result<Transition, DbError> {
        self.transition(
            id,
            JobStatus::Pending,
            JobStatus::Cancelled,
            None,
            Some(reason.to_string()),
        )
        .await
    }

    async fn transition(
        &self,
        id: JobId,
        from: JobStatus,
        to: JobStatus,
        output: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<Transition, DbError> {
        if !from.can_transition_to(to) {
            return Err(DbError::Query(format!("illegal transition {} -> {}", from, to)));
        }

        let stamp = match to {
            JobStatus::Processing => "started_at",
            JobStatus::Completed => "completed_at",
            JobStatus::Failed => "failed_at",
            JobStatus::Cancelled => "cancelled_at",
            JobStatus::Pending => {
                return Err(DbError::Query("records cannot return to pending".into()));
            }
        };

        let mut assignments = vec!["status = $to".to_string(), format!("{stamp} = $now")];
        if output.is_some() {
            assignments.push("output = $output".to_string());
        }
        if error.is_some() {
            assignments.push("error = $error".to_string());
        }

        let query = format!(
            "UPDATE type::thing('{TABLE}', $id) SET {} WHERE status = $from RETURN AFTER",
            assignments.join(", ")
        );

        let mut response = self
            .db
            .query(query)
            .bind(("id", id.to_string()))
            .bind(("from", from.as_str().to_string()))
            .bind(("to", to.as_str().to_string()))
            .bind(("now", Utc::now().timestamp_millis()))
            .bind(("output", output))
            .bind(("error", error))
            .await?;

        let rows: Vec<JobRecordRow> = response.take(0)?;

        match rows.into_iter().next() {
            Some(row) => {
                let record = row.into_record()?;
                tracing::debug!(job_id = %id, %from, %to, "job record transitioned");
                Ok(Transition::Applied(record))
            }
            None => {
                let current = self.get(id).await?;
                tracing::debug!(
                    job_id = %id,
                    current = %current.status,
                    requested = %to,
                    "job record transition ignored"
                );
                Ok(Transition::Ignored(current))
            }
        }
    }

    /// Cancel pending records created before `cutoff`. Returns how many changed.
    pub async fn cancel_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> Result<u64, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                UPDATE job_record
                SET status = "cancelled", cancelled_at = $now, error = $reason
                WHERE status = "pending" AND created_at < $cutoff
                RETURN AFTER
                "#,
            )
            .bind(("now", Utc::now().timestamp_millis()))
            .bind(("reason", reason.to_string()))
            .bind(("cutoff", cutoff.timestamp_millis()))
            .await?;

        let rows: Vec<JobRecordRow> = response.take(0)?;
        Ok(rows.len() as u64)
    }

    /// Delete failed records that failed before `cutoff`. Returns how many went.
    pub async fn delete_failed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                DELETE job_record
                WHERE status = "failed" AND failed_at < $cutoff
                RETURN BEFORE
                "#,
            )
            .bind(("cutoff", cutoff.timestamp_millis()))
            .await?;

        let rows: Vec<JobRecordRow> = response.take(0)?;
        Ok(rows.len() as u64)
    }

    /// Records still processing that started before `cutoff`.
    pub async fn list_processing_started_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobRecord>, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                SELECT * FROM job_record
                WHERE status = "processing" AND started_at < $cutoff
                ORDER BY started_at ASC
                "#,
            )
            .bind(("cutoff", cutoff.timestamp_millis()))
            .await?;

        let rows: Vec<JobRecordRow> = response.take(0)?;
        rows_into_records(rows)
    }

    /// List records with optional filtering, oldest first.
    pub async fn list(&self, filter: RecordFilter) -> Result<Vec<JobRecord>, DbError> {
        let mut conditions = Vec::new();

        if filter.status.is_some() {
            conditions.push("status = $status");
        }
        if filter.kind.is_some() {
            conditions.push("kind = $kind");
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let limit_clause = filter
            .limit
            .map(|l| format!("LIMIT {}", l))
            .unwrap_or_default();

        let query = format!(
            "SELECT * FROM job_record {} ORDER BY created_at ASC {}",
            where_clause, limit_clause
        );

        let mut response = self
            .db
            .query(query)
            .bind(("status", filter.status.map(|s| s.as_str().to_string())))
            .bind(("kind", filter.kind.map(|k| k.as_str().to_string())))
            .await?;

        let rows: Vec<JobRecordRow> = response.take(0)?;
        rows_into_records(rows)
    }

    /// Count records by status.
    pub async fn count_by_status(&self) -> Result<HashMap<JobStatus, u64>, DbError> {
        let mut response = self
            .db
            .query("SELECT status, count() AS count FROM job_record GROUP BY status")
            .await?;

        #[derive(Deserialize)]
        struct StatusCount {
            status: Option<String>,
            count: i64,
        }

        let counts: Vec<StatusCount> = response.take(0)?;

        let mut map = HashMap::new();
        for count in counts {
            if let Some(status) = count.status.as_deref().and_then(JobStatus::parse) {
                map.insert(status, count.count as u64);
            }
        }

        Ok(map)
    }
}

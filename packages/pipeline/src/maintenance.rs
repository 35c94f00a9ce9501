//! Housekeeping sweeps over documents and job records.

use std::sync::Arc;

use actors::{HandlerFuture, JobHandler, ProgressReporter, QueueBackend, WORKER_LOST_ERROR};
use chrono::{TimeDelta, Utc};
use db::repositories::JobRecordRepository;
use jobs_core::{
    HandlerError, Job, JobKind, MaintenanceOperation, MaintenancePayload, decode_payload,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

const STALE_JOB_REASON: &str = "cancelled after waiting too long to start";

/// Age thresholds of the sweeps, in hours. A payload's `maxAgeHours`
/// overrides the threshold of its operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceSettings {
    pub stale_document_hours: u64,
    pub stale_job_hours: u64,
    pub failed_record_hours: u64,
    pub orphaned_job_hours: u64,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            stale_document_hours: 72,
            stale_job_hours: 24,
            failed_record_hours: 7 * 24,
            orphaned_job_hours: 2,
        }
    }
}

impl MaintenanceSettings {
    fn hours_for(&self, operation: MaintenanceOperation) -> u64 {
        match operation {
            MaintenanceOperation::PurgeStaleDocuments => self.stale_document_hours,
            MaintenanceOperation::CancelStaleJobs => self.stale_job_hours,
            MaintenanceOperation::CleanupFailedRecords => self.failed_record_hours,
            MaintenanceOperation::ReclaimOrphanedJobs => self.orphaned_job_hours,
        }
    }
}

#[derive(Clone)]
pub struct MaintenanceHandler {
    records: JobRecordRepository,
    documents: Arc<dyn crate::DocumentStore>,
    backend: Arc<dyn QueueBackend>,
    settings: MaintenanceSettings,
}

impl MaintenanceHandler {
    pub fn new(
        records: JobRecordRepository,
        documents: Arc<dyn crate::DocumentStore>,
        backend: Arc<dyn QueueBackend>,
        settings: MaintenanceSettings,
    ) -> Self {
        Self {
            records,
            documents,
            backend,
            settings,
        }
    }

    async fn run(
        &self,
        job: &Job,
        progress: &ProgressReporter,
    ) -> Result<serde_json::Value, HandlerError> {
        let payload: MaintenancePayload = decode_payload(job.kind, &job.payload)?;
        let operation = payload.operation;
        let hours = payload
            .max_age_hours
            .unwrap_or_else(|| self.settings.hours_for(operation));
        let age = i64::try_from(hours)
            .ok()
            .and_then(TimeDelta::try_hours)
            .ok_or_else(|| HandlerError::permanent("maintenance age is out of range"))?;
        let cutoff = Utc::now() - age;

        let affected = match operation {
            MaintenanceOperation::PurgeStaleDocuments => self
                .documents
                .purge_unprocessed_before(cutoff)
                .await
                .map_err(|e| e.into_handler_error("document purge"))?,
            MaintenanceOperation::CancelStaleJobs => self
                .records
                .cancel_stale_pending(cutoff, STALE_JOB_REASON)
                .await
                .map_err(|e| {
                    HandlerError::transient(format!("stale job cancellation failed: {e}"))
                })?,
            MaintenanceOperation::CleanupFailedRecords => self
                .records
                .delete_failed_before(cutoff)
                .await
                .map_err(|e| {
                    HandlerError::transient(format!("failed record cleanup failed: {e}"))
                })?,
            MaintenanceOperation::ReclaimOrphanedJobs => self.reclaim_orphaned(cutoff).await?,
        };
        progress.report(100);

        tracing::info!(%operation, affected, max_age_hours = hours, "Maintenance sweep finished");
        Ok(json!({ "operation": operation, "affected": affected }))
    }

    /// Fail `Processing` records that started before `cutoff` and whose job
    /// the backend no longer holds.
    async fn reclaim_orphaned(&self, cutoff: chrono::DateTime<Utc>) -> Result<u64, HandlerError> {
        let candidates = self
            .records
            .list_processing_started_before(cutoff)
            .await
            .map_err(|e| HandlerError::transient(format!("orphaned job lookup failed: {e}")))?;

        let mut reclaimed = 0;
        for record in candidates {
            match self.backend.is_live(record.kind.queue(), record.id).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        job_id = %record.id,
                        "Skipping reclaim, queue unavailable: {}",
                        e
                    );
                    continue;
                }
            }

            match self.records.fail(record.id, WORKER_LOST_ERROR).await {
                Ok(transition) if transition.is_applied() => {
                    tracing::warn!(
                        job_id = %record.id,
                        kind = %record.kind,
                        "Reclaimed orphaned job"
                    );
                    reclaimed += 1;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(job_id = %record.id, "Failed to reclaim job: {}", e),
            }
        }
        Ok(reclaimed)
    }
}

impl JobHandler for MaintenanceHandler {
    fn kind(&self) -> JobKind {
        JobKind::Maintenance
    }

    fn handle(&self, job: &Job, progress: ProgressReporter) -> HandlerFuture {
        let handler = self.clone();
        let job = job.clone();
        Box::pin(async move { handler.run(&job, &progress).await })
    }
}

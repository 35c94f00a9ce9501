//! Recurring maintenance schedules.

use actors::{BackendError, QueueBackend};
use jobs_core::{JobKind, MaintenanceOperation, RecurringSchedule};
use serde_json::json;

pub const PURGE_STALE_DOCUMENTS: &str = "maintenance-purge-stale-documents";
pub const CANCEL_STALE_JOBS: &str = "maintenance-cancel-stale-jobs";
pub const CLEANUP_FAILED_RECORDS: &str = "maintenance-cleanup-failed-records";
pub const RECLAIM_ORPHANED_JOBS: &str = "maintenance-reclaim-orphaned-jobs";

/// The fixed maintenance triggers. Cron fields start with seconds.
pub fn maintenance_schedules() -> Vec<RecurringSchedule> {
    [
        // Daily at 02:00
        (PURGE_STALE_DOCUMENTS, "0 0 2 * * *", MaintenanceOperation::PurgeStaleDocuments),
        (CANCEL_STALE_JOBS, "0 0 * * * *", MaintenanceOperation::CancelStaleJobs),
        // Sundays at 03:00
        (CLEANUP_FAILED_RECORDS, "0 0 3 * * Sun", MaintenanceOperation::CleanupFailedRecords),
        (RECLAIM_ORPHANED_JOBS, "0 30 * * * *", MaintenanceOperation::ReclaimOrphanedJobs),
    ]
    .into_iter()
    .map(|(schedule_id, cron, operation)| {
        RecurringSchedule::new(
            schedule_id,
            cron,
            JobKind::Maintenance,
            json!({ "operation": operation.as_str() }),
        )
    })
    .collect()
}

/// Upsert every maintenance schedule. Returns how many were registered.
pub async fn register_maintenance_schedules(
    backend: &dyn QueueBackend,
) -> Result<usize, BackendError> {
    let schedules = maintenance_schedules();
    let count = schedules.len();
    for schedule in schedules {
        tracing::debug!(
            schedule_id = %schedule.schedule_id,
            cron = %schedule.cron_expression,
            "Registering schedule"
        );
        backend.upsert_recurring(schedule).await?;
    }
    tracing::info!("Registered {} maintenance schedules", count);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobs_core::{MaintenancePayload, decode_payload};

    #[test]
    fn every_schedule_parses_and_decodes() {
        for schedule in maintenance_schedules() {
            assert!(actors::parse_cron(&schedule.schedule_id, &schedule.cron_expression).is_ok());
            let payload: MaintenancePayload =
                decode_payload(schedule.kind, &schedule.payload).unwrap();
            assert!(payload.max_age_hours.is_none());
        }
    }

    #[test]
    fn schedule_ids_are_unique() {
        let mut ids: Vec<String> = maintenance_schedules()
            .into_iter()
            .map(|s| s.schedule_id)
            .collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }
}

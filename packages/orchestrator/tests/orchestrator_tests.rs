mod common;

use std::collections::HashSet;
use std::error::Error;
use std::sync::atomic::Ordering;
use std::time::Duration;

use db::repositories::{DocumentStatus, EntryState, QueueEntryRepository, RecordFilter};
use jobs_core::{
    JobId, JobKind, JobStatus, MaintenanceOperation, PackageTier, Priority, QueueName,
    generated_document_id,
};
use orchestrator::{Orchestrator, OrchestratorError};
use orchestrator::scheduler::{CANCEL_STALE_JOBS, PURGE_STALE_DOCUMENTS};
use serde_json::json;
use tokio::task::JoinSet;

use common::TestEnv;

#[tokio::test]
async fn test_concurrent_submissions_get_distinct_ids_and_records() -> Result<(), Box<dyn Error>> {
    let env = TestEnv::start(common::paused_config(QueueName::Notification)).await?;

    let mut tasks = JoinSet::new();
    for i in 0..20 {
        let orchestrator = env.orchestrator.clone();
        tasks.spawn(async move {
            orchestrator
                .submit_notification(
                    format!("user{i}@example.com"),
                    "welcome",
                    json!({}),
                    Vec::new(),
                )
                .await
        });
    }

    let mut ids = HashSet::new();
    while let Some(result) = tasks.join_next().await {
        ids.insert(result??);
    }
    assert_eq!(ids.len(), 20);

    let records = env
        .orchestrator
        .records()
        .list(RecordFilter {
            kind: Some(JobKind::NotificationDelivery),
            ..Default::default()
        })
        .await?;
    assert_eq!(records.len(), 20);
    assert!(records.iter().all(|r| r.status == JobStatus::Pending));
    assert!(records.iter().all(|r| ids.contains(&r.id)));

    let stats = env.orchestrator.queue_statistics().await?;
    assert_eq!(stats[&QueueName::Notification].waiting, 20);

    env.orchestrator.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_urgent_job_is_dequeued_before_standard() -> Result<(), Box<dyn Error>> {
    let env = TestEnv::start(common::paused_config(QueueName::Main)).await?;

    let standard = env
        .orchestrator
        .submit_resume_optimization(
            "user-1",
            "ada@example.com",
            "doc-1",
            "Rust engineer",
            "modern",
            false,
        )
        .await?;
    let urgent = env
        .orchestrator
        .submit_resume_optimization(
            "user-1",
            "ada@example.com",
            "doc-1",
            "Rust engineer",
            "modern",
            true,
        )
        .await?;

    assert_eq!(env.orchestrator.records().get(urgent).await?.priority, Priority::URGENT);
    assert_eq!(env.orchestrator.records().get(standard).await?.priority, Priority::STANDARD);

    let backend = env.orchestrator.backend();
    let first = backend
        .dequeue(QueueName::Main, JobKind::ResumeOptimization, "test-worker")
        .await?
        .map(|job| (job.id, job.priority));
    assert_eq!(first, Some((urgent, Priority::URGENT)));

    env.orchestrator.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_urgent_resume_optimization_end_to_end() -> Result<(), Box<dyn Error>> {
    let env = TestEnv::start(common::fast_config()).await?;
    env.store_document("doc-1", "Rust developer").await?;

    let id = env
        .orchestrator
        .submit_resume_optimization(
            "user-1",
            "ada@example.com",
            "doc-1",
            "Staff engineer",
            "modern",
            true,
        )
        .await?;
    assert!(env.wait_for_status(id, JobStatus::Completed).await);

    let view = env.orchestrator.job_status(id).await?;
    assert_eq!(view.progress, 100);
    let output = view.output.unwrap();
    assert!(!output["optimizedText"].as_str().unwrap_or_default().is_empty());
    assert!(view.error.is_none());

    let record = env.orchestrator.records().get(id).await?;
    assert_eq!(record.related_entity_id.as_deref(), Some("doc-1"));

    // Exactly one chained notification, with the urgent priority.
    let notifications = env
        .orchestrator
        .records()
        .list(RecordFilter {
            kind: Some(JobKind::NotificationDelivery),
            ..Default::default()
        })
        .await?;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].priority, Priority::URGENT);
    assert_eq!(
        output["notificationJobId"].as_str(),
        Some(notifications[0].id.to_string().as_str())
    );

    assert!(env.wait_for_status(notifications[0].id, JobStatus::Completed).await);
    assert_eq!(env.sender.sent.load(Ordering::SeqCst), 1);

    env.orchestrator.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_template_generation_priorities_follow_package_tier() -> Result<(), Box<dyn Error>> {
    let env = TestEnv::start(common::fast_config()).await?;
    let data = json!({ "name": "Ada", "targetRole": "Platform engineer" });

    let basic = env
        .orchestrator
        .submit_template_generation(
            "user-1",
            "ada@example.com",
            data.clone(),
            "classic",
            PackageTier::Basic,
        )
        .await?;
    let enhanced = env
        .orchestrator
        .submit_template_generation(
            "user-1",
            "ada@example.com",
            data,
            "classic",
            PackageTier::Enhanced,
        )
        .await?;

    let records = env.orchestrator.records();
    assert_eq!(records.get(basic).await?.priority, Priority::ELEVATED);
    assert_eq!(records.get(enhanced).await?.priority, Priority::URGENT);

    assert!(env.wait_for_status(basic, JobStatus::Completed).await);
    assert!(env.wait_for_status(enhanced, JobStatus::Completed).await);

    // Only the enhanced package goes through the optimizer.
    assert_eq!(env.optimizer.calls.load(Ordering::SeqCst), 1);

    let document = env.documents.find(&generated_document_id(basic)).await?.unwrap();
    assert_eq!(document.status, DocumentStatus::Processed);
    assert_eq!(
        records.get(basic).await?.related_entity_id,
        Some(generated_document_id(basic))
    );

    env.orchestrator.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_invalid_submission_never_reaches_the_queue() -> Result<(), Box<dyn Error>> {
    let env = TestEnv::start(common::fast_config()).await?;

    let err = env
        .orchestrator
        .submit_resume_optimization(
            "user-1",
            "not-an-email",
            "doc-1",
            "Rust engineer",
            "modern",
            false,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(ref v) if v.field == "email"));

    let err = env
        .orchestrator
        .submit_template_generation(
            "user-1",
            "ada@example.com",
            json!({}),
            "classic",
            PackageTier::Basic,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Validation(_)));

    assert!(env.orchestrator.records().list(RecordFilter::default()).await?.is_empty());
    let stats = env.orchestrator.queue_statistics().await?;
    assert!(stats.values().all(|counts| counts.outstanding() == 0));

    env.orchestrator.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_job_status_reports_live_progress() -> Result<(), Box<dyn Error>> {
    let env = TestEnv::start_with(common::fast_config(), 0, Duration::from_millis(1500)).await?;
    env.store_document("doc-1", "Rust developer").await?;

    let err = env.orchestrator.job_status(JobId::new()).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));

    let id = env
        .orchestrator
        .submit_resume_optimization(
            "user-1",
            "ada@example.com",
            "doc-1",
            "Staff engineer",
            "modern",
            false,
        )
        .await?;

    // The renderer is slow, so the job sits at the optimizer milestone.
    let at_half = common::wait_for(Duration::from_secs(5), || async {
        env.orchestrator
            .job_status(id)
            .await
            .is_ok_and(|view| view.status == JobStatus::Processing && view.progress == 50)
    })
    .await;
    assert!(at_half);

    assert!(env.wait_for_status(id, JobStatus::Completed).await);
    assert_eq!(env.orchestrator.job_status(id).await?.progress, 100);

    env.orchestrator.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_transient_failures_retry_until_completed() -> Result<(), Box<dyn Error>> {
    let env = TestEnv::start_with(common::fast_config(), 2, Duration::ZERO).await?;
    env.store_document("doc-1", "Rust developer").await?;

    let id = env
        .orchestrator
        .submit_resume_optimization(
            "user-1",
            "ada@example.com",
            "doc-1",
            "Staff engineer",
            "modern",
            false,
        )
        .await?;

    assert!(env.wait_for_status(id, JobStatus::Completed).await);
    assert_eq!(env.optimizer.calls.load(Ordering::SeqCst), 3);

    env.orchestrator.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_record() -> Result<(), Box<dyn Error>> {
    let env = TestEnv::start_with(common::fast_config(), u32::MAX, Duration::ZERO).await?;
    env.store_document("doc-1", "Rust developer").await?;

    let id = env
        .orchestrator
        .submit_resume_optimization(
            "user-1",
            "ada@example.com",
            "doc-1",
            "Staff engineer",
            "modern",
            false,
        )
        .await?;

    assert!(env.wait_for_status(id, JobStatus::Failed).await);
    let view = env.orchestrator.job_status(id).await?;
    assert_eq!(view.progress, 0);
    assert!(!view.error.unwrap_or_default().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(env.optimizer.calls.load(Ordering::SeqCst), 3);

    env.orchestrator.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_missing_document_fails_without_retry() -> Result<(), Box<dyn Error>> {
    let env = TestEnv::start(common::fast_config()).await?;

    let id = env
        .orchestrator
        .submit_resume_optimization(
            "user-1",
            "ada@example.com",
            "nowhere",
            "Staff engineer",
            "modern",
            false,
        )
        .await?;

    assert!(env.wait_for_status(id, JobStatus::Failed).await);
    let view = env.orchestrator.job_status(id).await?;
    assert_eq!(view.error.as_deref(), Some("referenced document does not exist"));
    assert_eq!(env.optimizer.calls.load(Ordering::SeqCst), 0);

    env.orchestrator.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_recurring_maintenance_registration_is_idempotent() -> Result<(), Box<dyn Error>> {
    let env = TestEnv::start(common::fast_config()).await?;

    assert_eq!(env.orchestrator.schedule_recurring_maintenance().await?, 4);
    assert_eq!(env.orchestrator.schedule_recurring_maintenance().await?, 4);

    let schedules = env.orchestrator.backend().recurring(QueueName::Maintenance).await?;
    assert_eq!(schedules.len(), 4);
    let ids: HashSet<&str> = schedules.iter().map(|s| s.schedule_id.as_str()).collect();
    assert!(ids.contains(PURGE_STALE_DOCUMENTS));
    assert!(ids.contains(CANCEL_STALE_JOBS));

    env.orchestrator.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_manual_maintenance_sweep() -> Result<(), Box<dyn Error>> {
    let env = TestEnv::start(common::paused_config(QueueName::Notification)).await?;

    let waiting = env
        .orchestrator
        .submit_notification("ada@example.com", "welcome", json!({}), Vec::new())
        .await?;
    env.orchestrator
        .database()
        .query("UPDATE type::thing('job_record', $id) SET created_at = $at")
        .bind(("id", waiting.to_string()))
        .bind(("at", (chrono::Utc::now() - chrono::Duration::hours(25)).timestamp_millis()))
        .await?;

    let sweep = env
        .orchestrator
        .submit_maintenance(MaintenanceOperation::CancelStaleJobs)
        .await?;
    assert!(env.wait_for_status(sweep, JobStatus::Completed).await);

    let output = env.orchestrator.job_status(sweep).await?.output.unwrap();
    assert_eq!(output, json!({ "operation": "cancel_stale_jobs", "affected": 1 }));
    assert_eq!(env.orchestrator.job_status(waiting).await?.status, JobStatus::Cancelled);

    env.orchestrator.shutdown().await?;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_is_idempotent_and_rejects_new_work() -> Result<(), Box<dyn Error>> {
    let env = TestEnv::start(common::fast_config()).await?;

    env.orchestrator.shutdown().await?;
    env.orchestrator.shutdown().await?;

    let err = env
        .orchestrator
        .submit_notification("ada@example.com", "welcome", json!({}), Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ShuttingDown));
    assert!(env.orchestrator.records().list(RecordFilter::default()).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_notification_chained_during_shutdown_is_kept() -> Result<(), Box<dyn Error>> {
    let env = TestEnv::start_with(common::fast_config(), 0, Duration::from_millis(500)).await?;
    env.store_document("doc-1", "Rust developer").await?;

    let id = env
        .orchestrator
        .submit_resume_optimization(
            "user-1",
            "ada@example.com",
            "doc-1",
            "Staff engineer",
            "modern",
            false,
        )
        .await?;
    let rendering = common::wait_for(Duration::from_secs(5), || async {
        env.orchestrator
            .job_status(id)
            .await
            .is_ok_and(|view| view.status == JobStatus::Processing && view.progress == 50)
    })
    .await;
    assert!(rendering);

    // The job finishes inside the grace period and chains its notification.
    env.orchestrator.shutdown().await?;

    let record = env.orchestrator.records().get(id).await?;
    assert_eq!(record.status, JobStatus::Completed);
    let notifications = env
        .orchestrator
        .records()
        .list(RecordFilter {
            kind: Some(JobKind::NotificationDelivery),
            ..Default::default()
        })
        .await?;
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].status, JobStatus::Pending);
    let notification = notifications[0].id;
    let output = record.output.ok_or("completed job should have output")?;
    assert_eq!(
        output["notificationJobId"].as_str(),
        Some(notification.to_string().as_str())
    );

    let db = env.orchestrator.database().clone();
    let entries = QueueEntryRepository::new(db.clone())
        .list_for_queue(QueueName::Notification)
        .await?;
    assert!(
        entries
            .iter()
            .any(|e| e.job.id == notification && e.state == EntryState::Waiting)
    );
    assert_eq!(env.sender.sent.load(Ordering::SeqCst), 0);

    // The next start delivers it.
    let restarted =
        Orchestrator::start_with_database(db, common::fast_config(), env.collaborators()).await?;
    let delivered = common::wait_for(Duration::from_secs(5), || async {
        restarted
            .job_status(notification)
            .await
            .is_ok_and(|view| view.status == JobStatus::Completed)
    })
    .await;
    assert!(delivered);
    assert_eq!(env.sender.sent.load(Ordering::SeqCst), 1);

    restarted.shutdown().await?;
    Ok(())
}

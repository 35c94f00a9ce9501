//! Public facade over intake, queues and workers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use actors::{ActorQueueBackend, QueueBackend, WorkerPool, WorkerPoolConfig};
use db::Database;
use db::repositories::{JobRecordRepository, QueueEntryRepository, ScheduleRepository};
use jobs_core::{
    AttachmentPayload, JobId, JobRequest, JobStatus, MaintenanceOperation, MaintenancePayload,
    NotificationPayload, PackageTier, QueueCounts, QueueName, ResumeOptimizationPayload,
    TemplateGenerationPayload,
};
use pipeline::Collaborators;
use serde::Serialize;

use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::intake::JobIntake;
use crate::scheduler;

/// What a caller polling a job sees.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub status: JobStatus,
    /// 0-100.
    pub progress: u8,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Submits, tracks and runs document jobs.
pub struct Orchestrator {
    db: Database,
    records: JobRecordRepository,
    backend: Arc<ActorQueueBackend>,
    intake: Arc<JobIntake>,
    pool: WorkerPool,
    shutdown_grace: Duration,
    stopped: AtomicBool,
}

impl Orchestrator {
    /// Connect to the configured database and start queues and workers.
    pub async fn start(
        config: OrchestratorConfig,
        collaborators: Collaborators,
    ) -> Result<Self, OrchestratorError> {
        let db = db::init(&config.db).await?;
        Self::start_with_database(db, config, collaborators).await
    }

    /// Start on an already initialized database. `config.db` is ignored.
    pub async fn start_with_database(
        db: Database,
        config: OrchestratorConfig,
        collaborators: Collaborators,
    ) -> Result<Self, OrchestratorError> {
        tracing::info!("Starting job orchestrator");

        let records = JobRecordRepository::new(db.clone());
        let backend = Arc::new(
            ActorQueueBackend::start(
                &config.policies,
                QueueEntryRepository::new(db.clone()),
                ScheduleRepository::new(db.clone()),
            )
            .await?,
        );
        let intake = Arc::new(JobIntake::new(records.clone(), backend.clone()));

        let handlers = pipeline::handler_registry(
            &collaborators,
            intake.clone(),
            records.clone(),
            backend.clone(),
            config.maintenance,
        );
        let pool_config = WorkerPoolConfig {
            policies: config.policies.clone(),
            poll_interval: config.poll_interval,
        };

        let started = WorkerPool::start(
            pool_config,
            backend.clone(),
            Arc::new(handlers),
            records.clone(),
        )
        .await;
        let pool = match started {
            Ok(pool) => pool,
            Err(e) => {
                if let Err(close_err) = backend.close().await {
                    tracing::warn!("Failed to close queues after startup failure: {}", close_err);
                }
                return Err(OrchestratorError::Startup(e.to_string()));
            }
        };

        tracing::info!("Job orchestrator started");
        Ok(Self {
            db,
            records,
            backend,
            intake,
            pool,
            shutdown_grace: config.shutdown_grace,
            stopped: AtomicBool::new(false),
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn records(&self) -> &JobRecordRepository {
        &self.records
    }

    pub fn backend(&self) -> Arc<dyn QueueBackend> {
        self.backend.clone()
    }

    pub async fn submit_resume_optimization(
        &self,
        user_id: impl Into<String>,
        email: impl Into<String>,
        document_id: impl Into<String>,
        target_description: impl Into<String>,
        template_id: impl Into<String>,
        is_urgent: bool,
    ) -> Result<JobId, OrchestratorError> {
        self.submit(JobRequest::ResumeOptimization(ResumeOptimizationPayload {
            user_id: user_id.into(),
            email: email.into(),
            document_id: document_id.into(),
            target_description: target_description.into(),
            template_id: template_id.into(),
            is_urgent,
        }))
        .await
    }

    pub async fn submit_template_generation(
        &self,
        user_id: impl Into<String>,
        email: impl Into<String>,
        structured_data: serde_json::Value,
        template_id: impl Into<String>,
        package_tier: PackageTier,
    ) -> Result<JobId, OrchestratorError> {
        self.submit(JobRequest::TemplateGeneration(TemplateGenerationPayload {
            user_id: user_id.into(),
            email: email.into(),
            structured_data,
            template_id: template_id.into(),
            package_tier,
        }))
        .await
    }

    pub async fn submit_notification(
        &self,
        recipient: impl Into<String>,
        template: impl Into<String>,
        template_data: serde_json::Value,
        attachments: Vec<AttachmentPayload>,
    ) -> Result<JobId, OrchestratorError> {
        self.submit(JobRequest::Notification(NotificationPayload {
            recipient: recipient.into(),
            template: template.into(),
            template_data,
            attachments,
        }))
        .await
    }

    /// Run one maintenance sweep now, outside its schedule.
    pub async fn submit_maintenance(
        &self,
        operation: MaintenanceOperation,
    ) -> Result<JobId, OrchestratorError> {
        self.submit(JobRequest::Maintenance(MaintenancePayload::new(operation)))
            .await
    }

    /// Validate, record and enqueue any request.
    pub async fn submit(&self, request: JobRequest) -> Result<JobId, OrchestratorError> {
        self.intake.submit(request).await
    }

    /// Status of a job. The record is authoritative; live progress comes from
    /// the queue while the job is processing.
    pub async fn job_status(&self, id: JobId) -> Result<JobStatusView, OrchestratorError> {
        let record = self
            .records
            .find(id)
            .await?
            .ok_or(OrchestratorError::NotFound(id))?;

        let progress = match record.status {
            JobStatus::Completed => 100,
            JobStatus::Processing => self
                .backend
                .progress(record.kind.queue(), id)
                .await?
                .unwrap_or(0),
            JobStatus::Pending | JobStatus::Failed | JobStatus::Cancelled => 0,
        };

        Ok(JobStatusView {
            status: record.status,
            progress,
            output: record.output,
            error: record.error,
        })
    }

    pub async fn queue_statistics(
        &self,
    ) -> Result<BTreeMap<QueueName, QueueCounts>, OrchestratorError> {
        Ok(self.backend.statistics().await?)
    }

    /// Register the maintenance schedules. Safe to call on every start.
    pub async fn schedule_recurring_maintenance(&self) -> Result<usize, OrchestratorError> {
        Ok(scheduler::register_maintenance_schedules(self.backend.as_ref()).await?)
    }

    /// Refuse outside submissions, let running jobs finish within the grace
    /// period and stop every actor. Follow-up jobs those jobs chain are kept
    /// for the next start. Later calls do nothing.
    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("Shutting down job orchestrator");
        self.intake.close();

        // Queues are closed even if the pool failed to stop cleanly.
        let pool_result = self.pool.shutdown(self.shutdown_grace).await;
        let close_result = self.backend.close().await;

        let report = pool_result?;
        if report.abandoned > 0 {
            tracing::warn!(
                "{} job(s) were still running at shutdown and will be retried on restart",
                report.abandoned
            );
        }
        close_result?;
        tracing::info!("Job orchestrator stopped");
        Ok(())
    }
}

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use db::DbConfig;
use db::repositories::{DocumentRecord, DocumentRepository, DocumentStatus};
use jobs_core::{JobId, JobStatus, QueueName, QueuePolicy};
use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError, telemetry};
use pipeline::collaborators::{
    DeliveryReceipt, Optimization, OptimizationRequest, OutgoingNotification, RenderRequest,
    RenderedDocument,
};
use pipeline::{
    CollaboratorError, CollaboratorFuture, Collaborators, DocumentRenderer, NotificationSender,
    TextOptimizer,
};

/// Fails the first `failures` calls as unavailable, then succeeds.
pub struct FlakyOptimizer {
    pub failures: u32,
    pub calls: AtomicU32,
}

impl TextOptimizer for FlakyOptimizer {
    fn optimize(&self, request: OptimizationRequest) -> CollaboratorFuture<'_, Optimization> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let failures = self.failures;
        Box::pin(async move {
            if call <= failures {
                return Err(CollaboratorError::Unavailable(format!(
                    "optimizer timed out (call {call})"
                )));
            }
            Ok(Optimization {
                optimized_text: format!(
                    "{} | tailored to {}",
                    request.text, request.target_description
                ),
                score: 91.0,
                keywords: vec!["rust".into()],
            })
        })
    }
}

pub struct SlowRenderer {
    pub delay: Duration,
}

impl DocumentRenderer for SlowRenderer {
    fn render(&self, request: RenderRequest) -> CollaboratorFuture<'_, RenderedDocument> {
        let delay = self.delay;
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            Ok(RenderedDocument {
                bytes: b"%PDF-1.7".to_vec(),
                file_name: format!("{}.pdf", request.template_id),
            })
        })
    }
}

#[derive(Default)]
pub struct CountingSender {
    pub sent: AtomicU32,
}

impl NotificationSender for CountingSender {
    fn send(&self, _notification: OutgoingNotification) -> CollaboratorFuture<'_, DeliveryReceipt> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Box::pin(async {
            Ok(DeliveryReceipt {
                success: true,
                message_id: Some("msg-1".into()),
            })
        })
    }
}

/// Small poll interval and a 10 ms retry base on every queue.
pub fn fast_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default()
        .with_db(DbConfig::memory().with_database(format!("test_{}", ulid::Ulid::new())))
        .with_poll_interval(Duration::from_millis(20))
        .with_shutdown_grace(Duration::from_secs(2));
    for queue in QueueName::ALL {
        let policy = QueuePolicy::for_queue(queue).with_backoff_base(Duration::from_millis(10));
        config = config.with_policy(queue, policy);
    }
    config
}

/// `fast_config` with no workers for `queue`, so its jobs stay waiting.
pub fn paused_config(queue: QueueName) -> OrchestratorConfig {
    let config = fast_config();
    let mut policy = config.policies[&queue].clone();
    policy.concurrency.clear();
    config.with_policy(queue, policy)
}

pub struct TestEnv {
    pub orchestrator: Arc<Orchestrator>,
    pub documents: DocumentRepository,
    pub optimizer: Arc<FlakyOptimizer>,
    pub renderer: Arc<SlowRenderer>,
    pub sender: Arc<CountingSender>,
}

impl TestEnv {
    pub async fn start(config: OrchestratorConfig) -> Result<Self, OrchestratorError> {
        Self::start_with(config, 0, Duration::ZERO).await
    }

    pub async fn start_with(
        config: OrchestratorConfig,
        optimizer_failures: u32,
        render_delay: Duration,
    ) -> Result<Self, OrchestratorError> {
        telemetry::init_tracing_with("warn");

        let db = db::init(&config.db).await?;
        let documents = DocumentRepository::new(db.clone());
        let optimizer = Arc::new(FlakyOptimizer {
            failures: optimizer_failures,
            calls: AtomicU32::new(0),
        });
        let renderer = Arc::new(SlowRenderer { delay: render_delay });
        let sender = Arc::new(CountingSender::default());
        let collaborators = Collaborators {
            documents: Arc::new(documents.clone()),
            optimizer: optimizer.clone(),
            renderer: renderer.clone(),
            sender: sender.clone(),
        };

        let orchestrator = Orchestrator::start_with_database(db, config, collaborators).await?;
        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            documents,
            optimizer,
            renderer,
            sender,
        })
    }

    /// The same collaborators, for a second orchestrator on the same database.
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            documents: Arc::new(self.documents.clone()),
            optimizer: self.optimizer.clone(),
            renderer: self.renderer.clone(),
            sender: self.sender.clone(),
        }
    }

    pub async fn store_document(
        &self,
        document_id: &str,
        text: &str,
    ) -> Result<(), OrchestratorError> {
        let doc =
            DocumentRecord::new(document_id, "user-1", DocumentStatus::Uploaded).with_text(text);
        self.documents.upsert(&doc).await?;
        Ok(())
    }

    pub async fn wait_for_status(&self, id: JobId, status: JobStatus) -> bool {
        wait_for(Duration::from_secs(5), || async move {
            self.orchestrator
                .job_status(id)
                .await
                .is_ok_and(|view| view.status == status)
        })
        .await
    }
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

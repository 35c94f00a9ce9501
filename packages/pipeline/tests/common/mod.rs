#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use actors::{ActorQueueBackend, BackendError, ProgressReporter};
use db::repositories::{DocumentRepository, QueueEntryRepository, ScheduleRepository};
use db::{Database, DbConfig, DbError};
use jobs_core::{HandlerError, Job, JobId, JobKind, JobRequest, Priority, QueueName, QueuePolicy};
use pipeline::collaborators::{
    DeliveryReceipt, Optimization, OptimizationRequest, OutgoingNotification, RenderRequest,
    RenderedDocument,
};
use pipeline::{
    CollaboratorError, CollaboratorFuture, Collaborators, DocumentRenderer, JobSubmitter,
    NotificationSender, SubmitFuture, TextOptimizer,
};

pub const RENDERED_BYTES: &[u8] = b"%PDF-1.7 rendered";

pub async fn setup_db() -> Result<Database, DbError> {
    let database = format!("test_{}", ulid::Ulid::new());
    db::init(&DbConfig::memory().with_database(database)).await
}

pub async fn start_backend(db: &Database) -> Result<Arc<ActorQueueBackend>, BackendError> {
    let policies: BTreeMap<QueueName, QueuePolicy> =
        QueueName::ALL.into_iter().map(|q| (q, QueuePolicy::for_queue(q))).collect();
    let backend = ActorQueueBackend::start(
        &policies,
        QueueEntryRepository::new(db.clone()),
        ScheduleRepository::new(db.clone()),
    )
    .await?;
    Ok(Arc::new(backend))
}

/// A job as a worker would receive it on its first attempt.
pub fn job(kind: JobKind, payload: serde_json::Value, priority: Priority) -> Job {
    let options = QueuePolicy::for_queue(kind.queue()).job_options(kind);
    Job::new(JobId::new(), kind, payload, &options).with_priority(priority)
}

pub fn reporter(job: &Job) -> ProgressReporter {
    ProgressReporter::detached(job.queue, job.id)
}

#[derive(Default)]
pub struct FakeOptimizer {
    pub calls: AtomicU32,
    pub requests: Mutex<Vec<OptimizationRequest>>,
    pub error: Mutex<Option<CollaboratorError>>,
}

impl FakeOptimizer {
    pub fn fail_with(&self, error: CollaboratorError) {
        *self.error.lock().unwrap() = Some(error);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TextOptimizer for FakeOptimizer {
    fn optimize(&self, request: OptimizationRequest) -> CollaboratorFuture<'_, Optimization> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let error = self.error.lock().unwrap().clone();
        let optimized_text = format!("Optimized for {}", request.target_description);
        self.requests.lock().unwrap().push(request);
        Box::pin(async move {
            match error {
                Some(error) => Err(error),
                None => Ok(Optimization {
                    optimized_text,
                    score: 87.5,
                    keywords: vec!["rust".into(), "tokio".into()],
                }),
            }
        })
    }
}

#[derive(Default)]
pub struct FakeRenderer {
    pub requests: Mutex<Vec<RenderRequest>>,
    pub error: Mutex<Option<CollaboratorError>>,
}

impl FakeRenderer {
    pub fn fail_with(&self, error: CollaboratorError) {
        *self.error.lock().unwrap() = Some(error);
    }
}

impl DocumentRenderer for FakeRenderer {
    fn render(&self, request: RenderRequest) -> CollaboratorFuture<'_, RenderedDocument> {
        let error = self.error.lock().unwrap().clone();
        let file_name = format!("{}.pdf", request.template_id);
        self.requests.lock().unwrap().push(request);
        Box::pin(async move {
            match error {
                Some(error) => Err(error),
                None => Ok(RenderedDocument {
                    bytes: RENDERED_BYTES.to_vec(),
                    file_name,
                }),
            }
        })
    }
}

pub struct FakeSender {
    pub sent: Mutex<Vec<OutgoingNotification>>,
    pub accept: Mutex<bool>,
    pub error: Mutex<Option<CollaboratorError>>,
}

impl Default for FakeSender {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            accept: Mutex::new(true),
            error: Mutex::new(None),
        }
    }
}

impl NotificationSender for FakeSender {
    fn send(&self, notification: OutgoingNotification) -> CollaboratorFuture<'_, DeliveryReceipt> {
        let error = self.error.lock().unwrap().clone();
        let success = *self.accept.lock().unwrap();
        self.sent.lock().unwrap().push(notification);
        Box::pin(async move {
            match error {
                Some(error) => Err(error),
                None => Ok(DeliveryReceipt {
                    success,
                    message_id: success.then(|| "msg-1".to_string()),
                }),
            }
        })
    }
}

/// Records chained submissions instead of enqueueing them.
#[derive(Default)]
pub struct RecordingSubmitter {
    pub submitted: Mutex<Vec<(JobRequest, Priority)>>,
    pub unavailable: Mutex<bool>,
}

impl RecordingSubmitter {
    pub fn submitted(&self) -> Vec<(JobRequest, Priority)> {
        self.submitted.lock().unwrap().clone()
    }
}

impl JobSubmitter for RecordingSubmitter {
    fn submit_chained(&self, request: JobRequest, priority: Priority) -> SubmitFuture<'_> {
        let unavailable = *self.unavailable.lock().unwrap();
        if !unavailable {
            self.submitted.lock().unwrap().push((request, priority));
        }
        Box::pin(async move {
            if unavailable {
                Err(HandlerError::transient("queue backend unavailable"))
            } else {
                Ok(JobId::new())
            }
        })
    }
}

/// Fakes plus a real document repository on the test database.
pub struct Fakes {
    pub documents: DocumentRepository,
    pub optimizer: Arc<FakeOptimizer>,
    pub renderer: Arc<FakeRenderer>,
    pub sender: Arc<FakeSender>,
    pub submitter: Arc<RecordingSubmitter>,
}

impl Fakes {
    pub fn new(db: &Database) -> Self {
        Self {
            documents: DocumentRepository::new(db.clone()),
            optimizer: Arc::new(FakeOptimizer::default()),
            renderer: Arc::new(FakeRenderer::default()),
            sender: Arc::new(FakeSender::default()),
            submitter: Arc::new(RecordingSubmitter::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            documents: Arc::new(self.documents.clone()),
            optimizer: self.optimizer.clone(),
            renderer: self.renderer.clone(),
            sender: self.sender.clone(),
        }
    }
}

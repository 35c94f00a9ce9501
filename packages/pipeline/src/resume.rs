//! Optimize a stored document and send the result to its owner.

use std::sync::Arc;

use actors::{HandlerFuture, JobHandler, ProgressReporter};
use jobs_core::{
    AttachmentPayload, HandlerError, Job, JobKind, NotificationPayload, ResumeOptimizationPayload,
    decode_payload,
};
use serde_json::json;

use crate::Collaborators;
use crate::collaborators::{OptimizationRequest, RenderRequest};
use crate::notification::chain_notification;
use crate::submitter::JobSubmitter;

pub const OPTIMIZATION_COMPLETE_TEMPLATE: &str = "optimization_complete";

#[derive(Clone)]
pub struct ResumeOptimizationHandler {
    collaborators: Collaborators,
    submitter: Arc<dyn JobSubmitter>,
}

impl ResumeOptimizationHandler {
    pub fn new(collaborators: Collaborators, submitter: Arc<dyn JobSubmitter>) -> Self {
        Self {
            collaborators,
            submitter,
        }
    }

    async fn run(
        &self,
        job: &Job,
        progress: &ProgressReporter,
    ) -> Result<serde_json::Value, HandlerError> {
        let payload: ResumeOptimizationPayload = decode_payload(job.kind, &job.payload)?;

        let document = self
            .collaborators
            .documents
            .lookup(&payload.document_id)
            .await
            .map_err(|e| e.into_handler_error("document lookup"))?
            .ok_or_else(|| HandlerError::permanent("referenced document does not exist"))?;
        let text = document
            .extracted_text
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| HandlerError::permanent("referenced document has no extracted text"))?;
        progress.report(25);

        // Every optimizer failure is worth another attempt.
        let optimization = self
            .collaborators
            .optimizer
            .optimize(OptimizationRequest {
                text,
                target_description: payload.target_description.clone(),
                template_type: payload.template_id.clone(),
            })
            .await
            .map_err(|e| HandlerError::transient(format!("text optimization failed: {e}")))?;
        progress.report(50);

        let rendered = self
            .collaborators
            .renderer
            .render(RenderRequest {
                template_id: payload.template_id.clone(),
                content: json!({
                    "optimizedText": optimization.optimized_text,
                    "keywords": optimization.keywords,
                }),
                metadata: document.parsed_metadata,
            })
            .await
            .map_err(|e| e.into_handler_error("document rendering"))?;
        progress.report(75);

        let notification = NotificationPayload {
            recipient: payload.email.clone(),
            template: OPTIMIZATION_COMPLETE_TEMPLATE.to_string(),
            template_data: json!({
                "userId": payload.user_id,
                "documentId": payload.document_id,
                "score": optimization.score,
                "fileName": rendered.file_name,
            }),
            attachments: vec![AttachmentPayload::from_bytes(
                rendered.file_name.clone(),
                rendered.content_type(),
                &rendered.bytes,
            )],
        };
        let notification_job_id =
            chain_notification(self.submitter.as_ref(), notification, job).await;
        progress.report(100);

        Ok(json!({
            "optimizedText": optimization.optimized_text,
            "score": optimization.score,
            "keywords": optimization.keywords,
            "fileName": rendered.file_name,
            "documentId": payload.document_id,
            "notificationJobId": notification_job_id.map(|id| id.to_string()),
        }))
    }
}

impl JobHandler for ResumeOptimizationHandler {
    fn kind(&self) -> JobKind {
        JobKind::ResumeOptimization
    }

    fn handle(&self, job: &Job, progress: ProgressReporter) -> HandlerFuture {
        let handler = self.clone();
        let job = job.clone();
        Box::pin(async move { handler.run(&job, &progress).await })
    }
}

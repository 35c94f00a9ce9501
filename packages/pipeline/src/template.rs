//! Generate a new document from caller-supplied structured data.

use std::sync::Arc;

use actors::{HandlerFuture, JobHandler, ProgressReporter};
use db::repositories::{DocumentRecord, DocumentStatus};
use jobs_core::{
    AttachmentPayload, HandlerError, Job, JobKind, NotificationPayload, PackageTier,
    TemplateGenerationPayload,
    decode_payload, generated_document_id,
};
use serde_json::{Value, json};

use crate::Collaborators;
use crate::collaborators::{OptimizationRequest, RenderRequest};
use crate::notification::chain_notification;
use crate::submitter::JobSubmitter;

pub const TEMPLATE_READY_TEMPLATE: &str = "template_ready";

#[derive(Clone)]
pub struct TemplateGenerationHandler {
    collaborators: Collaborators,
    submitter: Arc<dyn JobSubmitter>,
}

impl TemplateGenerationHandler {
    pub fn new(collaborators: Collaborators, submitter: Arc<dyn JobSubmitter>) -> Self {
        Self {
            collaborators,
            submitter,
        }
    }

    async fn run(&self, job: &Job, progress: &ProgressReporter) -> Result<Value, HandlerError> {
        let payload: TemplateGenerationPayload = decode_payload(job.kind, &job.payload)?;
        let documents = &self.collaborators.documents;

        // Keyed by job id, so a retried attempt overwrites its own document.
        let document_id = generated_document_id(job.id);
        let document =
            DocumentRecord::new(&document_id, &payload.user_id, DocumentStatus::Processing)
                .with_metadata(json!({
                    "templateId": payload.template_id,
                    "packageTier": payload.package_tier,
                    "jobId": job.id.to_string(),
                }));
        documents
            .save(document)
            .await
            .map_err(|e| e.into_handler_error("document bookkeeping"))?;
        progress.report(25);

        let (content, score) = match payload.package_tier {
            PackageTier::Basic => (json!({ "structuredData": payload.structured_data }), None),
            PackageTier::Enhanced => {
                let target_description = payload
                    .structured_data
                    .get("targetRole")
                    .and_then(Value::as_str)
                    .unwrap_or(payload.template_id.as_str())
                    .to_string();
                let optimization = self
                    .collaborators
                    .optimizer
                    .optimize(OptimizationRequest {
                        text: flatten_text(&payload.structured_data),
                        target_description,
                        template_type: payload.template_id.clone(),
                    })
                    .await
                    .map_err(|e| {
                        HandlerError::transient(format!("text optimization failed: {e}"))
                    })?;
                let content = json!({
                    "structuredData": payload.structured_data,
                    "optimizedText": optimization.optimized_text,
                    "keywords": optimization.keywords,
                });
                (content, Some(optimization.score))
            }
        };
        progress.report(50);

        let rendered = self
            .collaborators
            .renderer
            .render(RenderRequest {
                template_id: payload.template_id.clone(),
                content,
                metadata: json!({ "documentId": document_id, "userId": payload.user_id }),
            })
            .await
            .map_err(|e| e.into_handler_error("document rendering"))?;
        progress.report(75);

        let notification = NotificationPayload {
            recipient: payload.email.clone(),
            template: TEMPLATE_READY_TEMPLATE.to_string(),
            template_data: json!({
                "userId": payload.user_id,
                "documentId": document_id,
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

        documents
            .set_status(&document_id, DocumentStatus::Processed)
            .await
            .map_err(|e| e.into_handler_error("document bookkeeping"))?;
        progress.report(100);

        Ok(json!({
            "documentId": document_id,
            "fileName": rendered.file_name,
            "packageTier": payload.package_tier,
            "score": score,
            "notificationJobId": notification_job_id.map(|id| id.to_string()),
        }))
    }
}

impl JobHandler for TemplateGenerationHandler {
    fn kind(&self) -> JobKind {
        JobKind::TemplateGeneration
    }

    fn handle(&self, job: &Job, progress: ProgressReporter) -> HandlerFuture {
        let handler = self.clone();
        let job = job.clone();
        Box::pin(async move { handler.run(&job, &progress).await })
    }
}

/// Plain text of every string, number and boolean in `value`, one
/// `key: value` line per leaf.
fn flatten_text(value: &Value) -> String {
    fn walk(key: &str, value: &Value, lines: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (k, v) in map {
                    walk(k, v, lines);
                }
            }
            Value::Array(items) => {
                for item in items {
                    walk(key, item, lines);
                }
            }
            Value::String(s) if !s.trim().is_empty() => lines.push(format!("{key}: {s}")),
            Value::Number(n) => lines.push(format!("{key}: {n}")),
            Value::Bool(b) => lines.push(format!("{key}: {b}")),
            _ => {}
        }
    }

    let mut lines = Vec::new();
    walk("", value, &mut lines);
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_text_walks_nested_values() {
        let data = json!({
            "name": "Ada",
            "skills": ["Rust", "SQL"],
            "experience": [{ "company": "Analytical Engines", "years": 3 }],
            "blank": "  ",
        });
        let text = flatten_text(&data);
        assert!(text.contains("name: Ada"));
        assert!(text.contains("skills: Rust"));
        assert!(text.contains("skills: SQL"));
        assert!(text.contains("company: Analytical Engines"));
        assert!(text.contains("years: 3"));
        assert!(!text.contains("blank"));
    }
}

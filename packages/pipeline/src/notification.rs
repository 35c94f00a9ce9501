//! Notification delivery and chaining from other pipelines.

use std::sync::Arc;

use actors::{HandlerFuture, JobHandler, ProgressReporter};
use jobs_core::{HandlerError, Job, JobId, JobKind, JobRequest, NotificationPayload, decode_payload};
use serde_json::json;

use crate::collaborators::{Attachment, NotificationSender, OutgoingNotification};
use crate::submitter::JobSubmitter;

/// Submit a notification on behalf of `parent`, inheriting its priority.
///
/// A failed submission is logged and reported as `None`; the parent job still
/// succeeds.
pub(crate) async fn chain_notification(
    submitter: &dyn JobSubmitter,
    notification: NotificationPayload,
    parent: &Job,
) -> Option<JobId> {
    let template = notification.template.clone();
    match submitter
        .submit_chained(JobRequest::Notification(notification), parent.priority)
        .await
    {
        Ok(id) => {
            tracing::debug!(
                job_id = %parent.id,
                notification_job_id = %id,
                %template,
                "Chained notification"
            );
            Some(id)
        }
        Err(e) => {
            tracing::warn!(
                job_id = %parent.id,
                %template,
                "Failed to chain notification: {}",
                e
            );
            None
        }
    }
}

#[derive(Clone)]
pub struct NotificationDeliveryHandler {
    sender: Arc<dyn NotificationSender>,
}

impl NotificationDeliveryHandler {
    pub fn new(sender: Arc<dyn NotificationSender>) -> Self {
        Self { sender }
    }

    async fn run(
        &self,
        job: &Job,
        progress: &ProgressReporter,
    ) -> Result<serde_json::Value, HandlerError> {
        let payload: NotificationPayload = decode_payload(job.kind, &job.payload)?;

        let attachments = payload
            .attachments
            .iter()
            .map(|attachment| -> Result<Attachment, HandlerError> {
                Ok(Attachment {
                    file_name: attachment.file_name.clone(),
                    content_type: attachment.content_type.clone(),
                    bytes: attachment.decode()?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        progress.report(50);

        let receipt = self
            .sender
            .send(OutgoingNotification {
                recipient: payload.recipient,
                template: payload.template.clone(),
                template_data: payload.template_data,
                attachments,
            })
            .await
            .map_err(|e| e.into_handler_error("notification delivery"))?;

        if !receipt.success {
            return Err(HandlerError::transient("notification delivery was not accepted"));
        }
        progress.report(100);

        Ok(json!({
            "delivered": true,
            "template": payload.template,
            "messageId": receipt.message_id,
        }))
    }
}

impl JobHandler for NotificationDeliveryHandler {
    fn kind(&self) -> JobKind {
        JobKind::NotificationDelivery
    }

    fn handle(&self, job: &Job, progress: ProgressReporter) -> HandlerFuture {
        let handler = self.clone();
        let job = job.clone();
        Box::pin(async move { handler.run(&job, &progress).await })
    }
}

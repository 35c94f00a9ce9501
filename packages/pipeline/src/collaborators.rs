//! Contracts of the engines the handlers call out to.
//!
//! The optimizer, renderer and notification sender live outside this
//! workspace; only their request/response shapes are fixed here. The document
//! store is also implemented over [`DocumentRepository`].

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use db::DbError;
use db::repositories::{DocumentRecord, DocumentRepository, DocumentStatus};
use jobs_core::HandlerError;
use thiserror::Error;

/// Future returned by every collaborator call.
pub type CollaboratorFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, CollaboratorError>> + Send + 'a>>;

/// Failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    /// Timed out, overloaded or unreachable. Worth retrying.
    #[error("{0}")]
    Unavailable(String),
    /// The collaborator refused the request; retrying will not help.
    #[error("{0}")]
    Rejected(String),
}

impl CollaboratorError {
    /// Map to a job failure, prefixing the stage that failed.
    pub fn into_handler_error(self, stage: &str) -> HandlerError {
        match self {
            CollaboratorError::Unavailable(message) => {
                HandlerError::transient(format!("{stage} failed: {message}"))
            }
            CollaboratorError::Rejected(message) => {
                HandlerError::permanent(format!("{stage} failed: {message}"))
            }
        }
    }
}

impl From<DbError> for CollaboratorError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(message) => CollaboratorError::Rejected(message),
            other => CollaboratorError::Unavailable(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationRequest {
    pub text: String,
    pub target_description: String,
    pub template_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Optimization {
    pub optimized_text: String,
    pub score: f64,
    pub keywords: Vec<String>,
}

/// Rewrites document text against a target description.
pub trait TextOptimizer: Send + Sync {
    fn optimize(&self, request: OptimizationRequest) -> CollaboratorFuture<'_, Optimization>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    pub template_id: String,
    pub content: serde_json::Value,
    pub metadata: serde_json::Value,
}

/// A rendered binary artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

impl RenderedDocument {
    /// MIME type guessed from the file extension.
    pub fn content_type(&self) -> &'static str {
        let extension = Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some("pdf") => "application/pdf",
            Some("docx") => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            Some("html") | Some("htm") => "text/html",
            Some("txt") => "text/plain",
            _ => "application/octet-stream",
        }
    }
}

/// Produces a binary document from a template and content.
pub trait DocumentRenderer: Send + Sync {
    fn render(&self, request: RenderRequest) -> CollaboratorFuture<'_, RenderedDocument>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingNotification {
    pub recipient: String,
    pub template: String,
    pub template_data: serde_json::Value,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReceipt {
    pub success: bool,
    pub message_id: Option<String>,
}

/// Delivers a templated notification.
pub trait NotificationSender: Send + Sync {
    fn send(&self, notification: OutgoingNotification) -> CollaboratorFuture<'_, DeliveryReceipt>;
}

/// Document bookkeeping used by the pipelines and the maintenance sweeps.
pub trait DocumentStore: Send + Sync {
    fn lookup<'a>(
        &'a self,
        document_id: &'a str,
    ) -> CollaboratorFuture<'a, Option<DocumentRecord>>;

    /// Insert or replace a document.
    fn save(&self, document: DocumentRecord) -> CollaboratorFuture<'_, ()>;

    fn set_status<'a>(
        &'a self,
        document_id: &'a str,
        status: DocumentStatus,
    ) -> CollaboratorFuture<'a, ()>;

    /// Remove documents that never finished processing, created before `cutoff`.
    fn purge_unprocessed_before(&self, cutoff: DateTime<Utc>) -> CollaboratorFuture<'_, u64>;
}

impl DocumentStore for DocumentRepository {
    fn lookup<'a>(
        &'a self,
        document_id: &'a str,
    ) -> CollaboratorFuture<'a, Option<DocumentRecord>> {
        Box::pin(async move { Ok(self.find(document_id).await?) })
    }

    fn save(&self, document: DocumentRecord) -> CollaboratorFuture<'_, ()> {
        Box::pin(async move {
            self.upsert(&document).await?;
            Ok(())
        })
    }

    fn set_status<'a>(
        &'a self,
        document_id: &'a str,
        status: DocumentStatus,
    ) -> CollaboratorFuture<'a, ()> {
        Box::pin(async move {
            self.update_status(document_id, status).await?;
            Ok(())
        })
    }

    fn purge_unprocessed_before(&self, cutoff: DateTime<Utc>) -> CollaboratorFuture<'_, u64> {
        Box::pin(async move {
            Ok(DocumentRepository::purge_unprocessed_before(self, cutoff).await?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_follows_extension() {
        let doc = |name: &str| RenderedDocument {
            bytes: Vec::new(),
            file_name: name.to_string(),
        };
        assert_eq!(doc("cv.PDF").content_type(), "application/pdf");
        assert_eq!(doc("cv.html").content_type(), "text/html");
        assert_eq!(doc("cv").content_type(), "application/octet-stream");
    }

    #[test]
    fn unavailable_maps_to_transient() {
        let err = CollaboratorError::Unavailable("timeout".into())
            .into_handler_error("document rendering");
        assert!(err.is_retryable());
        assert_eq!(err.message(), "document rendering failed: timeout");

        let err = CollaboratorError::Rejected("unknown template".into())
            .into_handler_error("document rendering");
        assert!(!err.is_retryable());
    }
}

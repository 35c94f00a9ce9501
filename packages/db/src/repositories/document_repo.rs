//! Document bookkeeping: extracted text and processing state of user files.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

const TABLE: &str = "document";

/// Processing state of a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Uploaded, text extracted, never run through a pipeline.
    Uploaded,
    /// A generation pipeline is producing it.
    Processing,
    Processed,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Processed => "processed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(DocumentStatus::Uploaded),
            "processing" => Some(DocumentStatus::Processing),
            "processed" => Some(DocumentStatus::Processed),
            _ => None,
        }
    }
}

/// A user document as seen by the job pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRecord {
    pub document_id: String,
    pub user_id: String,
    pub extracted_text: Option<String>,
    pub parsed_metadata: serde_json::Value,
    pub status: DocumentStatus,
    pub created_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn new(
        document_id: impl Into<String>,
        user_id: impl Into<String>,
        status: DocumentStatus,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            user_id: user_id.into(),
            extracted_text: None,
            parsed_metadata: serde_json::Value::Null,
            status,
            created_at: Utc::now(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.extracted_text = Some(text.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.parsed_metadata = metadata;
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DocumentRow {
    document_id: String,
    user_id: String,
    extracted_text: Option<String>,
    parsed_metadata: serde_json::Value,
    status: String,
    created_at: i64,
}

impl DocumentRow {
    fn from_record(doc: &DocumentRecord) -> Self {
        Self {
            document_id: doc.document_id.clone(),
            user_id: doc.user_id.clone(),
            extracted_text: doc.extracted_text.clone(),
            parsed_metadata: doc.parsed_metadata.clone(),
            status: doc.status.as_str().to_string(),
            created_at: doc.created_at.timestamp_millis(),
        }
    }

    fn into_record(self) -> Result<DocumentRecord, DbError> {
        let status = DocumentStatus::parse(&self.status).ok_or_else(|| {
            DbError::Serialization(format!("unknown document status: {}", self.status))
        })?;
        let created_at = DateTime::from_timestamp_millis(self.created_at).ok_or_else(|| {
            DbError::Serialization(format!("timestamp out of range: {}", self.created_at))
        })?;
        Ok(DocumentRecord {
            document_id: self.document_id,
            user_id: self.user_id,
            extracted_text: self.extracted_text,
            parsed_metadata: self.parsed_metadata,
            status,
            created_at,
        })
    }
}

/// Repository for document bookkeeping.
#[derive(Clone)]
pub struct DocumentRepository {
    db: Database,
}

impl DocumentRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace a document by id.
    pub async fn upsert(&self, doc: &DocumentRecord) -> Result<DocumentRecord, DbError> {
        let row: Option<DocumentRow> = self
            .db
            .upsert((TABLE, doc.document_id.clone()))
            .content(DocumentRow::from_record(doc))
            .await?;

        row.ok_or_else(|| DbError::Query(format!("Failed to store document {}", doc.document_id)))?
            .into_record()
    }

    pub async fn find(&self, document_id: &str) -> Result<Option<DocumentRecord>, DbError> {
        let row: Option<DocumentRow> = self.db.select((TABLE, document_id.to_string())).await?;
        row.map(DocumentRow::into_record).transpose()
    }

    pub async fn update_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
    ) -> Result<DocumentRecord, DbError> {
        let mut response = self
            .db
            .query("UPDATE type::thing('document', $id) SET status = $status RETURN AFTER")
            .bind(("id", document_id.to_string()))
            .bind(("status", status.as_str().to_string()))
            .await?;

        let rows: Vec<DocumentRow> = response.take(0)?;
        rows.into_iter()
            .next()
            .ok_or_else(|| DbError::NotFound(format!("Document not found: {}", document_id)))?
            .into_record()
    }

    /// Delete documents that never finished processing and were created
    /// before `cutoff`. Returns how many were removed.
    pub async fn purge_unprocessed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                DELETE document
                WHERE status != "processed" AND created_at < $cutoff
                RETURN BEFORE
                "#,
            )
            .bind(("cutoff", cutoff.timestamp_millis()))
            .await?;

        let rows: Vec<DocumentRow> = response.take(0)?;
        Ok(rows.len() as u64)
    }
}

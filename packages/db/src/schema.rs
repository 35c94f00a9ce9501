//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables and indexes. Safe to run on every start.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(JOB_RECORD_SCHEMA).await?.check()?;
    db.query(QUEUE_ENTRY_SCHEMA).await?.check()?;
    db.query(SCHEDULE_SCHEMA).await?.check()?;
    db.query(DOCUMENT_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job record table. Timestamps are epoch milliseconds so age sweeps can
/// compare them directly.
const JOB_RECORD_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job_record SCHEMALESS;

DEFINE INDEX IF NOT EXISTS job_record_id ON job_record FIELDS job_id UNIQUE;
DEFINE INDEX IF NOT EXISTS job_record_status ON job_record FIELDS status;
DEFINE INDEX IF NOT EXISTS job_record_kind ON job_record FIELDS kind;
DEFINE INDEX IF NOT EXISTS job_record_status_created ON job_record FIELDS status, created_at;
"#;

/// Persisted queue entries, so waiting work survives a restart.
const QUEUE_ENTRY_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS queue_entry SCHEMALESS;

DEFINE INDEX IF NOT EXISTS queue_entry_queue ON queue_entry FIELDS queue;
DEFINE INDEX IF NOT EXISTS queue_entry_state ON queue_entry FIELDS queue, state;
"#;

/// Recurring schedules, keyed by their stable schedule id.
const SCHEDULE_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS schedule SCHEMALESS;

DEFINE INDEX IF NOT EXISTS schedule_queue ON schedule FIELDS queue;
"#;

/// Document bookkeeping used by the pipeline.
const DOCUMENT_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS document SCHEMALESS;

DEFINE INDEX IF NOT EXISTS document_id ON document FIELDS document_id UNIQUE;
DEFINE INDEX IF NOT EXISTS document_status_created ON document FIELDS status, created_at;
"#;

//! Repository implementations for database operations.

mod document_repo;
mod job_record_repo;
mod queue_entry_repo;
mod schedule_repo;

pub use document_repo::{DocumentRecord, DocumentRepository, DocumentStatus};
pub use job_record_repo::{JobRecordRepository, RecordFilter};
pub use queue_entry_repo::{EntryState, QueueEntry, QueueEntryRepository};
pub use schedule_repo::ScheduleRepository;

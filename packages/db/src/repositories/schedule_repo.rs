//! Recurring schedule repository.

use jobs_core::{JobKind, Priority, QueueName, RecurringSchedule};
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

const TABLE: &str = "schedule";

/// Repository for recurring schedules, keyed by schedule id.
#[derive(Clone)]
pub struct ScheduleRepository {
    db: Database,
}

#[derive(Debug, Serialize, Deserialize)]
struct ScheduleRow {
    schedule_id: String,
    queue: String,
    kind: String,
    cron_expression: String,
    payload: serde_json::Value,
    priority: u8,
}

impl ScheduleRow {
    fn from_schedule(schedule: &RecurringSchedule) -> Self {
        Self {
            schedule_id: schedule.schedule_id.clone(),
            queue: schedule.queue().as_str().to_string(),
            kind: schedule.kind.as_str().to_string(),
            cron_expression: schedule.cron_expression.clone(),
            payload: schedule.payload.clone(),
            priority: schedule.priority.value(),
        }
    }

    fn into_schedule(self) -> Result<RecurringSchedule, DbError> {
        let kind = JobKind::parse(&self.kind)
            .ok_or_else(|| DbError::Serialization(format!("unknown job kind: {}", self.kind)))?;
        Ok(RecurringSchedule {
            schedule_id: self.schedule_id,
            cron_expression: self.cron_expression,
            kind,
            payload: self.payload,
            priority: Priority(self.priority),
        })
    }
}

impl ScheduleRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace by schedule id. Re-registering never duplicates.
    pub async fn upsert(&self, schedule: &RecurringSchedule) -> Result<(), DbError> {
        let _: Option<ScheduleRow> = self
            .db
            .upsert((TABLE, schedule.schedule_id.clone()))
            .content(ScheduleRow::from_schedule(schedule))
            .await?;
        Ok(())
    }

    pub async fn get(&self, schedule_id: &str) -> Result<RecurringSchedule, DbError> {
        let row: Option<ScheduleRow> = self.db.select((TABLE, schedule_id.to_string())).await?;
        row.ok_or_else(|| DbError::NotFound(format!("Schedule not found: {}", schedule_id)))?
            .into_schedule()
    }

    pub async fn delete(&self, schedule_id: &str) -> Result<(), DbError> {
        let _: Option<ScheduleRow> = self.db.delete((TABLE, schedule_id.to_string())).await?;
        Ok(())
    }

    pub async fn list_for_queue(
        &self,
        queue: QueueName,
    ) -> Result<Vec<RecurringSchedule>, DbError> {
        let mut response = self
            .db
            .query("SELECT * FROM schedule WHERE queue = $queue ORDER BY schedule_id ASC")
            .bind(("queue", queue.as_str().to_string()))
            .await?;

        let rows: Vec<ScheduleRow> = response.take(0)?;
        rows.into_iter().map(ScheduleRow::into_schedule).collect()
    }
}

//! Queue actor for managing jobs in a single named queue.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use db::repositories::{EntryState, QueueEntry, QueueEntryRepository, ScheduleRepository};
use jobs_core::{
    HandlerError, Job, JobId, JobKind, Priority, QueueCounts, QueueName, QueuePolicy,
    RecurringSchedule,
};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::task::JoinHandle;

use crate::backend::{BackendError, NackOutcome, parse_cron};
use crate::messages::QueueMessage;

/// Startup arguments for a queue actor.
pub struct QueueActorArgs {
    pub queue: QueueName,
    pub policy: QueuePolicy,
    pub entries: QueueEntryRepository,
    pub schedules: ScheduleRepository,
}

/// A registered recurring schedule and its timer task.
struct Trigger {
    schedule: RecurringSchedule,
    task: JoinHandle<()>,
}

/// State for the queue actor.
pub struct QueueActorState {
    queue: QueueName,
    policy: QueuePolicy,
    store: QueueEntryRepository,
    schedules: ScheduleRepository,
    /// Every unfinished entry plus the retained finished ones.
    entries: HashMap<JobId, QueueEntry>,
    /// Waiting jobs ordered by priority, then enqueue sequence.
    ready: BTreeMap<(Priority, u64), JobId>,
    seq: u64,
    /// Finished entries, oldest first, for retention.
    completed: VecDeque<JobId>,
    failed: VecDeque<JobId>,
    triggers: HashMap<String, Trigger>,
    draining: bool,
}

impl QueueActorState {
    fn new(args: QueueActorArgs) -> Self {
        Self {
            queue: args.queue,
            policy: args.policy,
            store: args.entries,
            schedules: args.schedules,
            entries: HashMap::new(),
            ready: BTreeMap::new(),
            seq: 0,
            completed: VecDeque::new(),
            failed: VecDeque::new(),
            triggers: HashMap::new(),
            draining: false,
        }
    }

    fn push_ready(&mut self, id: JobId, priority: Priority) {
        self.seq += 1;
        self.ready.insert((priority, self.seq), id);
    }

    async fn persist(&self, entry: &QueueEntry) {
        if let Err(e) = self.store.upsert(entry).await {
            tracing::warn!("Failed to persist queue entry {}: {}", entry.job.id, e);
        }
    }

    /// Load persisted entries and schedules. Entries that were active when the
    /// previous process stopped go back to waiting.
    async fn restore(&mut self, myself: &ActorRef<QueueMessage>) -> Result<(), ActorProcessingErr> {
        let stored = self.store.list_for_queue(self.queue).await?;
        let mut finished = Vec::new();

        for mut entry in stored {
            let id = entry.job.id;
            match entry.state {
                EntryState::Active => {
                    tracing::warn!(
                        job_id = %id,
                        worker = ?entry.worker_id,
                        "Reclaiming job that was active before restart"
                    );
                    entry.state = EntryState::Waiting;
                    entry.worker_id = None;
                    entry.progress = 0;
                    self.persist(&entry).await;
                    self.push_ready(id, entry.job.priority);
                }
                EntryState::Waiting => self.push_ready(id, entry.job.priority),
                EntryState::Delayed => {}
                EntryState::Completed | EntryState::Failed => {
                    finished.push((entry.finished_at, entry.state, id));
                }
            }
            self.entries.insert(id, entry);
        }

        finished.sort_by_key(|(finished_at, _, id)| (*finished_at, *id));
        for (_, state, id) in finished {
            if state == EntryState::Completed {
                self.completed.push_back(id);
            } else {
                self.failed.push_back(id);
            }
        }
        self.prune().await;

        for schedule in self.schedules.list_for_queue(self.queue).await? {
            match parse_cron(&schedule.schedule_id, &schedule.cron_expression) {
                Ok(cron) => {
                    let task = spawn_trigger(myself.clone(), schedule.schedule_id.clone(), cron);
                    self.triggers
                        .insert(schedule.schedule_id.clone(), Trigger { schedule, task });
                }
                Err(e) => tracing::warn!("Skipping stored schedule: {}", e),
            }
        }

        if !self.entries.is_empty() || !self.triggers.is_empty() {
            tracing::info!(
                "Restored queue {}: {} entries, {} schedules",
                self.queue,
                self.entries.len(),
                self.triggers.len()
            );
        }

        Ok(())
    }

    async fn insert(&mut self, job: Job) -> Result<JobId, BackendError> {
        let id = job.id;
        if self.entries.contains_key(&id) {
            tracing::debug!(job_id = %id, "Job already enqueued");
            return Ok(id);
        }

        let entry = QueueEntry::new(job);
        self.store.upsert(&entry).await?;

        if entry.state == EntryState::Waiting {
            self.push_ready(id, entry.job.priority);
        }
        tracing::debug!(
            job_id = %id,
            queue = %self.queue,
            kind = %entry.job.kind,
            priority = %entry.job.priority,
            "Job enqueued"
        );
        self.entries.insert(id, entry);

        Ok(id)
    }

    /// Move delayed entries whose time has come to waiting.
    async fn promote_due(&mut self) {
        let now = Utc::now();
        let mut due: Vec<(DateTime<Utc>, JobId)> = self
            .entries
            .values()
            .filter(|e| e.state == EntryState::Delayed && e.job.is_due(now))
            .map(|e| (e.job.run_at, e.job.id))
            .collect();
        due.sort();

        for (_, id) in due {
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            entry.state = EntryState::Waiting;
            let priority = entry.job.priority;
            let snapshot = entry.clone();
            self.persist(&snapshot).await;
            self.push_ready(id, priority);
        }
    }

    async fn dequeue(&mut self, kind: JobKind, worker_id: String) -> Option<Job> {
        if self.draining {
            return None;
        }
        self.promote_due().await;

        let (key, id) = self
            .ready
            .iter()
            .find(|(_, id)| self.entries.get(id).is_some_and(|e| e.job.kind == kind))
            .map(|(key, id)| (*key, *id))?;
        self.ready.remove(&key);

        let entry = self.entries.get_mut(&id)?;
        entry.state = EntryState::Active;
        entry.worker_id = Some(worker_id);
        entry.progress = 0;
        let snapshot = entry.clone();
        self.persist(&snapshot).await;

        Some(snapshot.job)
    }

    async fn finish(&mut self, id: JobId, state: EntryState) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.state = state;
        entry.worker_id = None;
        entry.finished_at = Some(Utc::now());
        if state == EntryState::Completed {
            entry.progress = 100;
        }
        let snapshot = entry.clone();
        self.persist(&snapshot).await;

        match state {
            EntryState::Completed => self.completed.push_back(id),
            EntryState::Failed => self.failed.push_back(id),
            _ => {}
        }
        self.prune().await;
    }

    /// Drop finished entries beyond the retention limits.
    async fn prune(&mut self) {
        let mut expired = Vec::new();
        while self.completed.len() > self.policy.keep_completed {
            expired.extend(self.completed.pop_front());
        }
        while self.failed.len() > self.policy.keep_failed {
            expired.extend(self.failed.pop_front());
        }

        for id in expired {
            self.entries.remove(&id);
            if let Err(e) = self.store.delete(id).await {
                tracing::warn!("Failed to delete pruned queue entry {}: {}", id, e);
            }
        }
    }

    async fn ack(&mut self, id: JobId) {
        match self.entries.get(&id) {
            Some(entry) if entry.state == EntryState::Active => {
                self.finish(id, EntryState::Completed).await;
                tracing::debug!(job_id = %id, queue = %self.queue, "Job acknowledged");
            }
            _ => tracing::debug!(job_id = %id, "Ignoring ack for job that is not active"),
        }
    }

    /// Drop an active entry without counting it as completed or failed.
    async fn discard(&mut self, id: JobId) {
        if !self.entries.get(&id).is_some_and(|e| e.state == EntryState::Active) {
            tracing::debug!(job_id = %id, "Ignoring discard for job that is not active");
            return;
        }
        self.entries.remove(&id);
        if let Err(e) = self.store.delete(id).await {
            tracing::warn!("Failed to delete discarded queue entry {}: {}", id, e);
        }
        tracing::debug!(job_id = %id, queue = %self.queue, "Job discarded");
    }

    async fn nack(&mut self, id: JobId, error: &HandlerError) -> Result<NackOutcome, BackendError> {
        let Some(entry) = self
            .entries
            .get_mut(&id)
            .filter(|e| e.state == EntryState::Active)
        else {
            return Err(BackendError::UnknownJob(id));
        };

        let failed_attempt = entry.job.attempt;
        entry.job.attempt += 1;
        entry.last_error = Some(error.message().to_string());
        entry.worker_id = None;
        entry.progress = 0;

        if !error.is_retryable() || entry.job.attempt >= entry.job.max_attempts {
            let attempts = entry.job.attempt;
            self.finish(id, EntryState::Failed).await;
            tracing::info!(job_id = %id, queue = %self.queue, attempts, "Job failed permanently");
            return Ok(NackOutcome::Exhausted);
        }

        let delay = entry.job.backoff.delay_for(failed_attempt);
        entry.job.run_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        entry.state = EntryState::Delayed;
        let snapshot = entry.clone();
        self.persist(&snapshot).await;

        tracing::debug!(
            job_id = %id,
            attempt = snapshot.job.attempt,
            delay_ms = delay.as_millis() as u64,
            "Job scheduled for retry"
        );
        Ok(NackOutcome::Retrying { delay })
    }

    /// Count the attempt each job held by a lost worker was on as failed.
    async fn fail_worker(
        &mut self,
        worker_id: &str,
        error: &HandlerError,
    ) -> Vec<(JobId, NackOutcome)> {
        let held: Vec<JobId> = self
            .entries
            .values()
            .filter(|e| e.state == EntryState::Active && e.worker_id.as_deref() == Some(worker_id))
            .map(|e| e.job.id)
            .collect();

        let mut outcomes = Vec::with_capacity(held.len());
        for id in held {
            match self.nack(id, error).await {
                Ok(outcome) => outcomes.push((id, outcome)),
                Err(e) => {
                    tracing::warn!("Failed to release job {} of worker {}: {}", id, worker_id, e)
                }
            }
        }

        if !outcomes.is_empty() {
            tracing::warn!(
                "Failed {} job attempt(s) held by lost worker {}",
                outcomes.len(),
                worker_id
            );
        }
        outcomes
    }

    async fn counts(&mut self) -> QueueCounts {
        self.promote_due().await;

        let mut counts = QueueCounts::default();
        for entry in self.entries.values() {
            match entry.state {
                EntryState::Waiting => counts.waiting += 1,
                EntryState::Delayed => counts.delayed += 1,
                EntryState::Active => counts.active += 1,
                EntryState::Completed => counts.completed += 1,
                EntryState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    async fn upsert_recurring(
        &mut self,
        myself: &ActorRef<QueueMessage>,
        schedule: RecurringSchedule,
    ) -> Result<(), BackendError> {
        let cron = parse_cron(&schedule.schedule_id, &schedule.cron_expression)?;
        self.schedules.upsert(&schedule).await?;

        if let Some(previous) = self.triggers.remove(&schedule.schedule_id) {
            previous.task.abort();
        }

        let task = spawn_trigger(myself.clone(), schedule.schedule_id.clone(), cron);
        tracing::info!(
            "Registered recurring schedule {} ({}) on queue {}",
            schedule.schedule_id,
            schedule.cron_expression,
            self.queue
        );
        self.triggers
            .insert(schedule.schedule_id.clone(), Trigger { schedule, task });

        Ok(())
    }

    async fn fire(&mut self, schedule_id: &str) {
        if self.draining {
            return;
        }
        let Some(trigger) = self.triggers.get(schedule_id) else {
            return;
        };
        let schedule = trigger.schedule.clone();

        let job = Job::new(
            JobId::new(),
            schedule.kind,
            schedule.payload,
            &self.policy.job_options(schedule.kind),
        )
        .with_priority(schedule.priority)
        .with_schedule(schedule.schedule_id);

        match self.insert(job).await {
            Ok(id) => tracing::info!(job_id = %id, schedule_id, "Recurring schedule fired"),
            Err(e) => tracing::warn!("Recurring schedule {} failed to enqueue: {}", schedule_id, e),
        }
    }
}

/// Timer task that sends `FireRecurring` at each upcoming cron time.
fn spawn_trigger(
    myself: ActorRef<QueueMessage>,
    schedule_id: String,
    cron: cron::Schedule,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last = Utc::now();
        loop {
            let Some(next) = cron.after(&last).next() else {
                tracing::debug!(schedule_id = %schedule_id, "Schedule has no upcoming fire time");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(wait).await;
            last = next;

            let message = QueueMessage::FireRecurring {
                schedule_id: schedule_id.clone(),
            };
            if myself.send_message(message).is_err() {
                break;
            }
        }
    })
}

/// Queue actor that manages a single queue.
pub struct QueueActor;

impl Actor for QueueActor {
    type Msg = QueueMessage;
    type State = QueueActorState;
    type Arguments = QueueActorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting queue actor: {}", args.queue);
        let mut state = QueueActorState::new(args);
        state.restore(&myself).await?;
        Ok(state)
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for trigger in state.triggers.values() {
            trigger.task.abort();
        }
        tracing::info!("Queue actor stopped: {}", state.queue);
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            QueueMessage::Enqueue { request, reply } => {
                // Accepted while draining too; the entry waits for the next start.
                let job = request.into_job(&state.policy);
                let result = state.insert(job).await;
                let _ = reply.send(result);
            }

            QueueMessage::Dequeue { kind, worker_id, reply } => {
                let job = state.dequeue(kind, worker_id).await;
                let _ = reply.send(job);
            }

            QueueMessage::Ack { job_id, reply } => {
                state.ack(job_id).await;
                let _ = reply.send(Ok(()));
            }

            QueueMessage::Discard { job_id, reply } => {
                state.discard(job_id).await;
                let _ = reply.send(());
            }

            QueueMessage::Nack { job_id, error, reply } => {
                let outcome = state.nack(job_id, &error).await;
                let _ = reply.send(outcome);
            }

            QueueMessage::Progress { job_id, progress } => {
                if let Some(entry) = state.entries.get_mut(&job_id)
                    && entry.state == EntryState::Active
                {
                    entry.progress = progress.min(100);
                }
            }

            QueueMessage::GetProgress { job_id, reply } => {
                let progress = state
                    .entries
                    .get(&job_id)
                    .filter(|e| e.state == EntryState::Active)
                    .map(|e| e.progress);
                let _ = reply.send(progress);
            }

            QueueMessage::IsLive { job_id, reply } => {
                let live = state
                    .entries
                    .get(&job_id)
                    .is_some_and(|e| !e.state.is_finished());
                let _ = reply.send(live);
            }

            QueueMessage::FailWorker { worker_id, error, reply } => {
                let outcomes = state.fail_worker(&worker_id, &error).await;
                let _ = reply.send(outcomes);
            }

            QueueMessage::Counts { reply } => {
                let counts = state.counts().await;
                let _ = reply.send(counts);
            }

            QueueMessage::UpsertRecurring { schedule, reply } => {
                let result = state.upsert_recurring(&myself, schedule).await;
                let _ = reply.send(result);
            }

            QueueMessage::ListRecurring { reply } => {
                let mut schedules: Vec<RecurringSchedule> =
                    state.triggers.values().map(|t| t.schedule.clone()).collect();
                schedules.sort_by(|a, b| a.schedule_id.cmp(&b.schedule_id));
                let _ = reply.send(schedules);
            }

            QueueMessage::FireRecurring { schedule_id } => {
                state.fire(&schedule_id).await;
            }

            QueueMessage::Drain => {
                if !state.draining {
                    tracing::info!("Draining queue: {}", state.queue);
                    state.draining = true;
                }
            }
        }

        Ok(())
    }
}

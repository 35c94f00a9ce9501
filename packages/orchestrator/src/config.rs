//! Orchestrator configuration.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use db::DbConfig;
use jobs_core::{QueueName, QueuePolicy};
use pipeline::MaintenanceSettings;

use crate::error::OrchestratorError;

pub const ENV_DB_ENDPOINT: &str = "DOCJOBS_DB_ENDPOINT";
pub const ENV_DB_NAMESPACE: &str = "DOCJOBS_DB_NAMESPACE";
pub const ENV_DB_DATABASE: &str = "DOCJOBS_DB_DATABASE";
pub const ENV_SHUTDOWN_GRACE_SECS: &str = "DOCJOBS_SHUTDOWN_GRACE_SECS";
pub const ENV_STALE_DOCUMENT_HOURS: &str = "DOCJOBS_STALE_DOCUMENT_HOURS";

/// Everything needed to start an [`Orchestrator`](crate::Orchestrator).
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub db: DbConfig,
    /// Retry, retention and concurrency per queue.
    pub policies: BTreeMap<QueueName, QueuePolicy>,
    /// How often idle workers poll their queue.
    pub poll_interval: Duration,
    /// How long shutdown waits for running jobs.
    pub shutdown_grace: Duration,
    pub maintenance: MaintenanceSettings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            policies: QueueName::ALL
                .into_iter()
                .map(|queue| (queue, QueuePolicy::for_queue(queue)))
                .collect(),
            poll_interval: Duration::from_millis(250),
            shutdown_grace: Duration::from_secs(30),
            maintenance: MaintenanceSettings::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Defaults overridden by `DOCJOBS_*` environment variables.
    pub fn from_env() -> Result<Self, OrchestratorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, OrchestratorError> {
        let mut config = Self::default();

        if let Some(endpoint) = lookup(ENV_DB_ENDPOINT) {
            config.db = config.db.with_endpoint(endpoint);
        }
        if let Some(namespace) = lookup(ENV_DB_NAMESPACE) {
            config.db = config.db.with_namespace(namespace);
        }
        if let Some(database) = lookup(ENV_DB_DATABASE) {
            config.db = config.db.with_database(database);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_SHUTDOWN_GRACE_SECS)? {
            config.shutdown_grace = Duration::from_secs(secs);
        }
        if let Some(hours) = parse_var::<u64>(&lookup, ENV_STALE_DOCUMENT_HOURS)? {
            if hours == 0 {
                return Err(OrchestratorError::Config(format!(
                    "{ENV_STALE_DOCUMENT_HOURS} must be positive"
                )));
            }
            config.maintenance.stale_document_hours = hours;
        }

        Ok(config)
    }

    pub fn with_db(mut self, db: DbConfig) -> Self {
        self.db = db;
        self
    }

    /// Replace the policy of one queue.
    pub fn with_policy(mut self, queue: QueueName, policy: QueuePolicy) -> Self {
        self.policies.insert(queue, policy);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_maintenance(mut self, settings: MaintenanceSettings) -> Self {
        self.maintenance = settings;
        self
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, OrchestratorError> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| {
                OrchestratorError::Config(format!("{key} must be a number, got '{raw}'"))
            }),
        None => Ok(None),
    }
}

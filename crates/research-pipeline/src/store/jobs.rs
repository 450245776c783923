//! Fire-and-forget job records

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::PipelineError;
use crate::research::FinalReport;

/// Finished records older than this are purged
pub const DEFAULT_JOB_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub query: String,
    pub status: JobStatus,
    #[serde(default)]
    pub report: Option<FinalReport>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once the job reaches a terminal status
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(query: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            query: query.into(),
            status: JobStatus::Queued,
            report: None,
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    fn set_status(&mut self, status: JobStatus) {
        let now = Utc::now();
        self.status = status;
        self.updated_at = now;
        self.finished_at = status.is_terminal().then_some(now);
    }

    pub fn start(&mut self) {
        self.set_status(JobStatus::Running);
    }

    pub fn complete(&mut self, report: FinalReport) {
        self.report = Some(report);
        self.set_status(JobStatus::Completed);
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.set_status(JobStatus::Failed);
    }

    pub fn cancel(&mut self) {
        self.set_status(JobStatus::Cancelled);
    }

    /// Queued and running jobs never expire; finished ones do `ttl` after finishing
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match self.finished_at {
            Some(finished) if self.status.is_terminal() => (now - finished)
                .to_std()
                .map(|age| age >= ttl)
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, record: JobRecord) -> Result<(), PipelineError>;

    async fn get(&self, id: &str) -> Result<Option<JobRecord>, PipelineError>;

    /// Replace an existing record; returns false when the id is unknown
    async fn update(&self, record: JobRecord) -> Result<bool, PipelineError>;

    async fn remove(&self, id: &str) -> Result<Option<JobRecord>, PipelineError>;

    /// Drop expired records, returning how many were removed
    async fn purge_expired(&self) -> Result<usize, PipelineError>;
}

#[derive(Debug)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, JobRecord>>,
    ttl: Duration,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new(DEFAULT_JOB_TTL)
    }
}

impl MemoryJobStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, record: JobRecord) -> Result<(), PipelineError> {
        self.jobs.write().await.insert(record.id.clone(), record);
        Ok(())
    }

    /// Expired records read as absent even before a purge
    async fn get(&self, id: &str) -> Result<Option<JobRecord>, PipelineError> {
        let now = Utc::now();
        Ok(self
            .jobs
            .read()
            .await
            .get(id)
            .filter(|record| !record.is_expired(now, self.ttl))
            .cloned())
    }

    async fn update(&self, record: JobRecord) -> Result<bool, PipelineError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&record.id) {
            Some(existing) => {
                *existing = record;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, id: &str) -> Result<Option<JobRecord>, PipelineError> {
        Ok(self.jobs.write().await.remove(id))
    }

    async fn purge_expired(&self) -> Result<usize, PipelineError> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, record| !record.is_expired(now, self.ttl));
        Ok(before - jobs.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_job_lifecycle() {
        let store = MemoryJobStore::default();
        let mut record = JobRecord::new("Quantum Computing");
        let id = record.id.clone();
        store.insert(record.clone()).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap().unwrap().status, JobStatus::Queued);

        record.start();
        assert!(store.update(record.clone()).await.unwrap());
        assert_eq!(store.get(&id).await.unwrap().unwrap().status, JobStatus::Running);

        record.fail("LLM offline");
        store.update(record).await.unwrap();
        let stored = store.get(&id).await.unwrap().unwrap();
        assert!(stored.status.is_terminal());
        assert_eq!(stored.error.as_deref(), Some("LLM offline"));

        assert!(store.remove(&id).await.unwrap().is_some());
        assert!(store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_unknown_job() {
        let store = MemoryJobStore::default();
        assert!(!store.update(JobRecord::new("q")).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryJobStore::new(Duration::from_millis(50));
        let mut old = JobRecord::new("old");
        old.cancel();
        store.insert(old).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        let mut fresh = JobRecord::new("fresh");
        fresh.fail("search offline");
        let fresh_id = fresh.id.clone();
        store.insert(fresh).await.unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
        assert!(store.get(&fresh_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_running_job_outlives_ttl() {
        let store = MemoryJobStore::new(Duration::from_millis(20));
        let mut record = JobRecord::new("Long quantum survey");
        let id = record.id.clone();
        store.insert(record.clone()).await.unwrap();
        record.start();
        store.update(record.clone()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get(&id).await.unwrap().unwrap().status, JobStatus::Running);
        assert_eq!(store.purge_expired().await.unwrap(), 0);

        record.fail("LLM offline");
        assert!(store.update(record).await.unwrap());
        assert!(store.get(&id).await.unwrap().unwrap().finished_at.is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get(&id).await.unwrap().is_none());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
    }

    #[test]
    fn test_expiry_counts_from_finish() {
        let ttl = Duration::from_secs(60);
        let mut record = JobRecord::new("q");
        record.created_at -= chrono::Duration::hours(2);
        record.start();
        record.updated_at -= chrono::Duration::hours(2);
        assert!(!record.is_expired(Utc::now(), ttl));

        record.complete(crate::research::FinalReport::default());
        assert!(!record.is_expired(Utc::now(), ttl));
        assert!(record.is_expired(Utc::now() + chrono::Duration::minutes(2), ttl));
    }
}

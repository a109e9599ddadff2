//! In-memory job status
//!
//! Answers status queries for runs that may have no live SSE subscriber.
//! Nothing here is persisted; a restart forgets every job.

use crate::models::{JobRecord, JobState};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Finished jobs are kept this long
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(60 * 60);

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, JobRecord>,
    /// Temporary job id -> permanent project id
    aliases: HashMap<String, String>,
}

/// Job id -> status
pub struct JobTracker {
    inner: Mutex<Inner>,
    retention: Duration,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl JobTracker {
    pub fn new(retention: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            retention,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Start tracking a job (replaces a previous job with the same id)
    pub fn register(&self, job_id: &str, plan: Vec<String>) {
        self.prune();
        let mut inner = self.lock();
        inner.aliases.remove(job_id);
        inner
            .jobs
            .insert(job_id.to_string(), JobRecord::new(job_id, plan));
    }

    fn update(&self, job_id: &str, apply: impl FnOnce(&mut JobRecord)) {
        let mut inner = self.lock();
        let key = inner
            .aliases
            .get(job_id)
            .cloned()
            .unwrap_or_else(|| job_id.to_string());
        if let Some(record) = inner.jobs.get_mut(&key) {
            apply(record);
            record.updated_at = Utc::now();
        }
    }

    /// Merge another run's plan into a job shared by several runs
    pub fn extend_plan(&self, job_id: &str, plan: &[String]) {
        self.update(job_id, |r| {
            for module in plan {
                if !r.plan.contains(module) {
                    r.plan.push(module.clone());
                }
            }
        });
    }

    pub fn set_running(&self, job_id: &str, module_index: usize, module: &str) {
        self.update(job_id, |r| {
            r.state = JobState::Running {
                module_index,
                module: module.to_string(),
            }
        });
    }

    pub fn complete(&self, job_id: &str) {
        self.update(job_id, |r| r.state = JobState::Completed);
    }

    pub fn fail(&self, job_id: &str, message: &str) {
        self.update(job_id, |r| {
            r.state = JobState::Failed {
                message: message.to_string(),
            }
        });
    }

    /// Move a temporary job onto its permanent project id
    ///
    /// Lookups by either id return the same record afterwards.
    pub fn promote(&self, temp_id: &str, project_id: &str) {
        let mut inner = self.lock();
        if let Some(mut record) = inner.jobs.remove(temp_id) {
            record.project_id = Some(project_id.to_string());
            record.updated_at = Utc::now();
            inner.jobs.insert(project_id.to_string(), record);
        }
        if temp_id != project_id {
            inner
                .aliases
                .insert(temp_id.to_string(), project_id.to_string());
        }
        debug!(temp_id = %temp_id, project_id = %project_id, "Job promoted");
    }

    /// Jobs that have not reached a terminal state
    pub fn active_count(&self) -> usize {
        self.lock()
            .jobs
            .values()
            .filter(|r| !r.state.is_finished())
            .count()
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        let inner = self.lock();
        let key = inner.aliases.get(job_id).map(String::as_str).unwrap_or(job_id);
        inner.jobs.get(key).cloned()
    }

    /// Drop finished jobs older than the retention window
    pub fn prune(&self) -> usize {
        let cutoff = match chrono::Duration::from_std(self.retention) {
            Ok(retention) => Utc::now() - retention,
            Err(_) => return 0,
        };
        let mut inner = self.lock();
        let before = inner.jobs.len();
        inner
            .jobs
            .retain(|_, r| !(r.state.is_finished() && r.updated_at < cutoff));
        let Inner { jobs, aliases } = &mut *inner;
        aliases.retain(|_, target| jobs.contains_key(target));
        before - jobs.len()
    }
}

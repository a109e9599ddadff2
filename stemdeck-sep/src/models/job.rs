//! In-memory job status

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Job lifecycle: Pending -> Running(index) -> Completed | Failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running { module_index: usize, module: String },
    Completed,
    Failed { message: String },
}

impl JobState {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed { .. })
    }
}

/// Tracked status of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub job_id: String,
    /// Permanent project id, once known
    pub project_id: Option<String>,
    pub plan: Vec<String>,
    #[serde(flatten)]
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job_id: &str, plan: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.to_string(),
            project_id: None,
            plan,
            state: JobState::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

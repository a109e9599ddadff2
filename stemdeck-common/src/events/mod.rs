//! Event types for StemDeck job progress
//!
//! Provides the job event definitions and the ProgressBus used to fan them out
//! to Server-Sent Events subscribers, keyed by job id.

mod bus;
mod job_types;

pub use bus::{BusConfig, JobSubscription, ProgressBus};
pub use job_types::{ModelStatus, ModuleStatus};

use serde::{Deserialize, Serialize};

/// Events emitted while a job runs
///
/// Serialized as the SSE `data` payload; `event_type()` provides the SSE event name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// Remote source download progress (URL jobs only)
    Download {
        /// Percent complete, 0-100
        percent: u8,
    },

    /// Module lifecycle and progress
    ///
    /// - `running`: message is the percent complete ("0" when the module starts)
    /// - `resolving_dependency`: message is the description of the dependency
    ///   that must finish before `module` can start
    ModuleProcessing {
        module: String,
        status: ModuleStatus,
        message: String,
    },

    /// Model checkpoint being fetched by the inference engine
    ModelDownloading {
        model: String,
        status: ModelStatus,
        /// Percent complete while downloading
        #[serde(default, skip_serializing_if = "Option::is_none")]
        percent: Option<u8>,
    },

    /// Module finished and its outputs were committed to the project
    ModuleCompleted {
        module: String,
        /// Stem filenames added by this module
        stems: Vec<String>,
    },

    /// The job's channel moved to a permanent project id; subscribers
    /// must re-subscribe under `new_id`
    IdChanged { new_id: String },

    /// Failure that ended the job
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        module: Option<String>,
        message: String,
    },

    /// Every module in the plan completed
    Done {
        project_id: String,
        executed_modules: Vec<String>,
        stems: Vec<String>,
    },
}

impl JobEvent {
    /// Get event type as string (SSE event name)
    pub fn event_type(&self) -> &'static str {
        match self {
            JobEvent::Download { .. } => "download",
            JobEvent::ModuleProcessing { .. } => "module_processing",
            JobEvent::ModelDownloading { .. } => "model_downloading",
            JobEvent::ModuleCompleted { .. } => "module_completed",
            JobEvent::IdChanged { .. } => "id_changed",
            JobEvent::Error { .. } => "error",
            JobEvent::Done { .. } => "done",
        }
    }

    /// Terminal events end a channel's stream and are never dropped
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::IdChanged { .. } | JobEvent::Error { .. } | JobEvent::Done { .. }
        )
    }

    /// Shorthand for a `module_processing` running event
    pub fn running(module: impl Into<String>, percent: u8) -> Self {
        JobEvent::ModuleProcessing {
            module: module.into(),
            status: ModuleStatus::Running,
            message: percent.to_string(),
        }
    }
}

//! Data models for stemdeck-sep
//!
//! - Module: registry entry for one separation step
//! - Project: durable per-project state (metadata.json)
//! - Job: in-memory status of one pipeline run

pub mod job;
pub mod module;
pub mod project;

pub use job::{JobRecord, JobState};
pub use module::{Module, StemOutput};
pub use project::{ModuleResult, Project, ProjectSummary};

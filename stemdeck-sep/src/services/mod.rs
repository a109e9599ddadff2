//! Business logic services for stemdeck-sep

pub mod engine;
pub mod fetcher;
pub mod job_tracker;
pub mod mixer;
pub mod module_registry;
pub mod pipeline;
pub mod project_store;
pub mod resolver;
pub mod waveform;

pub use engine::{CommandEngine, SeparationEngine};
pub use fetcher::{HttpFetcher, SourceFetcher};
pub use job_tracker::JobTracker;
pub use module_registry::ModuleRegistry;
pub use pipeline::{Pipeline, PipelineError, RunHandle, RunSummary, Source};
pub use project_store::{ProjectStore, StoreError};

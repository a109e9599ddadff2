//! Test Helper Utilities
//!
//! Shared utilities for testing stemdeck-sep

#![allow(dead_code)]

pub mod audio_generator;
pub mod fakes;

pub use audio_generator::{
    generate_constant_wav, generate_test_wav, read_wav_samples, AudioConfig,
};
pub use fakes::{FakeFetcher, ScriptedEngine};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stemdeck_common::config::{PipelineConfig, RootFolderInitializer};
use stemdeck_common::events::{BusConfig, JobEvent, JobSubscription, ProgressBus};
use stemdeck_sep::services::{ModuleRegistry, Pipeline, ProjectStore};
use stemdeck_sep::AppState;
use tempfile::TempDir;

/// A complete service wired to fakes inside a temporary root folder
pub struct TestEnv {
    pub root: TempDir,
    pub registry: Arc<ModuleRegistry>,
    pub store: Arc<ProjectStore>,
    pub bus: ProgressBus,
    pub pipeline: Arc<Pipeline>,
    pub engine: Arc<ScriptedEngine>,
    pub uploads_dir: PathBuf,
}

impl TestEnv {
    pub async fn new(engine: ScriptedEngine) -> Self {
        Self::with_fetcher(engine, FakeFetcher { fail: false }).await
    }

    pub async fn with_fetcher(engine: ScriptedEngine, fetcher: FakeFetcher) -> Self {
        let root = TempDir::new().unwrap();
        let initializer = RootFolderInitializer::new(root.path().to_path_buf());
        initializer.ensure_directory_exists().unwrap();

        let registry = Arc::new(ModuleRegistry::builtin().unwrap());
        let store = Arc::new(ProjectStore::open(initializer.library_path()).await.unwrap());
        let bus = ProgressBus::new(BusConfig {
            close_grace: Duration::from_secs(2),
            ..BusConfig::default()
        });
        let engine = Arc::new(engine);
        let uploads_dir = initializer.uploads_path();

        let pipeline = Arc::new(Pipeline::new(
            registry.clone(),
            store.clone(),
            bus.clone(),
            engine.clone(),
            Arc::new(fetcher),
            uploads_dir.clone(),
            &PipelineConfig::default(),
        ));

        Self {
            root,
            registry,
            store,
            bus,
            pipeline,
            engine,
            uploads_dir,
        }
    }

    /// Place a generated WAV in uploads/, as the upload handler would
    pub fn staged_upload(&self, name: &str) -> PathBuf {
        let path = self.uploads_dir.join(format!("{}_{}", uuid::Uuid::new_v4(), name));
        generate_test_wav(&path, &AudioConfig::default()).unwrap()
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(
            self.registry.clone(),
            self.store.clone(),
            self.bus.clone(),
            self.pipeline.clone(),
            self.uploads_dir.clone(),
        )
    }
}

/// Drain a subscription until it ends
pub async fn collect_events(mut subscription: JobSubscription) -> Vec<JobEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(10), subscription.next()).await {
            Ok(Some(event)) => events.push(event),
            Ok(None) => return events,
            Err(_) => panic!("subscription stalled after {:?}", events),
        }
    }
}

pub fn strs(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

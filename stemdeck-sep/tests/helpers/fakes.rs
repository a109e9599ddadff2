//! Scripted stand-ins for the inference engine and the URL fetcher

use super::audio_generator::{generate_test_wav, AudioConfig};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use stemdeck_sep::services::engine::{
    EngineError, EngineOutput, EngineProgress, EngineRequest, ProgressSink, SeparationEngine,
};
use stemdeck_sep::services::fetcher::{FetchError, FetchedSource, SourceFetcher};

/// Engine that writes short WAV stems for every requested output
///
/// Reports a model download on the first call for each model, then
/// processing at 50% and 100%.
pub struct ScriptedEngine {
    fail_on: Option<String>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    loaded_models: Mutex<BTreeSet<String>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            fail_on: None,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            loaded_models: Mutex::new(BTreeSet::new()),
        }
    }

    /// Fail whenever `module_id` runs
    pub fn failing_on(mut self, module_id: &str) -> Self {
        self.fail_on = Some(module_id.to_string());
        self
    }

    /// Sleep before producing outputs
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Module ids in the order they were run
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SeparationEngine for ScriptedEngine {
    async fn run_module(
        &self,
        request: EngineRequest,
        progress: ProgressSink,
    ) -> Result<EngineOutput, EngineError> {
        self.calls.lock().unwrap().push(request.module_id.clone());

        if !request.input.is_file() {
            return Err(EngineError(format!("missing input {}", request.input.display())));
        }

        let first_use = self.loaded_models.lock().unwrap().insert(request.model.clone());
        if first_use {
            progress.report(EngineProgress::ModelDownloading { percent: 100 });
            progress.report(EngineProgress::ModelReady);
        }

        progress.report(EngineProgress::Processing { percent: 50 });
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.fail_on.as_deref() == Some(request.module_id.as_str()) {
            return Err(EngineError(format!("scripted failure in {}", request.module_id)));
        }

        let mut output = EngineOutput::default();
        for (key, base) in &request.output_names {
            let filename = format!("{}.wav", base);
            generate_test_wav(&request.output_dir.join(&filename), &AudioConfig::default())
                .map_err(|e| EngineError(e.to_string()))?;
            output.files.insert(key.clone(), filename);
        }
        progress.report(EngineProgress::Processing { percent: 100 });
        Ok(output)
    }
}

/// Fetcher that "downloads" by generating a WAV
pub struct FakeFetcher {
    pub fail: bool,
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(
        &self,
        url: &str,
        dest_dir: &Path,
        progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<FetchedSource, FetchError> {
        progress(0);
        if self.fail {
            return Err(FetchError::Download(format!("404 Not Found: {}", url)));
        }
        let path = dest_dir.join(format!("{}_remote.wav", uuid::Uuid::new_v4()));
        generate_test_wav(&path, &AudioConfig::default())
            .map_err(|e| FetchError::Download(e.to_string()))?;
        progress(50);
        progress(100);
        Ok(FetchedSource {
            path,
            display_name: "Remote Song.wav".to_string(),
        })
    }
}

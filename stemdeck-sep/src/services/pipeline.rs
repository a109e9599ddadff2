//! Execution pipeline
//!
//! Runs a resolved plan module by module against one project:
//! - every run holds one permit of a shared semaphore from its first module
//!   until its last module finishes or fails
//! - engine progress flows through a bounded channel into the ProgressBus, so
//!   a slow subscriber never stalls inference
//! - each module's result is committed to the project store on its own, under
//!   the project lock, so a failure keeps everything completed before it
//!
//! New uploads and URL jobs start under a client-chosen temporary job id. Once
//! the project id is minted the temporary channel receives `id_changed` and
//! every later event goes to the project id's channel.
//!
//! Several runs may share one job id (the same project processed twice at
//! once). They share its channel and job record; only the last run to finish
//! publishes the terminal event and closes the channel.

use crate::models::{Module, ModuleResult, Project};
use crate::services::engine::{
    EngineError, EngineOutput, EngineProgress, EngineRequest, ProgressSink, SeparationEngine,
};
use crate::services::fetcher::{validate_url, FetchError, SourceFetcher};
use crate::services::job_tracker::JobTracker;
use crate::services::module_registry::ModuleRegistry;
use crate::services::project_store::{ProjectStore, StoreError};
use crate::services::resolver::{resolve_plan, ResolveError};
use crate::services::waveform;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use stemdeck_common::config::PipelineConfig;
use stemdeck_common::events::{JobEvent, ModelStatus, ModuleStatus, ProgressBus};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pipeline errors
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Module {module} failed: {source}")]
    Engine {
        module: String,
        #[source]
        source: EngineError,
    },

    #[error("Module {module} cannot start: {message}")]
    MissingInput { module: String, message: String },

    #[error("Pipeline is shutting down")]
    Closed,

    #[error("Run task failed: {0}")]
    Task(String),
}

/// Where a new project's audio comes from
#[derive(Debug, Clone)]
pub enum Source {
    /// File already saved under the uploads folder
    Upload { path: PathBuf, display_name: String },
    /// Remote URL, downloaded by the configured fetcher
    Url(String),
}

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub job_id: String,
    pub plan: Vec<String>,
    pub project: Project,
}

/// A spawned run
///
/// Dropping the handle does not cancel the run.
pub struct RunHandle {
    pub job_id: String,
    pub plan: Vec<String>,
    task: JoinHandle<Result<RunSummary, PipelineError>>,
}

impl RunHandle {
    /// Wait for the run to finish
    pub async fn wait(self) -> Result<RunSummary, PipelineError> {
        self.task
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))?
    }
}

/// How one run ended
enum RunEnd {
    Completed(Project),
    Failed {
        module: Option<String>,
        message: String,
    },
}

/// Runs currently publishing on one job id
#[derive(Default)]
struct ActiveRuns {
    count: usize,
    /// First failure among them, reported once the last run ends
    failure: Option<(Option<String>, String)>,
}

/// Plan executor shared by all HTTP handlers
pub struct Pipeline {
    registry: Arc<ModuleRegistry>,
    store: Arc<ProjectStore>,
    bus: ProgressBus,
    engine: Arc<dyn SeparationEngine>,
    fetcher: Arc<dyn SourceFetcher>,
    jobs: Arc<JobTracker>,
    permits: Arc<Semaphore>,
    runs: Mutex<HashMap<String, ActiveRuns>>,
    uploads_dir: PathBuf,
    progress_buffer: usize,
}

impl Pipeline {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        store: Arc<ProjectStore>,
        bus: ProgressBus,
        engine: Arc<dyn SeparationEngine>,
        fetcher: Arc<dyn SourceFetcher>,
        uploads_dir: PathBuf,
        config: &PipelineConfig,
    ) -> Self {
        info!(
            max_concurrent_jobs = config.max_concurrent_jobs,
            engine_progress_buffer = config.engine_progress_buffer,
            "Execution pipeline initialized"
        );
        Self {
            registry,
            store,
            bus,
            engine,
            fetcher,
            jobs: Arc::new(JobTracker::default()),
            permits: Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1))),
            runs: Mutex::new(HashMap::new()),
            uploads_dir,
            progress_buffer: config.engine_progress_buffer.max(1),
        }
    }

    pub fn jobs(&self) -> &JobTracker {
        &self.jobs
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Run more modules on an existing project; the job id is the project id
    pub async fn submit_project(
        self: &Arc<Self>,
        project_id: &str,
        requested: &[String],
    ) -> Result<RunHandle, PipelineError> {
        let project = self.store.get(project_id).await?;
        let plan = resolve_plan(&self.registry, requested, &project.executed_set())?;

        self.begin_run(project_id, &plan);
        self.jobs.promote(project_id, project_id);
        info!(job_id = %project_id, plan = ?plan, "Run submitted for existing project");

        let this = Arc::clone(self);
        let job_id = project_id.to_string();
        let run_plan = plan.clone();
        let task = tokio::spawn(async move { this.execute(&job_id, project, run_plan).await });

        Ok(RunHandle {
            job_id: project_id.to_string(),
            plan,
            task,
        })
    }

    /// Create a project from an upload or URL and run modules on it
    ///
    /// Validation happens before anything is spawned: an invalid request
    /// leaves no job, channel or project behind.
    pub fn submit_new(
        self: &Arc<Self>,
        job_id: Option<String>,
        source: Source,
        requested: &[String],
    ) -> Result<RunHandle, PipelineError> {
        let plan = resolve_plan(&self.registry, requested, &BTreeSet::new())?;
        if let Source::Url(url) = &source {
            validate_url(url)?;
        }

        let job_id = job_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.begin_run(&job_id, &plan);
        info!(job_id = %job_id, plan = ?plan, "Run submitted for new project");

        let this = Arc::clone(self);
        let run_id = job_id.clone();
        let run_plan = plan.clone();
        let task = tokio::spawn(async move { this.run_new(&run_id, source, run_plan).await });

        Ok(RunHandle { job_id, plan, task })
    }

    async fn run_new(
        &self,
        temp_id: &str,
        source: Source,
        plan: Vec<String>,
    ) -> Result<RunSummary, PipelineError> {
        let (path, display_name) = match source {
            Source::Upload { path, display_name } => (path, display_name),
            Source::Url(url) => {
                let bus = self.bus.clone();
                let channel = temp_id.to_string();
                let progress = move |percent: u8| {
                    bus.publish(&channel, JobEvent::Download { percent });
                };
                match self.fetcher.fetch(&url, &self.uploads_dir, &progress).await {
                    Ok(fetched) => (fetched.path, fetched.display_name),
                    Err(e) => {
                        self.fail_job(temp_id, None, &e.to_string());
                        return Err(e.into());
                    }
                }
            }
        };

        let project = match self.store.create(&display_name, &path).await {
            Ok(project) => project,
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&path).await {
                    debug!("Source file already gone: {}", cleanup);
                }
                self.fail_job(temp_id, None, &e.to_string());
                return Err(e.into());
            }
        };

        self.promote(temp_id, &project.id);
        let project_id = project.id.clone();
        let mut summary = self.execute(&project_id, project, plan).await?;
        summary.job_id = temp_id.to_string();
        Ok(summary)
    }

    fn lock_runs(&self) -> MutexGuard<'_, HashMap<String, ActiveRuns>> {
        self.runs.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Attach a run to `job_id`, opening its channel and job record if no
    /// other run is using them
    fn begin_run(&self, job_id: &str, plan: &[String]) {
        let mut runs = self.lock_runs();
        let active = runs.entry(job_id.to_string()).or_default();
        active.count += 1;
        if active.count > 1 {
            self.jobs.extend_plan(job_id, plan);
            debug!(job_id = %job_id, runs = active.count, "Run joined active job");
            return;
        }
        self.jobs.register(job_id, plan.to_vec());
        self.bus.open_channel(job_id);
    }

    /// Detach a run from `job_id`; the last one out publishes the terminal
    /// event and closes the channel
    fn end_run(&self, job_id: &str, end: RunEnd) {
        let mut runs = self.lock_runs();
        let Some(active) = runs.get_mut(job_id) else {
            warn!(job_id = %job_id, "Run ended on an untracked job");
            return;
        };
        active.count = active.count.saturating_sub(1);
        if let RunEnd::Failed { module, message } = &end {
            if active.failure.is_none() {
                active.failure = Some((module.clone(), message.clone()));
            }
        }
        if active.count > 0 {
            debug!(job_id = %job_id, runs = active.count, "Run ended, job still active");
            return;
        }

        // Lock held until the channel closes so a joining run opens a fresh one
        let failure = runs.remove(job_id).and_then(|a| a.failure);
        let terminal = match (failure, end) {
            (Some((module, message)), _) => {
                self.jobs.fail(job_id, &message);
                JobEvent::Error { module, message }
            }
            (None, RunEnd::Completed(project)) => {
                self.jobs.complete(job_id);
                JobEvent::Done {
                    project_id: project.id.clone(),
                    executed_modules: project.executed_modules.clone(),
                    stems: project.stem_list(),
                }
            }
            (None, RunEnd::Failed { module, message }) => {
                self.jobs.fail(job_id, &message);
                JobEvent::Error { module, message }
            }
        };
        self.bus.publish(job_id, terminal);
        self.bus.close_channel(job_id);
    }

    /// Hand the job over from its temporary id to the project id
    fn promote(&self, temp_id: &str, project_id: &str) {
        if temp_id == project_id {
            return;
        }
        {
            let mut runs = self.lock_runs();
            let active = runs.entry(project_id.to_string()).or_default();
            active.count += 1;
            if active.count == 1 {
                self.bus.open_channel(project_id);
            }
            self.jobs.promote(temp_id, project_id);

            let temp_done = match runs.get_mut(temp_id) {
                Some(temp) => {
                    temp.count = temp.count.saturating_sub(1);
                    temp.count == 0
                }
                None => true,
            };
            if temp_done {
                runs.remove(temp_id);
                self.bus.publish(
                    temp_id,
                    JobEvent::IdChanged {
                        new_id: project_id.to_string(),
                    },
                );
                self.bus.close_channel(temp_id);
            }
        }
        info!(temp_id = %temp_id, project_id = %project_id, "Job id promoted");
    }

    fn fail_job(&self, channel: &str, module: Option<&str>, message: &str) {
        error!(job_id = %channel, module = ?module, "Job failed: {}", message);
        self.end_run(
            channel,
            RunEnd::Failed {
                module: module.map(str::to_string),
                message: message.to_string(),
            },
        );
    }

    /// Run `plan` on `project`, publishing on `channel`
    async fn execute(
        &self,
        channel: &str,
        project: Project,
        plan: Vec<String>,
    ) -> Result<RunSummary, PipelineError> {
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.fail_job(channel, None, "Pipeline is shutting down");
                return Err(PipelineError::Closed);
            }
        };

        let project_id = project.id.clone();
        let dir = match self.store.project_dir(&project_id) {
            Ok(dir) => dir,
            Err(e) => {
                self.fail_job(channel, None, &e.to_string());
                return Err(e.into());
            }
        };
        let mut project = project;

        for (index, module_id) in plan.iter().enumerate() {
            let Some(module) = self.registry.get(module_id) else {
                let message = format!("Unknown module: {}", module_id);
                self.fail_job(channel, Some(module_id), &message);
                return Err(ResolveError::UnknownModules(vec![module_id.clone()]).into());
            };
            self.jobs.set_running(channel, index, module_id);

            for dependent in plan[index + 1..]
                .iter()
                .filter_map(|id| self.registry.get(id))
                .filter(|m| m.depends_on.as_deref() == Some(module_id.as_str()))
            {
                self.bus.publish(
                    channel,
                    JobEvent::ModuleProcessing {
                        module: dependent.id.clone(),
                        status: ModuleStatus::ResolvingDependency,
                        message: module.description.clone(),
                    },
                );
            }

            // Another run may have committed since the plan was resolved
            project = match self.store.get(&project_id).await {
                Ok(current) => current,
                Err(e) => {
                    self.fail_job(channel, Some(module_id), &e.to_string());
                    return Err(e.into());
                }
            };
            if project.has_executed(module_id) {
                info!(job_id = %channel, module = %module_id, "Module already executed, skipping");
                self.bus.publish(
                    channel,
                    JobEvent::ModuleCompleted {
                        module: module_id.clone(),
                        stems: Vec::new(),
                    },
                );
                continue;
            }

            self.bus.publish(channel, JobEvent::running(module_id, 0));

            let input = match input_for(module, &project, &dir) {
                Ok(input) => input,
                Err(message) => {
                    self.fail_job(channel, Some(module_id), &message);
                    return Err(PipelineError::MissingInput {
                        module: module_id.clone(),
                        message,
                    });
                }
            };

            let output = match self.run_engine(channel, module, &input, &dir).await {
                Ok(output) => output,
                Err(e) => {
                    self.fail_job(channel, Some(module_id), &e.to_string());
                    return Err(PipelineError::Engine {
                        module: module_id.clone(),
                        source: e,
                    });
                }
            };

            let result = ModuleResult {
                model: module.model.clone(),
                input_used: input,
                outputs: output.files,
            };
            let commit = match self.store.commit_module(&project_id, module_id, result).await {
                Ok(commit) => commit,
                Err(e) => {
                    self.fail_job(channel, Some(module_id), &e.to_string());
                    return Err(e.into());
                }
            };

            if !commit.new_stems.is_empty() {
                waveform::precompute_for_stems(dir.clone(), commit.new_stems.clone()).await;
            }
            self.bus.publish(
                channel,
                JobEvent::ModuleCompleted {
                    module: module_id.clone(),
                    stems: commit.new_stems,
                },
            );
            project = commit.project;
        }

        // Pick up commits made by runs sharing this project
        if let Ok(current) = self.store.get(&project_id).await {
            project = current;
        }
        self.end_run(channel, RunEnd::Completed(project.clone()));
        info!(job_id = %channel, project_id = %project_id, "Run completed");

        Ok(RunSummary {
            job_id: channel.to_string(),
            plan,
            project,
        })
    }

    /// Invoke the engine, relaying its progress onto the bus
    ///
    /// The relay is drained before returning so every progress event precedes
    /// the module's completion or error event.
    async fn run_engine(
        &self,
        channel: &str,
        module: &Module,
        input: &str,
        dir: &Path,
    ) -> Result<EngineOutput, EngineError> {
        let (tx, mut rx) = mpsc::channel(self.progress_buffer);

        let bus = self.bus.clone();
        let relay_channel = channel.to_string();
        let module_id = module.id.clone();
        let model = module.model.clone();
        let relay = tokio::spawn(async move {
            while let Some(progress) = rx.recv().await {
                let event = match progress {
                    EngineProgress::Processing { percent } => JobEvent::running(&module_id, percent),
                    EngineProgress::ModelDownloading { percent } => JobEvent::ModelDownloading {
                        model: model.clone(),
                        status: ModelStatus::Downloading,
                        percent: Some(percent),
                    },
                    EngineProgress::ModelReady => JobEvent::ModelDownloading {
                        model: model.clone(),
                        status: ModelStatus::Complete,
                        percent: None,
                    },
                };
                bus.publish(&relay_channel, event);
            }
        });

        let request = EngineRequest {
            module_id: module.id.clone(),
            model: module.model.clone(),
            input: dir.join(input),
            output_dir: dir.to_path_buf(),
            output_names: module
                .outputs
                .iter()
                .map(|o| (o.key.clone(), o.base.clone()))
                .collect(),
        };

        // Own task, so an engine panic surfaces as a module error
        let engine = Arc::clone(&self.engine);
        let sink = ProgressSink::new(tx);
        let result = match tokio::spawn(async move { engine.run_module(request, sink).await }).await {
            Ok(result) => result,
            Err(e) => Err(EngineError(format!("Engine task failed: {}", e))),
        };

        if let Err(e) = relay.await {
            warn!(job_id = %channel, "Progress relay ended abnormally: {}", e);
        }
        result
    }
}

/// Input file for a module: the parent's `input_stem` output, or the original
fn input_for(module: &Module, project: &Project, dir: &Path) -> Result<String, String> {
    let filename = match (&module.depends_on, &module.input_stem) {
        (Some(parent), Some(stem)) => project
            .output_of(parent, stem)
            .map(str::to_string)
            .ok_or_else(|| format!("{} has no {} output", parent, stem))?,
        _ => project
            .original_file
            .clone()
            .ok_or_else(|| "Project has no original file".to_string())?,
    };

    if !dir.join(&filename).is_file() {
        return Err(format!("Input file missing: {}", filename));
    }
    Ok(filename)
}

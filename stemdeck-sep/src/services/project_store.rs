//! Project store
//!
//! One directory per project under the library folder, holding the original
//! file, every stem, `metadata.json` and `waveforms/`. The metadata file is the
//! durable truth; the in-memory index is a cache rebuilt by a full scan at start
//! and updated only by this store's own write paths.
//!
//! Mutations of one project are serialized by a per-project async mutex held
//! only for the commit step. Reads go to the index and never wait on it.

use crate::models::{ModuleResult, Project};
use crate::utils::{ascii_prefix, sanitize_filename, split_extension};
use chrono::{DateTime, Local, Utc};
use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{OwnedMutexGuard, RwLock};
use tracing::{debug, info, warn};

/// Metadata file name inside each project directory
pub const METADATA_FILE: &str = "metadata.json";

/// Extensions treated as stems
pub const STEM_EXTENSIONS: [&str; 3] = ["wav", "flac", "mp3"];

/// Project store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Project not found: {0}")]
    NotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of committing a module to a project
#[derive(Debug, Clone)]
pub struct Commit {
    pub project: Project,
    /// The module's output files that were not stems before this commit
    /// (empty if the module was already committed)
    pub new_stems: Vec<String>,
}

/// Durable project state with an in-memory index
pub struct ProjectStore {
    library: PathBuf,
    index: RwLock<HashMap<String, Project>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProjectStore {
    /// Open the library folder (created if missing) and scan existing projects
    pub async fn open(library: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let library = library.into();
        tokio::fs::create_dir_all(&library).await?;

        let store = Self {
            library,
            index: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        };
        store.scan().await?;
        Ok(store)
    }

    pub fn library_path(&self) -> &Path {
        &self.library
    }

    /// Rebuild the index from disk
    pub async fn scan(&self) -> Result<usize, StoreError> {
        let mut projects = HashMap::new();
        let mut entries = tokio::fs::read_dir(&self.library).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %entry.path().display(), "Skipping non UTF-8 project directory");
                continue;
            };
            let project = load_project_dir(&entry.path(), &id).await;
            projects.insert(id, project);
        }

        let count = projects.len();
        *self.index.write().await = projects;
        info!(library = %self.library.display(), projects = count, "Project library scanned");
        Ok(count)
    }

    /// All projects, newest id first
    pub async fn list(&self) -> Vec<Project> {
        let index = self.index.read().await;
        let mut projects: Vec<Project> = index.values().cloned().collect();
        projects.sort_by(|a, b| b.id.cmp(&a.id));
        projects
    }

    pub async fn get(&self, id: &str) -> Result<Project, StoreError> {
        self.index
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.index.read().await.contains_key(id)
    }

    /// Directory of a project (id validated, existence not checked)
    pub fn project_dir(&self, id: &str) -> Result<PathBuf, StoreError> {
        validate_component(id)?;
        Ok(self.library.join(id))
    }

    /// Create a project from a source audio file
    ///
    /// Mints `<YYYYMMDDHHMMSS>_<prefix>` from the display name (suffixed `_2`,
    /// `_3`, ... on collision), moves `source` into the new directory under its
    /// sanitized name, and persists the metadata.
    pub async fn create(&self, display_name: &str, source: &Path) -> Result<Project, StoreError> {
        let filename = sanitize_filename(display_name);
        let name = split_extension(display_name).0.to_string();

        let (id, dir) = self.reserve_dir(&mint_id(Local::now(), &name)).await?;

        let result = async {
            move_file(source, &dir.join(&filename)).await?;
            let mut project = Project::new(&id, &name, Some(filename.clone()));
            write_metadata(&dir, &project).await?;
            project.stems = list_stems(&dir, project.original_file.as_deref()).await?;
            Ok::<_, StoreError>(project)
        }
        .await;

        match result {
            Ok(project) => {
                self.index.write().await.insert(id.clone(), project.clone());
                info!(project_id = %id, original = %filename, "Project created");
                Ok(project)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&dir).await {
                    warn!(project_id = %id, "Failed to remove incomplete project: {}", cleanup);
                }
                Err(e)
            }
        }
    }

    async fn reserve_dir(&self, base_id: &str) -> Result<(String, PathBuf), StoreError> {
        let mut attempt = 1u32;
        loop {
            let id = if attempt == 1 {
                base_id.to_string()
            } else {
                format!("{}_{}", base_id, attempt)
            };
            let dir = self.library.join(&id);
            match tokio::fs::create_dir(&dir).await {
                Ok(()) => return Ok((id, dir)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(project_id = %id, "Project id taken, trying next suffix");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Exclusive mutation lock for one project
    pub async fn lock_project(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Record a completed module and its outputs
    ///
    /// Idempotent: committing a module that is already executed changes nothing
    /// and reports no new stems. Disk is written before the index is updated.
    pub async fn commit_module(
        &self,
        id: &str,
        module_id: &str,
        result: ModuleResult,
    ) -> Result<Commit, StoreError> {
        let _guard = self.lock_project(id).await;
        let mut project = self.get(id).await?;
        if project.has_executed(module_id) {
            debug!(project_id = %id, module = %module_id, "Module already committed");
            return Ok(Commit {
                project,
                new_stems: Vec::new(),
            });
        }

        let dir = self.project_dir(id)?;
        let before = project.stems.clone();
        let outputs: BTreeSet<String> = result.outputs.values().cloned().collect();
        project.executed_modules.push(module_id.to_string());
        project.results.insert(module_id.to_string(), result);
        write_metadata(&dir, &project).await?;
        project.stems = list_stems(&dir, project.original_file.as_deref()).await?;

        // Only this module's outputs count as new, not whatever else landed in the folder
        let new_stems: Vec<String> = outputs
            .into_iter()
            .filter(|name| project.stems.contains(name) && !before.contains(name))
            .collect();
        self.index.write().await.insert(id.to_string(), project.clone());

        info!(
            project_id = %id,
            module = %module_id,
            new_stems = ?new_stems,
            "Module committed"
        );
        Ok(Commit { project, new_stems })
    }

    /// Register a stem written directly into the project directory
    pub async fn add_stem(&self, id: &str, filename: &str) -> Result<Project, StoreError> {
        let _guard = self.lock_project(id).await;
        let mut project = self.get(id).await?;
        let dir = self.project_dir(id)?;
        validate_component(filename)?;
        if !tokio::fs::try_exists(dir.join(filename)).await? {
            return Err(StoreError::FileNotFound(filename.to_string()));
        }

        write_metadata(&dir, &project).await?;
        project.stems = list_stems(&dir, project.original_file.as_deref()).await?;
        self.index.write().await.insert(id.to_string(), project.clone());
        debug!(project_id = %id, stem = %filename, "Stem added");
        Ok(project)
    }

    /// Delete a project directory and forget it
    pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let dir = self.project_dir(id)?;
        let _guard = self.lock_project(id).await;

        if !tokio::fs::try_exists(&dir).await? {
            self.index.write().await.remove(id);
            return Err(StoreError::NotFound(id.to_string()));
        }

        let library = tokio::fs::canonicalize(&self.library).await?;
        let target = tokio::fs::canonicalize(&dir).await?;
        if target == library || !target.starts_with(&library) {
            warn!(project_id = %id, target = %target.display(), "Refusing to delete outside library");
            return Err(StoreError::Forbidden(id.to_string()));
        }

        tokio::fs::remove_dir_all(&target).await?;
        self.index.write().await.remove(id);
        self.locks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id);
        info!(project_id = %id, "Project deleted");
        Ok(())
    }

    /// Resolve a file inside a project directory
    ///
    /// Rejects names that could escape the directory, including through links.
    pub async fn file_path(&self, id: &str, filename: &str) -> Result<PathBuf, StoreError> {
        let dir = self.project_dir(id)?;
        validate_component(filename).map_err(|_| StoreError::Forbidden(filename.to_string()))?;

        let path = dir.join(filename);
        if !tokio::fs::try_exists(&path).await? {
            return Err(StoreError::FileNotFound(filename.to_string()));
        }

        let root = tokio::fs::canonicalize(&dir).await?;
        let resolved = tokio::fs::canonicalize(&path).await?;
        if !resolved.starts_with(&root) {
            return Err(StoreError::Forbidden(filename.to_string()));
        }
        Ok(resolved)
    }
}

/// `<YYYYMMDDHHMMSS>_<first two ASCII alphanumerics>`
pub fn mint_id(now: DateTime<Local>, name: &str) -> String {
    format!("{}_{}", now.format("%Y%m%d%H%M%S"), ascii_prefix(name, 2))
}

/// Accept a single plain path component only
fn validate_component(name: &str) -> Result<(), StoreError> {
    let mut components = Path::new(name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if name.is_empty() || !single || name.contains(['/', '\\']) {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn is_stem_file(name: &str) -> bool {
    let (_, ext) = split_extension(name);
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    STEM_EXTENSIONS.contains(&ext.as_str())
}

/// Audio files in `dir` other than the original
async fn list_stems(dir: &Path, original: Option<&str>) -> Result<BTreeSet<String>, StoreError> {
    let mut stems = BTreeSet::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if Some(name.as_str()) != original && is_stem_file(&name) {
            stems.insert(name);
        }
    }
    Ok(stems)
}

async fn write_metadata(dir: &Path, project: &Project) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(project)
        .map_err(|e| StoreError::Metadata(e.to_string()))?;
    let path = dir.join(METADATA_FILE);
    let tmp = dir.join(format!("{}.tmp", METADATA_FILE));
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
}

/// Load one project directory, falling back to folder-derived defaults
async fn load_project_dir(dir: &Path, id: &str) -> Project {
    let metadata = match tokio::fs::read(dir.join(METADATA_FILE)).await {
        Ok(bytes) => match serde_json::from_slice::<Project>(&bytes) {
            Ok(project) => Some(project),
            Err(e) => {
                warn!(project_id = %id, "Unreadable metadata, using folder defaults: {}", e);
                None
            }
        },
        Err(e) => {
            warn!(project_id = %id, "No metadata, using folder defaults: {}", e);
            None
        }
    };

    let mut project = match metadata {
        Some(mut project) => {
            // The directory name is authoritative
            project.id = id.to_string();
            project
        }
        None => {
            let mut project = Project::new(id, id, None);
            if let Ok(meta) = tokio::fs::metadata(dir).await {
                if let Ok(modified) = meta.modified() {
                    project.date = DateTime::<Utc>::from(modified);
                }
            }
            project
        }
    };

    match list_stems(dir, project.original_file.as_deref()).await {
        Ok(stems) => project.stems = stems,
        Err(e) => warn!(project_id = %id, "Failed to list stems: {}", e),
    }
    project
}

/// Rename, falling back to copy + remove across filesystems
async fn move_file(from: &Path, to: &Path) -> Result<(), StoreError> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await?;
    Ok(())
}

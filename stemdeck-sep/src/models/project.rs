//! Project state persisted as `metadata.json`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What one module run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleResult {
    pub model: String,
    /// Filename (within the project directory) the module consumed
    pub input_used: String,
    /// Engine stem key -> produced filename
    pub outputs: BTreeMap<String, String>,
}

/// Durable project state
///
/// `executed_modules` keeps completion order and only grows. `stems` is not
/// stored; the project store recomputes it from the directory contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub original_file: Option<String>,
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub executed_modules: Vec<String>,
    #[serde(default)]
    pub results: BTreeMap<String, ModuleResult>,
    #[serde(skip)]
    pub stems: BTreeSet<String>,
}

impl Project {
    pub fn new(id: &str, name: &str, original_file: Option<String>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            original_file,
            date: Utc::now(),
            executed_modules: Vec::new(),
            results: BTreeMap::new(),
            stems: BTreeSet::new(),
        }
    }

    pub fn has_executed(&self, module_id: &str) -> bool {
        self.executed_modules.iter().any(|m| m == module_id)
    }

    pub fn executed_set(&self) -> BTreeSet<String> {
        self.executed_modules.iter().cloned().collect()
    }

    /// Filename a completed module wrote for `stem_key`
    pub fn output_of(&self, module_id: &str, stem_key: &str) -> Option<&str> {
        self.results
            .get(module_id)
            .and_then(|r| r.outputs.get(stem_key))
            .map(String::as_str)
    }

    pub fn stem_list(&self) -> Vec<String> {
        self.stems.iter().cloned().collect()
    }

    pub fn summary(&self) -> ProjectSummary {
        ProjectSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            original_file: self.original_file.clone(),
            date: self.date,
            executed_modules: self.executed_modules.clone(),
            stems: self.stem_list(),
        }
    }
}

/// Project as listed by the API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    pub original_file: Option<String>,
    pub date: DateTime<Utc>,
    pub executed_modules: Vec<String>,
    pub stems: Vec<String>,
}

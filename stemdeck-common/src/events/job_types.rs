//! Supporting types for job events

use serde::{Deserialize, Serialize};

/// Status carried by a `module_processing` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    /// Module is executing; message is the percent complete
    Running,
    /// Module is waiting on a dependency running earlier in the same plan;
    /// message is the dependency's description
    ResolvingDependency,
}

/// Status carried by a `model_downloading` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Downloading,
    Complete,
}

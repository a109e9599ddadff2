//! Module registry
//!
//! Static catalog of separation modules and their dependency edges. Each module
//! has at most one parent, so the dependency structure is a forest of chains.

use crate::models::Module;
use std::collections::HashMap;
use thiserror::Error;

/// Registry construction errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Duplicate module id: {0}")]
    DuplicateId(String),

    #[error("Module {module} depends on unknown module {depends_on}")]
    UnknownDependency { module: String, depends_on: String },

    #[error("Module {0} has a dependency but no input stem")]
    MissingInputStem(String),

    #[error("Module {module} consumes stem {stem}, which {parent} does not produce")]
    InputStemNotProduced {
        module: String,
        stem: String,
        parent: String,
    },

    #[error("Dependency cycle through module {0}")]
    Cycle(String),
}

/// Read-only module catalog
#[derive(Debug, Clone)]
pub struct ModuleRegistry {
    modules: Vec<Module>,
    index: HashMap<String, usize>,
}

impl ModuleRegistry {
    /// Build a registry, validating ids and dependency edges
    pub fn new(modules: Vec<Module>) -> Result<Self, RegistryError> {
        let mut index = HashMap::with_capacity(modules.len());
        for (position, module) in modules.iter().enumerate() {
            if index.insert(module.id.clone(), position).is_some() {
                return Err(RegistryError::DuplicateId(module.id.clone()));
            }
        }

        let registry = Self { modules, index };
        registry.validate()?;
        Ok(registry)
    }

    /// The built-in separation modules
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::new(vec![
            Module::new(
                "vocal_instrumental",
                "Separates vocals from instrumentals",
                "Vocal Processing",
                "model_bs_roformer_ep_368_sdr_12.9628.ckpt",
            )
            .output("Vocals", "base_vocals")
            .output("Instrumental", "base_instrumental"),
            Module::new(
                "lead_backing",
                "Separates lead vocals from backing vocals",
                "Vocal Processing",
                "mel_band_roformer_karaoke_aufr33_viperx_sdr_10.1956.ckpt",
            )
            .depends_on("vocal_instrumental", "Vocals")
            .output("Vocals", "lead")
            .output("Instrumental", "backing"),
            Module::new(
                "male_female",
                "Separates male from female vocals (primary)",
                "Vocal Processing",
                "bs_roformer_male_female_by_aufr33_sdr_7.2889.ckpt",
            )
            .depends_on("vocal_instrumental", "Vocals")
            .output("Male", "male")
            .output("Female", "female"),
            Module::new(
                "male_female_secondary",
                "Separates male from female vocals (alternative)",
                "Vocal Processing",
                "model_chorus_bs_roformer_ep_267_sdr_24.1275.ckpt",
            )
            .depends_on("vocal_instrumental", "Vocals")
            .output("Male", "male_secondary")
            .output("Female", "female_secondary"),
            Module::new(
                "htdemucs_6s",
                "Separates audio instruments (drums, bass, guitar, piano, other)",
                "Instrument Separation",
                "htdemucs_6s.yaml",
            )
            .output("Drums", "htdemucs_6s_drums")
            .output("Bass", "htdemucs_6s_bass")
            .output("Other", "htdemucs_6s_other")
            .output("Guitar", "htdemucs_6s_guitar")
            .output("Piano", "htdemucs_6s_piano"),
        ])
    }

    fn validate(&self) -> Result<(), RegistryError> {
        for module in &self.modules {
            let Some(parent_id) = &module.depends_on else {
                continue;
            };
            let parent = self
                .get(parent_id)
                .ok_or_else(|| RegistryError::UnknownDependency {
                    module: module.id.clone(),
                    depends_on: parent_id.clone(),
                })?;
            let stem = module
                .input_stem
                .as_ref()
                .ok_or_else(|| RegistryError::MissingInputStem(module.id.clone()))?;
            if !parent.produces(stem) {
                return Err(RegistryError::InputStemNotProduced {
                    module: module.id.clone(),
                    stem: stem.clone(),
                    parent: parent.id.clone(),
                });
            }
        }

        // A chain longer than the catalog must revisit a module
        for module in &self.modules {
            let mut steps = 0;
            let mut current = module.depends_on.as_deref();
            while let Some(id) = current {
                steps += 1;
                if steps > self.modules.len() {
                    return Err(RegistryError::Cycle(module.id.clone()));
                }
                current = self.get(id).and_then(|m| m.depends_on.as_deref());
            }
        }

        Ok(())
    }

    /// All modules in catalog order
    pub fn list(&self) -> &[Module] {
        &self.modules
    }

    pub fn get(&self, id: &str) -> Option<&Module> {
        self.index.get(id).map(|&i| &self.modules[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Direct dependents of `id`
    pub fn children(&self, id: &str) -> Vec<&Module> {
        self.modules
            .iter()
            .filter(|m| m.depends_on.as_deref() == Some(id))
            .collect()
    }

    /// Dependency chain of `id`, nearest parent first, ending at a root
    ///
    /// Empty for root modules and unknown ids.
    pub fn ancestors(&self, id: &str) -> Vec<&Module> {
        let mut chain = Vec::new();
        let mut current = self.get(id).and_then(|m| m.depends_on.as_deref());
        while let Some(parent_id) = current {
            match self.get(parent_id) {
                Some(parent) => {
                    chain.push(parent);
                    current = parent.depends_on.as_deref();
                }
                None => break,
            }
        }
        chain
    }
}

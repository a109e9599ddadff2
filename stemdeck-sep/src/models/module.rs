//! Separation module definition

use serde::Serialize;

/// One named output of a module: the engine's stem key and the file base name
/// it is written under (extension added by the engine's output format)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StemOutput {
    /// Engine stem key, e.g. "Vocals"
    pub key: String,
    /// Output file base name, e.g. "base_vocals"
    pub base: String,
}

/// A processing step that consumes one input file and produces stems
///
/// `depends_on` names at most one parent module. A dependent module reads the
/// parent's `input_stem` output; a root module reads the project's original file.
#[derive(Debug, Clone, Serialize)]
pub struct Module {
    pub id: String,
    pub description: String,
    pub category: String,
    pub depends_on: Option<String>,
    pub input_stem: Option<String>,
    pub outputs: Vec<StemOutput>,
    /// Opaque model reference handed to the inference engine
    pub model: String,
}

impl Module {
    pub fn new(id: &str, description: &str, category: &str, model: &str) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            category: category.to_string(),
            depends_on: None,
            input_stem: None,
            outputs: Vec::new(),
            model: model.to_string(),
        }
    }

    /// Consume `input_stem` from `parent`'s outputs
    pub fn depends_on(mut self, parent: &str, input_stem: &str) -> Self {
        self.depends_on = Some(parent.to_string());
        self.input_stem = Some(input_stem.to_string());
        self
    }

    pub fn output(mut self, key: &str, base: &str) -> Self {
        self.outputs.push(StemOutput {
            key: key.to_string(),
            base: base.to_string(),
        });
        self
    }

    pub fn produces(&self, key: &str) -> bool {
        self.outputs.iter().any(|o| o.key == key)
    }
}

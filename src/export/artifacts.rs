use sha2::{Digest, Sha256};

use super::templates;

pub const INTEGRATOR_SOURCE: &str = "integrator.c";
pub const HEADER: &str = "acado.h";
pub const MODEL_SOURCE: &str = "model.c";
pub const WORKSPACE_SOURCE: &str = "workspace.c";
pub const MAKEFILE: &str = "Makefile";

/// File names of an artifact set, in hashing and writing order
pub const ARTIFACT_FILES: [&str; 5] = [
    INTEGRATOR_SOURCE,
    HEADER,
    MODEL_SOURCE,
    WORKSPACE_SOURCE,
    MAKEFILE,
];

/// The five generated files making up one exported integrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSet {
    contents: [String; 5],
}

impl ArtifactSet {
    pub fn new(
        integrator: String,
        header: String,
        model: String,
        workspace: String,
        makefile: String,
    ) -> Self {
        ArtifactSet {
            contents: [integrator, header, model, workspace, makefile],
        }
    }

    /// Completes the generated sources with the fixed workspace and build script
    pub fn from_sources(integrator: String, header: String, model: String) -> Self {
        Self::new(
            integrator,
            header,
            model,
            templates::WORKSPACE.to_string(),
            templates::makefile(&templates::SOURCES),
        )
    }

    /// `(file name, content)` pairs in the fixed order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        ARTIFACT_FILES
            .iter()
            .copied()
            .zip(self.contents.iter().map(String::as_str))
    }

    pub fn get(&self, file_name: &str) -> Option<&str> {
        ARTIFACT_FILES
            .iter()
            .position(|f| *f == file_name)
            .map(|i| self.contents[i].as_str())
    }

    /// SHA-256 over every file name followed by its content, in the fixed order, as lowercase hex
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for (name, content) in self.iter() {
            hasher.update(name.as_bytes());
            hasher.update(content.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

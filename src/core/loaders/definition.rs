// src/core/loaders/definition.rs

use super::{LoadError, ProjectLoader};
use crate::constants::PROJECT_FILE_GLOB;
use crate::core::paths;
use crate::models::Project;
use std::path::Path;

/// Loads `.project.yaml` / `.module.yaml` definition files.
///
/// Definitions are loaded raw: an `extends` entry stays on the project for
/// the extension-resolution stage of the processing pipeline.
#[derive(Debug, Default)]
pub struct DefinitionFileLoader;

impl DefinitionFileLoader {
    pub fn new() -> Self {
        Self
    }
}

impl ProjectLoader for DefinitionFileLoader {
    fn include(&self) -> &str {
        PROJECT_FILE_GLOB
    }

    fn load_project(&self, base_dir: &Path, file: &str) -> Result<Option<Project>, LoadError> {
        let path = paths::to_file_path(base_dir, file);
        let content = std::fs::read_to_string(&path).map_err(|source| LoadError::Io {
            path: file.to_string(),
            source,
        })?;
        let mut project: Project =
            serde_yaml::from_str(&content).map_err(|source| LoadError::Yaml {
                path: file.to_string(),
                source,
            })?;
        project.dir = paths::parent(file);

        let tag = "loader:definition".to_string();
        if !project.tags.contains(&tag) {
            project.tags.insert(0, tag);
        }
        Ok(Some(project))
    }
}

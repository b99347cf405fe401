// src/core/loaders/mod.rs
//
// Project discovery. Each loader recognises one kind of definition file;
// the workspace `sources` globs bound which files are offered to them.

pub mod cargo;
pub mod definition;

use crate::constants::WORKSPACE_CONFIG_GLOB;
use crate::models::{Project, WorkspaceConfiguration};
use crate::system::glob::{self, FileMatcher, GlobError};
use log::{debug, info};
use std::path::Path;
use thiserror::Error;

pub use cargo::CargoManifestLoader;
pub use definition::DefinitionFileLoader;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Glob(#[from] GlobError),
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse '{path}': {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Failed to parse '{path}': {source}")]
    Toml {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Definition extension cycle: {chain}")]
    ExtendsCycle { chain: String },
}

/// Turns one matched file into a raw project. Returning `Ok(None)` skips a
/// file the loader recognises but does not consider a project.
pub trait ProjectLoader {
    /// Glob selecting this loader's definition files.
    fn include(&self) -> &str;

    /// Optional glob removing files from `include` matches.
    fn exclude(&self) -> Option<&str> {
        None
    }

    fn load_project(&self, base_dir: &Path, file: &str) -> Result<Option<Project>, LoadError>;
}

/// Reads the workspace configuration from the repository root, trying each
/// accepted file name in order. Absence means defaults.
pub fn load_workspace_configuration(
    base_dir: &Path,
) -> Result<WorkspaceConfiguration, LoadError> {
    let matcher = FileMatcher::new(&[WORKSPACE_CONFIG_GLOB])?;
    for name in ["monorun.yaml", "monorun.yml", "workspace.yaml", "workspace.yml"] {
        let path = base_dir.join(name);
        if !path.is_file() || !matcher.is_match(name) {
            continue;
        }
        let content = std::fs::read_to_string(&path).map_err(|source| LoadError::Io {
            path: name.to_string(),
            source,
        })?;
        let config = serde_yaml::from_str(&content).map_err(|source| LoadError::Yaml {
            path: name.to_string(),
            source,
        })?;
        debug!("Loaded workspace configuration from '{name}'");
        return Ok(config);
    }
    Ok(WorkspaceConfiguration::default())
}

/// Walks the repository once and offers every file within the workspace
/// `sources` to each loader in turn. The returned projects are raw: merging,
/// dependency resolution and graphing happen in `core::processors`.
pub fn load_projects(
    base_dir: &Path,
    configuration: &WorkspaceConfiguration,
    loaders: &[&dyn ProjectLoader],
) -> Result<Vec<Project>, LoadError> {
    let candidates = glob::find_files(base_dir, &configuration.sources)?;
    let mut projects = Vec::new();

    for loader in loaders {
        let mut patterns = vec![loader.include().to_string()];
        if let Some(exclude) = loader.exclude() {
            patterns.push(format!("!{exclude}"));
        }
        let matcher = FileMatcher::new(&patterns)?;

        for file in candidates.iter().filter(|f| matcher.is_match(f)) {
            if let Some(project) = loader.load_project(base_dir, file)? {
                debug!("Loaded project '{}' from '{file}'", project.dir);
                projects.push(project);
            }
        }
    }

    info!("Discovered {} raw projects", projects.len());
    Ok(projects)
}

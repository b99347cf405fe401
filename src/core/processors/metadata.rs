// src/core/processors/metadata.rs

use super::{ProcessError, ProjectProcessor};
use crate::core::loaders::LoadError;
use crate::core::paths;
use crate::models::{CommandPipeline, Project};
use crate::system::glob;
use log::debug;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Ecosystem metadata extracted from a marker file inside a project
/// directory.
#[derive(Debug, Default)]
pub struct ProjectMetadata {
    pub name: Option<String>,
    /// Repository-root-relative dependency paths.
    pub dependencies: Vec<String>,
    pub tags: Vec<String>,
    /// Default commands, lower precedence than the project's own.
    pub commands: BTreeMap<String, CommandPipeline>,
}

/// Extracts [`ProjectMetadata`] from files matching `file_pattern` directly
/// inside a project's directory.
pub trait ProjectMetadataHandler {
    /// Glob matched against file names within the project directory.
    fn file_pattern(&self) -> &str;

    /// `file` is a repository-root-relative path to a matched file.
    fn load_metadata(&self, base_dir: &Path, file: &str) -> Result<ProjectMetadata, LoadError>;
}

/// Enriches projects from the registered metadata handlers: a handler match
/// can fill an empty `name`, append dependencies and tags, and supply
/// default commands the project has not defined itself.
pub struct LoadMetadata {
    base_dir: PathBuf,
    handlers: Vec<Box<dyn ProjectMetadataHandler>>,
}

impl LoadMetadata {
    pub fn new(base_dir: PathBuf, handlers: Vec<Box<dyn ProjectMetadataHandler>>) -> Self {
        Self { base_dir, handlers }
    }
}

impl ProjectProcessor for LoadMetadata {
    fn name(&self) -> &'static str {
        "load-metadata"
    }

    fn after(&self) -> &[&'static str] {
        &["extend-project"]
    }

    fn process_batch(&self, mut projects: Vec<Project>) -> Result<Vec<Project>, ProcessError> {
        for project in &mut projects {
            let project_dir = paths::to_file_path(&self.base_dir, &project.dir);
            if !project_dir.is_dir() {
                continue;
            }
            for handler in &self.handlers {
                for file in glob::find_files(&project_dir, &[handler.file_pattern()])? {
                    let repo_file =
                        paths::resolve_relative_to(&project.dir, file.trim_start_matches('/'));
                    debug!("Applying metadata from '{repo_file}' to '{}'", project.dir);
                    let metadata = handler.load_metadata(&self.base_dir, &repo_file)?;
                    apply(project, metadata);
                }
            }
        }
        Ok(projects)
    }
}

fn apply(project: &mut Project, metadata: ProjectMetadata) {
    if project.name.is_empty() {
        project.name = metadata.name.unwrap_or_default();
    }
    for dependency in metadata.dependencies {
        if !project
            .dependencies
            .iter()
            .any(|d| d.eq_ignore_ascii_case(&dependency))
        {
            project.dependencies.push(dependency);
        }
    }
    for tag in metadata.tags {
        if !project.tags.contains(&tag) {
            project.tags.push(tag);
        }
    }
    for (name, pipeline) in metadata.commands {
        project.commands.entry(name).or_insert(pipeline);
    }
}

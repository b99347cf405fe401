// src/core/processors/resolve.rs

use super::{ProcessError, ProjectProcessor};
use crate::core::paths;
use crate::models::Project;

/// Normalizes project directories and re-expresses every dependency entry
/// root-relative, resolving relative entries against the project directory.
/// Runs after metadata loading so handler-supplied entries are covered too.
#[derive(Debug, Default)]
pub struct ResolveDependencies;

impl ProjectProcessor for ResolveDependencies {
    fn name(&self) -> &'static str {
        "resolve-dependencies"
    }

    fn after(&self) -> &[&'static str] {
        &["load-metadata"]
    }

    fn process_batch(&self, projects: Vec<Project>) -> Result<Vec<Project>, ProcessError> {
        Ok(projects
            .into_iter()
            .map(|mut project| {
                project.dir = paths::normalize(&project.dir);
                project.dependencies = project
                    .dependencies
                    .iter()
                    .map(|d| paths::resolve_relative_to(&project.dir, d))
                    .collect();
                project
            })
            .collect())
    }
}

// src/core/processors/finalize.rs

use super::{Phase, ProcessError, ProjectProcessor};
use crate::core::paths;
use crate::models::Project;

/// Last touches: default empty names to the directory base name and leave
/// dependency and tag lists deduplicated and sorted.
#[derive(Debug, Default)]
pub struct FinalizeDefinition;

impl ProjectProcessor for FinalizeDefinition {
    fn name(&self) -> &'static str {
        "finalize"
    }

    fn phase(&self) -> Phase {
        Phase::Last
    }

    fn process_batch(&self, projects: Vec<Project>) -> Result<Vec<Project>, ProcessError> {
        Ok(projects
            .into_iter()
            .map(|mut project| {
                if project.name.is_empty() {
                    project.name = paths::base_name(&project.dir).to_string();
                }
                project.dependencies = sorted_unique(project.dependencies);
                project.tags = sorted_unique(project.tags);
                project
            })
            .collect())
    }
}

fn sorted_unique(mut values: Vec<String>) -> Vec<String> {
    values.sort();
    values.dedup();
    values
}

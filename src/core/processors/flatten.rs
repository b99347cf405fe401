// src/core/processors/flatten.rs

use super::{Phase, ProcessError, ProjectProcessor};
use crate::core::paths;
use crate::models::Project;
use std::collections::{BTreeSet, HashMap};

/// Copies every transitive dependency onto each project, so a change
/// anywhere below a project in the graph changes the project's version.
/// Dependency cycles are fatal.
#[derive(Debug, Default)]
pub struct FlattenDependencies;

impl ProjectProcessor for FlattenDependencies {
    fn name(&self) -> &'static str {
        "flatten-dependencies"
    }

    fn phase(&self) -> Phase {
        Phase::End
    }

    fn process_batch(&self, mut projects: Vec<Project>) -> Result<Vec<Project>, ProcessError> {
        let mut flattener = Flattener {
            index_by_dir: projects
                .iter()
                .enumerate()
                .map(|(index, p)| (p.dir.to_uppercase(), index))
                .collect(),
            projects: &projects,
            resolved: vec![None; projects.len()],
        };

        let mut flattened = Vec::with_capacity(projects.len());
        for index in 0..projects.len() {
            flattened.push(flattener.flatten(index, &mut Vec::new())?);
        }

        for (project, dependencies) in projects.iter_mut().zip(flattened) {
            project.dependencies = dependencies;
        }
        Ok(projects)
    }
}

struct Flattener<'a> {
    index_by_dir: HashMap<String, usize>,
    projects: &'a [Project],
    resolved: Vec<Option<Vec<String>>>,
}

impl Flattener<'_> {
    /// Depth-first flattening, memoized per project. `stack` holds the
    /// in-progress projects; revisiting one of them is a cycle.
    fn flatten(&mut self, index: usize, stack: &mut Vec<usize>) -> Result<Vec<String>, ProcessError> {
        if let Some(resolved) = &self.resolved[index] {
            return Ok(resolved.clone());
        }
        if let Some(position) = stack.iter().position(|&i| i == index) {
            let chain = stack[position..]
                .iter()
                .chain([&index])
                .map(|&i| label(&self.projects[i]))
                .collect::<Vec<_>>()
                .join(" => ");
            return Err(ProcessError::DependencyCycle { chain });
        }

        stack.push(index);
        let mut collected = BTreeSet::new();
        for dependency in &self.projects[index].dependencies {
            collected.insert(dependency.clone());
            if let Some(&target) = self.index_by_dir.get(&dependency.to_uppercase()) {
                collected.extend(self.flatten(target, stack)?);
            }
        }
        stack.pop();

        let flattened: Vec<String> = collected.into_iter().collect();
        self.resolved[index] = Some(flattened.clone());
        Ok(flattened)
    }
}

fn label(project: &Project) -> String {
    let name = if project.name.is_empty() {
        paths::base_name(&project.dir)
    } else {
        &project.name
    };
    format!("{name}({})", project.dir)
}

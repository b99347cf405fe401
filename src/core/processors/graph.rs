// src/core/processors/graph.rs

use super::{Phase, ProcessError, ProjectProcessor};
use crate::models::Project;
use std::collections::HashMap;

/// Builds the bidirectional dependency graph from direct dependencies. Runs
/// before flattening so graph edges stay direct, not transitive.
#[derive(Debug, Default)]
pub struct GraphDependencies;

impl ProjectProcessor for GraphDependencies {
    fn name(&self) -> &'static str {
        "graph-dependencies"
    }

    fn phase(&self) -> Phase {
        Phase::End
    }

    fn before(&self) -> &[&'static str] {
        &["flatten-dependencies"]
    }

    fn process_batch(&self, mut projects: Vec<Project>) -> Result<Vec<Project>, ProcessError> {
        let index_by_dir: HashMap<String, usize> = projects
            .iter()
            .enumerate()
            .map(|(index, p)| (p.dir.to_uppercase(), index))
            .collect();

        let mut dependencies: Vec<Vec<String>> = vec![Vec::new(); projects.len()];
        let mut dependants: Vec<Vec<String>> = vec![Vec::new(); projects.len()];

        for (index, project) in projects.iter().enumerate() {
            for dependency in &project.dependencies {
                // Dependency entries naming plain files have no graph node.
                let Some(&target) = index_by_dir.get(&dependency.to_uppercase()) else {
                    continue;
                };
                dependencies[index].push(projects[target].dir.clone());
                dependants[target].push(project.dir.clone());
            }
        }

        for (project, (mut deps, mut dants)) in projects
            .iter_mut()
            .zip(dependencies.into_iter().zip(dependants))
        {
            deps.sort();
            dants.sort();
            project.graph.dependencies = deps;
            project.graph.dependants = dants;
        }

        Ok(projects)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::project;
    use super::*;

    #[test]
    fn links_projects_both_ways() {
        // --- Setup ---
        let projects = vec![
            project("App", "/app", &["/lib", "/lib/Cargo.toml"]),
            project("Lib", "/lib", &[]),
        ];

        // --- Execute ---
        let graphed = GraphDependencies.process_batch(projects).unwrap();

        // --- Assert ---
        assert_eq!(graphed[0].graph.dependencies, vec!["/lib"]);
        assert!(graphed[0].graph.dependants.is_empty());
        assert_eq!(graphed[1].graph.dependants, vec!["/app"]);
    }

    #[test]
    fn dependency_dir_match_is_case_insensitive() {
        let projects = vec![
            project("App", "/app", &["/LIB"]),
            project("Lib", "/lib", &[]),
        ];

        let graphed = GraphDependencies.process_batch(projects).unwrap();
        assert_eq!(graphed[0].graph.dependencies, vec!["/lib"]);
    }
}

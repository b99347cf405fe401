// src/core/processors/merge.rs

use super::{Phase, ProcessError, ProjectProcessor};
use crate::models::Project;
use std::collections::HashMap;

/// Collapses projects sharing a directory (typically one per loader) into a
/// single project. First-seen scalars and commands win; lists concatenate in
/// encounter order.
#[derive(Debug, Default)]
pub struct MergeProjects;

impl ProjectProcessor for MergeProjects {
    fn name(&self) -> &'static str {
        "merge"
    }

    fn phase(&self) -> Phase {
        Phase::Start
    }

    fn process_batch(&self, projects: Vec<Project>) -> Result<Vec<Project>, ProcessError> {
        let mut merged: Vec<Project> = Vec::new();
        let mut index_by_dir: HashMap<String, usize> = HashMap::new();

        for project in projects {
            let key = project.dir.to_uppercase();
            match index_by_dir.get(&key) {
                Some(&index) => {
                    let existing = std::mem::take(&mut merged[index]);
                    merged[index] = merge_pair(existing, project);
                }
                None => {
                    index_by_dir.insert(key, merged.len());
                    merged.push(project);
                }
            }
        }

        Ok(merged)
    }
}

fn merge_pair(first: Project, second: Project) -> Project {
    let mut commands = second.commands;
    commands.extend(first.commands);

    Project {
        extends: first.extends.or(second.extends),
        name: if first.name.is_empty() {
            second.name
        } else {
            first.name
        },
        dir: first.dir,
        dependencies: first
            .dependencies
            .into_iter()
            .chain(second.dependencies)
            .collect(),
        tags: first.tags.into_iter().chain(second.tags).collect(),
        commands,
        graph: first.graph,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CommandPipeline, ProjectCommand};

    fn with_command(mut project: Project, name: &str, command: &str) -> Project {
        project.commands.insert(
            name.to_string(),
            CommandPipeline::from(ProjectCommand {
                command: command.to_string(),
                ..Default::default()
            }),
        );
        project
    }

    #[test]
    fn merges_projects_with_the_same_dir() {
        // --- Setup ---
        let first = with_command(
            Project {
                name: "Defined".to_string(),
                dir: "/svc".to_string(),
                dependencies: vec!["/a".to_string()],
                tags: vec!["one".to_string()],
                ..Default::default()
            },
            "build",
            "echo first",
        );
        let second = with_command(
            Project {
                name: "FromManifest".to_string(),
                dir: "/SVC".to_string(),
                dependencies: vec!["/b".to_string()],
                tags: vec!["two".to_string()],
                ..Default::default()
            },
            "build",
            "echo second",
        );
        let second = with_command(second, "test", "echo test");

        // --- Execute ---
        let merged = MergeProjects.process_batch(vec![first, second]).unwrap();

        // --- Assert ---
        assert_eq!(merged.len(), 1);
        let project = &merged[0];
        assert_eq!(project.name, "Defined");
        assert_eq!(project.dir, "/svc");
        assert_eq!(project.dependencies, vec!["/a", "/b"]);
        assert_eq!(project.tags, vec!["one", "two"]);
        // First-seen command wins, others join in.
        assert_eq!(
            project.commands.get("build").unwrap().steps()[0].command,
            "echo first"
        );
        assert!(project.commands.contains_key("test"));
    }

    #[test]
    fn empty_name_falls_back_to_later_project() {
        let first = Project {
            dir: "/svc".to_string(),
            ..Default::default()
        };
        let second = Project {
            name: "Named".to_string(),
            dir: "/svc".to_string(),
            ..Default::default()
        };

        let merged = MergeProjects.process_batch(vec![first, second]).unwrap();
        assert_eq!(merged[0].name, "Named");
    }

    #[test]
    fn distinct_dirs_stay_separate() {
        let merged = MergeProjects
            .process_batch(vec![
                Project {
                    dir: "/a".to_string(),
                    ..Default::default()
                },
                Project {
                    dir: "/b".to_string(),
                    ..Default::default()
                },
            ])
            .unwrap();
        assert_eq!(merged.len(), 2);
    }
}

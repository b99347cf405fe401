// src/core/processors/extend.rs

use super::{ProcessError, ProjectProcessor};
use crate::core::loaders::LoadError;
use crate::core::paths;
use crate::models::{CommandPipeline, Project, ProjectCommand};
use log::debug;
use std::collections::HashMap;
use std::path::PathBuf;

/// Resolves the `extends` reference left on each merged project.
///
/// The referenced definition file is loaded (cached by resolved path), its
/// own `extends` chain followed recursively, and the result merged
/// underneath the extending project: the extending side's name and commands
/// win, dependency and tag lists concatenate base-first. Inherited
/// dependencies and working directories stay anchored to the base file's
/// own directory.
#[derive(Debug)]
pub struct ExtendProject {
    base_dir: PathBuf,
}

impl ExtendProject {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn load_base(
        &self,
        file: &str,
        cache: &mut HashMap<String, Project>,
        visited: &mut Vec<String>,
    ) -> Result<Project, ProcessError> {
        if let Some(base) = cache.get(file) {
            return Ok(base.clone());
        }
        if visited.iter().any(|f| f.eq_ignore_ascii_case(file)) {
            let chain = visited
                .iter()
                .map(String::as_str)
                .chain([file])
                .collect::<Vec<_>>()
                .join(" => ");
            return Err(LoadError::ExtendsCycle { chain }.into());
        }
        visited.push(file.to_string());

        let path = paths::to_file_path(&self.base_dir, file);
        let content = std::fs::read_to_string(&path).map_err(|source| LoadError::Io {
            path: file.to_string(),
            source,
        })?;
        let mut base: Project =
            serde_yaml::from_str(&content).map_err(|source| LoadError::Yaml {
                path: file.to_string(),
                source,
            })?;
        base.dir = paths::parent(file);

        if let Some(extends) = base.extends.clone() {
            let inner_file = paths::resolve_relative_to(&base.dir, &extends);
            let inner = self.load_base(&inner_file, cache, visited)?;
            base = merge_extension(base, rebase_extension(inner));
        }

        visited.pop();
        cache.insert(file.to_string(), base.clone());
        Ok(base)
    }
}

impl ProjectProcessor for ExtendProject {
    fn name(&self) -> &'static str {
        "extend-project"
    }

    fn after(&self) -> &[&'static str] {
        &["merge"]
    }

    fn process_batch(&self, projects: Vec<Project>) -> Result<Vec<Project>, ProcessError> {
        // Shared base definitions are only read once per batch.
        let mut cache = HashMap::new();

        projects
            .into_iter()
            .map(|project| {
                let Some(extends) = project.extends.clone() else {
                    return Ok(project);
                };
                let file = paths::resolve_relative_to(&project.dir, &extends);
                debug!("Extending '{}' from '{file}'", project.dir);
                let base = self.load_base(&file, &mut cache, &mut Vec::new())?;
                Ok(merge_extension(project, rebase_extension(base)))
            })
            .collect()
    }
}

/// Re-expresses a base definition's relative paths as root-relative ones so
/// they survive being merged into a project in a different directory.
fn rebase_extension(mut base: Project) -> Project {
    let base_dir = base.dir.clone();

    base.dependencies = base
        .dependencies
        .iter()
        .map(|d| paths::resolve_relative_to(&base_dir, d))
        .collect();

    for pipeline in base.commands.values_mut() {
        let rebase_step = |step: &mut ProjectCommand| {
            step.working_directory = Some(match &step.working_directory {
                Some(wd) => paths::resolve_relative_to(&base_dir, wd),
                None => base_dir.clone(),
            });
        };
        match pipeline {
            CommandPipeline::Single(step) => rebase_step(step),
            CommandPipeline::Sequence(steps) => steps.iter_mut().for_each(rebase_step),
        }
    }

    base
}

fn merge_extension(derived: Project, base: Project) -> Project {
    let mut commands = base.commands;
    commands.extend(derived.commands);

    Project {
        extends: derived.extends,
        name: if derived.name.is_empty() {
            base.name
        } else {
            derived.name
        },
        dir: derived.dir,
        dependencies: base
            .dependencies
            .into_iter()
            .chain(derived.dependencies)
            .collect(),
        tags: base.tags.into_iter().chain(derived.tags).collect(),
        commands,
        graph: derived.graph,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(repo: &TempDir, file: &str, content: &str) {
        let path = repo.path().join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn extending(dir: &str, extends: &str) -> Project {
        Project {
            extends: Some(extends.to_string()),
            dir: dir.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn merges_base_underneath_the_extending_project() {
        // --- Setup ---
        let repo = TempDir::new().unwrap();
        write(
            &repo,
            "base/.module.yaml",
            "name: Base\ndependencies:\n  - shared\ntags:\n  - common\ncommands:\n  build:\n    command: echo base build\n  lint:\n    command: echo lint\n",
        );
        let mut project = extending("/svc", "../base/.module.yaml");
        project.name = "Service".to_string();
        project.dependencies = vec!["local".to_string()];
        project.commands.insert(
            "build".to_string(),
            CommandPipeline::from(ProjectCommand {
                command: "echo own build".to_string(),
                ..Default::default()
            }),
        );
        let processor = ExtendProject::new(repo.path().to_path_buf());

        // --- Execute ---
        let projects = processor.process_batch(vec![project]).unwrap();

        // --- Assert ---
        let project = &projects[0];
        assert_eq!(project.name, "Service");
        // Base dependencies are rebased to the base file's directory.
        assert_eq!(project.dependencies, vec!["/base/shared", "local"]);
        assert!(project.tags.contains(&"common".to_string()));
        // The extending project's command wins; inherited ones remain.
        assert_eq!(
            project.commands.get("build").unwrap().steps()[0].command,
            "echo own build"
        );
        let lint = &project.commands.get("lint").unwrap().steps()[0];
        assert_eq!(lint.command, "echo lint");
        // Inherited commands keep running from the base directory.
        assert_eq!(lint.working_directory.as_deref(), Some("/base"));
    }

    #[test]
    fn extends_chains_resolve_recursively() {
        let repo = TempDir::new().unwrap();
        write(&repo, "root/.module.yaml", "tags: [from-root]\n");
        write(
            &repo,
            "mid/.module.yaml",
            "extends: ../root/.module.yaml\ntags: [from-mid]\n",
        );
        let processor = ExtendProject::new(repo.path().to_path_buf());

        let projects = processor
            .process_batch(vec![extending("/svc", "../mid/.module.yaml")])
            .unwrap();

        assert!(projects[0].tags.contains(&"from-root".to_string()));
        assert!(projects[0].tags.contains(&"from-mid".to_string()));
    }

    #[test]
    fn base_name_fills_in_when_missing() {
        let repo = TempDir::new().unwrap();
        write(&repo, "base/.module.yaml", "name: Base\n");
        let processor = ExtendProject::new(repo.path().to_path_buf());

        let projects = processor
            .process_batch(vec![extending("/svc", "../base/.module.yaml")])
            .unwrap();
        assert_eq!(projects[0].name, "Base");
    }

    #[test]
    fn projects_without_extends_pass_through() {
        let repo = TempDir::new().unwrap();
        let project = Project {
            name: "Plain".to_string(),
            dir: "/plain".to_string(),
            ..Default::default()
        };
        let processor = ExtendProject::new(repo.path().to_path_buf());

        let projects = processor.process_batch(vec![project]).unwrap();
        assert_eq!(projects[0].name, "Plain");
        assert!(projects[0].extends.is_none());
    }

    #[test]
    fn extends_cycle_is_an_error() {
        let repo = TempDir::new().unwrap();
        write(&repo, "a/.project.yaml", "extends: ../b/.project.yaml\n");
        write(&repo, "b/.project.yaml", "extends: ../a/.project.yaml\n");
        let processor = ExtendProject::new(repo.path().to_path_buf());

        let error = processor
            .process_batch(vec![extending("/a", "../b/.project.yaml")])
            .unwrap_err();
        let ProcessError::Load(LoadError::ExtendsCycle { chain }) = error else {
            panic!("expected cycle error, got {error}");
        };
        assert_eq!(
            chain,
            "/b/.project.yaml => /a/.project.yaml => /b/.project.yaml"
        );
    }
}

// src/core/project_service.rs

use crate::core::loaders::{self, CargoManifestLoader, DefinitionFileLoader};
use crate::core::processors;
use crate::core::repository::{Repository, RepositoryError};
use crate::models::{Project, ProjectVersion, ProjectWithVersion};
use anyhow::Result;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Discovers, processes and versions the repository's projects. Discovery
/// runs once per service instance.
#[derive(Debug)]
pub struct ProjectService {
    base_dir: PathBuf,
    repository: Arc<Repository>,
    projects: OnceCell<Vec<Project>>,
}

impl ProjectService {
    pub fn new(base_dir: PathBuf, repository: Arc<Repository>) -> Self {
        Self {
            base_dir,
            repository,
            projects: OnceCell::new(),
        }
    }

    /// The fully processed project list, sorted by directory.
    pub async fn projects(&self) -> Result<&[Project]> {
        let projects = self
            .projects
            .get_or_try_init(|| async { self.load_projects() })
            .await?;
        Ok(projects)
    }

    fn load_projects(&self) -> Result<Vec<Project>> {
        let configuration = loaders::load_workspace_configuration(&self.base_dir)?;
        let definition_loader = DefinitionFileLoader::new();
        let cargo_loader = CargoManifestLoader::new();

        let raw = loaders::load_projects(
            &self.base_dir,
            &configuration,
            &[&definition_loader, &cargo_loader],
        )?;
        let processed =
            processors::process(processors::default_processors(&self.base_dir), raw)?;

        info!("Loaded {} projects", processed.len());
        Ok(processed)
    }

    /// The latest change version covering the project's directory and all of
    /// its flattened dependencies.
    pub async fn project_version(&self, project: &Project) -> Result<ProjectVersion, RepositoryError> {
        let mut watched = Vec::with_capacity(project.dependencies.len() + 1);
        watched.push(project.dir.clone());
        watched.extend(project.dependencies.iter().cloned());
        self.repository.get_latest_version(&watched).await
    }

    pub async fn projects_with_versions(&self) -> Result<Vec<ProjectWithVersion>> {
        let projects = self.projects().await?;

        let mut versioned = Vec::with_capacity(projects.len());
        for project in projects {
            let version = self.project_version(project).await?;
            versioned.push(ProjectWithVersion {
                project: project.clone(),
                version,
            });
        }
        Ok(versioned)
    }
}

// src/cli/handlers/commons.rs
//
// Shared plumbing for command handlers: repository discovery, service
// wiring and the project filter chain.

use crate::cli::CliError;
use crate::cli::args::FilterArgs;
use crate::constants::{ENV_FILE_GLOB, EXIT_NO_REPOSITORY};
use crate::core::context::ContextService;
use crate::core::paths;
use crate::core::project_service::ProjectService;
use crate::core::repository::Repository;
use crate::models::ProjectWithVersion;
use crate::system::glob::{self, FileMatcher};
use anyhow::Result;
use log::debug;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a handler needs, wired against the enclosing repository.
#[derive(Debug)]
pub struct App {
    pub base_dir: PathBuf,
    pub repository: Arc<Repository>,
    pub projects: ProjectService,
    pub context: ContextService,
}

/// Finds the repository root enclosing the working directory.
/// Exit code 2 when the working directory is not inside a repository.
pub fn repository_root() -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    let base_dir = paths::find_repository_root(&cwd).ok_or_else(|| {
        CliError::new(
            format!("No git repository found containing `{}`", cwd.display()),
            EXIT_NO_REPOSITORY,
        )
    })?;
    debug!("Repository base dir: '{}'", base_dir.display());
    Ok(base_dir)
}

impl App {
    /// Locates the enclosing git repository and wires the services.
    pub fn initialize() -> Result<Self> {
        let base_dir = repository_root()?;

        let repository = Arc::new(Repository::new(base_dir.clone()));
        let projects = ProjectService::new(base_dir.clone(), Arc::clone(&repository));
        let env_files = glob::find_files(&base_dir, &[ENV_FILE_GLOB])?;
        let context = ContextService::new(base_dir.clone(), env_files);

        Ok(Self {
            base_dir,
            repository,
            projects,
            context,
        })
    }
}

/// Handlers are synchronous entry points; each runs its async body on a
/// fresh runtime.
pub fn block_on<T>(future: impl Future<Output = Result<T>>) -> Result<T> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(future)
}

/// Applies the shared project filters in order: name globs, tags, change
/// ranges, uncommitted changes.
pub async fn filter_projects(
    app: &App,
    filter: &FilterArgs,
) -> Result<Vec<ProjectWithVersion>> {
    let mut projects = app.projects.projects_with_versions().await?;
    let initial_count = projects.len();

    if !filter.projects.is_empty() {
        let matcher = FileMatcher::new(&filter.projects)?;
        projects.retain(|p| matcher.is_match(&p.project.name));
    }

    if !filter.tags.is_empty() {
        projects.retain(|p| filter.tags.iter().all(|t| p.project.tags.contains(t)));
    }

    if filter.changed_in.is_some() || filter.changed_from.is_some() {
        let changes = if let Some(object) = &filter.changed_in {
            app.repository.get_changes(object, None).await?
        } else if let Some(from) = &filter.changed_from {
            let to = filter.changed_to.as_deref().unwrap_or("HEAD");
            app.repository.get_changes(from, Some(to)).await?
        } else {
            Vec::new()
        };

        // An open-ended range also admits projects with local changes.
        let include_local = filter.changed_in.is_none() && filter.changed_to.is_none();
        projects.retain(|p| {
            (include_local && p.version.local_changes.is_some())
                || std::iter::once(&p.project.dir)
                    .chain(p.project.dependencies.iter())
                    .any(|watched| changes.iter().any(|c| c.starts_with(watched)))
        });
    }

    if filter.changes_uncommitted {
        projects.retain(|p| {
            p.version
                .local_changes
                .as_ref()
                .is_some_and(|changes| !changes.is_empty())
        });
    }

    debug!("Matched {} of {initial_count} projects", projects.len());
    Ok(projects)
}

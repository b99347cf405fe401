// src/cli/handlers/init.rs

use crate::CancellationToken;
use crate::cli::CliError;
use crate::cli::args::InitArgs;
use crate::cli::handlers::commons;
use crate::constants::{EXIT_INIT_INVALID_TARGET, PROJECT_FILE_NAME};
use crate::models::{CommandPipeline, Project, ProjectCommand};
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

/// Writes a starter `.project.yaml` into the target directory.
pub fn handle(args: Vec<String>, _cancellation: &CancellationToken) -> Result<()> {
    let args = InitArgs::parse_from(args);
    commons::repository_root()?;

    let target = match &args.project_dir {
        Some(dir) => PathBuf::from(shellexpand::tilde(dir).into_owned()),
        None => std::env::current_dir()?,
    };

    let metadata = std::fs::metadata(&target).map_err(|_| {
        CliError::new(
            format!("`{}` does not exist", target.display()),
            EXIT_INIT_INVALID_TARGET,
        )
    })?;
    if !metadata.is_dir() {
        return Err(CliError::new(
            format!("`{}` is not a directory", target.display()),
            EXIT_INIT_INVALID_TARGET,
        )
        .into());
    }

    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let yaml = serde_yaml::to_string(&starter_project(&name))?;

    let file = target.join(PROJECT_FILE_NAME);
    println!("Writing to `{}`", file.display());
    println!("{yaml}");
    std::fs::write(&file, yaml)?;
    Ok(())
}

fn starter_project(name: &str) -> Project {
    let mut project = Project {
        name: name.to_string(),
        ..Default::default()
    };
    project.commands.insert(
        "example".to_string(),
        CommandPipeline::Sequence(vec![ProjectCommand {
            command: "echo \"example\"".to_string(),
            ..Default::default()
        }]),
    );
    project
}

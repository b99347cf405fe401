// src/cli/handlers/list.rs

use crate::CancellationToken;
use crate::cli::CliError;
use crate::cli::args::ListArgs;
use crate::cli::handlers::commons::{self, App};
use crate::core::evaluator::{self, Value};
use anyhow::Result;
use clap::Parser;

/// Renders each matching project through the list template.
pub fn handle(args: Vec<String>, _cancellation: &CancellationToken) -> Result<()> {
    let args = ListArgs::parse_from(args);
    let app = App::initialize()?;

    let output = commons::block_on(render(&app, &args))?;
    println!("{output}");
    Ok(())
}

async fn render(app: &App, args: &ListArgs) -> Result<String> {
    let projects = commons::filter_projects(app, &args.filter).await?;
    if projects.is_empty() {
        return Err(CliError::new("No matching projects", 1).into());
    }

    let mut rendered = Vec::with_capacity(projects.len());
    for project in &projects {
        let mut context = app.context.project_context(&projects, project, None)?;
        context.insert("longVersion", Value::Bool(args.long_version));
        rendered.push(evaluator::evaluate_template(&args.template, &context)?);
    }
    Ok(rendered.join(&args.join))
}

// src/cli/handlers/template.rs

use crate::CancellationToken;
use crate::cli::CliError;
use crate::cli::args::TemplateArgs;
use crate::cli::handlers::commons::{self, App};
use crate::constants::{EXIT_TEMPLATE_AMBIGUOUS_INPUT, EXIT_TEMPLATE_MISSING_INPUT};
use crate::core::evaluator;
use anyhow::Result;
use clap::Parser;

/// Renders a standalone template against the repository context.
pub fn handle(args: Vec<String>, _cancellation: &CancellationToken) -> Result<()> {
    let args = TemplateArgs::parse_from(args);
    let template = read_template(&args)?;

    let app = App::initialize()?;
    app.context.set_parameters(&args.context)?;

    let output = commons::block_on(async {
        let projects = app.projects.projects_with_versions().await?;
        let context = app.context.context(&projects)?;
        Ok(evaluator::evaluate_template(&template, &context)?)
    })?;

    // Rendered as-is; the template decides about trailing newlines.
    print!("{output}");
    Ok(())
}

fn read_template(args: &TemplateArgs) -> Result<String> {
    match (&args.template_file, &args.template) {
        (Some(_), Some(_)) => Err(CliError::new(
            "Must only provide one of --template-file or --template",
            EXIT_TEMPLATE_AMBIGUOUS_INPUT,
        )
        .into()),
        (None, None) => Err(CliError::new(
            "Must provide either --template-file or --template",
            EXIT_TEMPLATE_MISSING_INPUT,
        )
        .into()),
        (Some(file), None) => {
            let path = shellexpand::tilde(file).into_owned();
            Ok(std::fs::read_to_string(&path)
                .map_err(|e| CliError::new(format!("Failed to read `{path}`: {e}"), 1))?)
        }
        (None, Some(text)) => Ok(text.clone()),
    }
}

// src/cli/args.rs
use clap::Parser;

/// Template used by `list` when none is given.
pub const DEFAULT_LIST_TEMPLATE: &str =
    "=> ${{name}} (${{longVersion ? version.hash : version.hashShort}} @ ${{version.ago}})";

/// Filters shared by every command that selects projects.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct FilterArgs {
    /// Only include projects whose name matches one of these glob patterns.
    #[arg(short = 'p', long = "projects", value_name = "GLOB", num_args = 1..)]
    pub projects: Vec<String>,

    /// Only include projects carrying every one of these tags.
    #[arg(short = 't', long = "tags", value_name = "TAG", num_args = 1..)]
    pub tags: Vec<String>,

    /// Only include projects changed in the given revision.
    #[arg(long = "changed-in", value_name = "OBJECT")]
    pub changed_in: Option<String>,

    /// Only include projects changed after the given revision.
    #[arg(long = "changed-from", value_name = "OBJECT", conflicts_with = "changed_in")]
    pub changed_from: Option<String>,

    /// Upper bound revision for --changed-from.
    #[arg(long = "changed-to", value_name = "OBJECT", requires = "changed_from")]
    pub changed_to: Option<String>,

    /// Only include projects with uncommitted changes.
    #[arg(long = "changes-uncommitted")]
    pub changes_uncommitted: bool,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true)] // Important: the registry strips the command name first
pub struct InitArgs {
    /// Directory to initialize. Defaults to the current working directory.
    pub project_dir: Option<String>,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true)]
pub struct ListArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    /// Show the full version hash instead of the short one.
    #[arg(long = "long-version")]
    pub long_version: bool,

    /// Template rendered once per project.
    #[arg(long, value_name = "TEMPLATE", default_value = DEFAULT_LIST_TEMPLATE)]
    pub template: String,

    /// Separator between rendered projects.
    #[arg(short = 'j', long, value_name = "SEPARATOR", default_value = "\n")]
    pub join: String,
}

#[derive(Parser, Debug)]
#[command(no_binary_name = true)]
pub struct RunArgs {
    /// The name of the command to run.
    pub command: String,

    #[command(flatten)]
    pub filter: FilterArgs,

    /// Run every project command regardless of failures.
    #[arg(long = "continue-on-failure")]
    pub continue_on_failure: bool,

    /// Run commands without waiting for dependencies.
    #[arg(long = "ignore-dependencies")]
    pub ignore_dependencies: bool,

    /// Number of projects to run concurrently.
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub concurrency: usize,

    /// Disable colored console output.
    #[arg(long = "no-color")]
    pub no_color: bool,

    /// Context values for template evaluation, as `-c key=value`;
    /// available in templates as `${{context.key}}`.
    #[arg(short = 'c', long = "context", value_name = "KEY=VALUE", num_args = 1..)]
    pub context: Vec<String>,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true)]
pub struct TemplateArgs {
    /// Path to the template file.
    #[arg(short = 'f', long = "template-file", value_name = "PATH")]
    pub template_file: Option<String>,

    /// Inline template text.
    #[arg(short = 't', long = "template", value_name = "TEMPLATE")]
    pub template: Option<String>,

    /// Context values for template evaluation, as `-c key=value`.
    #[arg(short = 'c', long = "context", value_name = "KEY=VALUE", num_args = 1..)]
    pub context: Vec<String>,
}

// src/bin/monorun.rs

use anyhow::Result;
use colored::Colorize;
use monorun::CancellationToken;
use monorun::cli::{CliError, handlers};
use std::env;

// --- Command Definition and Registry ---

/// Defines a command, its aliases, and its synchronous handler function.
/// Handlers parse their own arguments, so the registry stays declarative.
struct CommandDefinition {
    name: &'static str,
    aliases: &'static [&'static str],
    handler: fn(Vec<String>, &CancellationToken) -> Result<()>,
}

/// The single source of truth for all commands. To add a new command,
/// add an entry here and a handler module under `cli::handlers`.
static COMMAND_REGISTRY: &[CommandDefinition] = &[
    CommandDefinition {
        name: "init",
        aliases: &[],
        handler: handlers::init::handle,
    },
    CommandDefinition {
        name: "list",
        aliases: &["ls"],
        handler: handlers::list::handle,
    },
    CommandDefinition {
        name: "run",
        aliases: &[],
        handler: handlers::run::handle,
    },
    CommandDefinition {
        name: "template",
        aliases: &["tpl"],
        handler: handlers::template::handle,
    },
];

/// Finds a command definition in the registry by its name or alias.
fn find_command(name: &str) -> Option<&'static CommandDefinition> {
    COMMAND_REGISTRY
        .iter()
        .find(|cmd| cmd.name == name || cmd.aliases.contains(&name))
}

fn usage() -> String {
    let commands = COMMAND_REGISTRY
        .iter()
        .map(|cmd| {
            if cmd.aliases.is_empty() {
                cmd.name.to_string()
            } else {
                format!("{} ({})", cmd.name, cmd.aliases.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Usage: monorun <command> [options]\n\n\
         Commands: {commands}\n\n\
         Run `monorun <command> --help` for the options of a command."
    )
}

/// The main entry point. Sets up logging, dispatches to the handler for
/// the named command, and performs centralized error handling.
fn main() {
    env_logger::init();
    let cancellation = CancellationToken::new();

    let mut args = env::args().skip(1);
    let Some(first) = args.next() else {
        eprintln!("{}", usage());
        std::process::exit(1);
    };

    match first.as_str() {
        "-h" | "--help" | "help" => {
            println!("{}", usage());
            return;
        }
        "-V" | "--version" => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            return;
        }
        _ => {}
    }

    let Some(command) = find_command(&first) else {
        eprintln!("Unknown command `{first}`\n\n{}", usage());
        std::process::exit(1);
    };

    if let Err(error) = (command.handler)(args.collect(), &cancellation) {
        // --- Centralized Error Handling ---
        // CliError carries the documented exit code for the failure.
        if let Some(cli_error) = error.downcast_ref::<CliError>() {
            eprintln!("{}", cli_error.message.red());
            std::process::exit(cli_error.exit_code);
        }
        eprintln!("{}: {:#}", "Error".red().bold(), error);
        std::process::exit(1);
    }
}

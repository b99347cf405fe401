// src/cli/mod.rs

pub mod args;
pub mod handlers;

use thiserror::Error;

/// A user-facing failure carrying the documented process exit code.
///
/// `main` downcasts to this type to pick the exit code; everything else
/// exits 1.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct CliError {
    pub exit_code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(message: impl Into<String>, exit_code: i32) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }
}

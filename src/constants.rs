// src/constants.rs

/// Glob matching generic project definition files.
pub const PROJECT_FILE_GLOB: &str = "**/.{module,project}.{yaml,yml}";

/// The definition file written by `monorun init`.
pub const PROJECT_FILE_NAME: &str = ".project.yaml";

/// Glob matching workspace configuration files at the repository root.
pub const WORKSPACE_CONFIG_GLOB: &str = "{monorun,workspace}.{yaml,yml}";

/// Glob matching `.env`-family files anywhere in the repository.
pub const ENV_FILE_GLOB: &str = "**/.{*.env,env}";

// Exit codes preserved from the original CLI contract.

/// No git repository was found containing the working directory.
pub const EXIT_NO_REPOSITORY: i32 = 2;

/// The `init` target path does not exist or is not a directory.
pub const EXIT_INIT_INVALID_TARGET: i32 = 11;

/// No matching project defines the requested command.
pub const EXIT_NO_MATCHING_COMMAND: i32 = 21;

/// The command run failed for at least one project.
pub const EXIT_RUN_FAILED: i32 = 22;

/// `template` was given both a template file and inline template text.
pub const EXIT_TEMPLATE_AMBIGUOUS_INPUT: i32 = 31;

/// `template` was given neither a template file nor inline template text.
pub const EXIT_TEMPLATE_MISSING_INPUT: i32 = 32;

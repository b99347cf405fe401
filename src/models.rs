// src/models.rs

use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// --- PROJECT DEFINITION MODELS (What is read from `.project.yaml` files) ---

/// A discovered unit of work: a directory with named command pipelines.
///
/// `dir` is always stored root-relative with a leading `/` and is the unique
/// key for a project within a loaded batch.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct Project {
    /// Path to a definition file this project inherits from, relative to the
    /// project's own definition file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    /// Human readable identifier. Defaults to the last segment of `dir` if
    /// still empty once all loading has finished.
    #[serde(default)]
    pub name: String,

    /// Repository-relative directory of the project.
    #[serde(default, skip)]
    pub dir: String,

    /// Files/directories this project's build and version depend on.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Free-form labels. Matching is by exact string.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Named command pipelines relevant to this project.
    #[serde(default)]
    pub commands: BTreeMap<String, CommandPipeline>,

    /// Bidirectional dependency graph node, built after dependency
    /// resolution settles.
    #[serde(default, skip)]
    pub graph: ProjectGraph,
}

impl Project {
    /// Looks up a command pipeline and returns its steps in execution order.
    pub fn command_steps(&self, command: &str) -> Option<&[ProjectCommand]> {
        self.commands.get(command).map(CommandPipeline::steps)
    }
}

/// A project together with its resolved change version.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectWithVersion {
    pub project: Project,
    pub version: ProjectVersion,
}

/// One command name may map to a single step or an ordered sequence of
/// steps, all of which must succeed for the pipeline to succeed.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum CommandPipeline {
    Single(ProjectCommand),
    Sequence(Vec<ProjectCommand>),
}

impl CommandPipeline {
    pub fn steps(&self) -> &[ProjectCommand] {
        match self {
            Self::Single(step) => std::slice::from_ref(step),
            Self::Sequence(steps) => steps,
        }
    }
}

impl From<ProjectCommand> for CommandPipeline {
    fn from(step: ProjectCommand) -> Self {
        Self::Single(step)
    }
}

/// One step of a named command pipeline.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectCommand {
    /// Display label. Defaults to a rendering of `command` + `arguments`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The executable or shell command line. May embed `${{ ... }}` spans.
    pub command: String,

    /// Extra argv entries, each may embed `${{ ... }}` spans.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<String>>,

    /// Directory to run from, relative to the owning project's `dir`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,

    /// Run in the platform default shell (true), a specific shell program
    /// (path string), or spawn the command directly (false).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<ShellMode>,

    /// Expression evaluated against the run context before executing. A
    /// falsy (or failing) condition prevents the step from running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Status to assume when `condition` evaluates to false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_behaviour: Option<ConditionBehaviour>,

    /// Status to assume when the underlying process exits non-zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_behavior: Option<FailureBehavior>,
}

impl ProjectCommand {
    /// The label used in status transition messages.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        let arguments = self
            .arguments
            .iter()
            .flatten()
            .map(|a| format!(" \"{}\"", a.replace('"', "\\\"")))
            .collect::<String>();
        format!("`{}{}`", self.command, arguments)
    }

    pub fn condition_behaviour(&self) -> ConditionBehaviour {
        self.condition_behaviour.unwrap_or_default()
    }

    pub fn failure_behavior(&self) -> FailureBehavior {
        self.failure_behavior.unwrap_or_default()
    }
}

/// `shell: true` (default), `shell: false`, or a shell program path like
/// `/bin/bash`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ShellMode {
    Enabled(bool),
    Program(String),
}

impl Default for ShellMode {
    fn default() -> Self {
        Self::Enabled(true)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConditionBehaviour {
    #[default]
    Skip,
    Fail,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailureBehavior {
    #[default]
    Fail,
    Skip,
}

// --- DEPENDENCY GRAPH ---

/// A node in the project dependency graph. Edges are stored as directories
/// so the graph stays cheap to clone; two projects are connected iff one's
/// dependency entry equals the other's `dir` (case-insensitive).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectGraph {
    /// Directories of resolved dependency projects, sorted for determinism.
    pub dependencies: Vec<String>,
    /// Directories of projects which depend on this one (reverse edges).
    pub dependants: Vec<String>,
}

// --- VERSION MODELS ---

/// The resolved change-state of a project's dependency set.
///
/// `hash`/`hash_short` hold either a real commit id, a [`PathStatus`] name
/// when uncommitted changes touch the project, or `"uncommitted"` when no
/// history exists at all.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectVersion {
    pub hash: String,
    pub hash_short: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Human readable relative time, e.g. `3 days ago`, or `now`.
    pub ago: String,
    /// Changed paths, present only when uncommitted changes were detected.
    pub local_changes: Option<Vec<String>>,
}

/// Classification of an uncommitted change to a path. The derived order is
/// the "worst wins" priority: `untracked` > `unstaged` > `staged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PathStatus {
    Staged,
    Unstaged,
    Untracked,
}

impl PathStatus {
    /// Aggregates a set of statuses, returning the highest-priority one.
    /// An empty set defaults to `staged`.
    pub fn priority(statuses: impl IntoIterator<Item = Self>) -> Self {
        statuses.into_iter().max().unwrap_or(Self::Staged)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Staged => "staged",
            Self::Unstaged => "unstaged",
            Self::Untracked => "untracked",
        }
    }
}

impl fmt::Display for PathStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- EXECUTION STATUS ---

/// Per-project state machine for the currently executing command:
/// `pending -> running -> {success | failed | skipped}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectCommandStatus {
    Pending,
    Running,
    Skipped,
    Failed,
    Success,
}

impl ProjectCommandStatus {
    /// A settled project is no longer `pending` or `running`.
    pub fn is_settled(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Success => "success",
        }
    }

    /// Status word colored the way run output renders it.
    pub fn colored(self, text: &str) -> ColoredString {
        match self {
            Self::Pending => text.dimmed(),
            Self::Running => text.blue(),
            Self::Skipped => text.yellow(),
            Self::Failed => text.red(),
            Self::Success => text.green(),
        }
    }
}

impl fmt::Display for ProjectCommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- WORKSPACE CONFIGURATION ---

/// Root-level workspace configuration, read from the first of
/// `monorun.yaml`/`workspace.yaml` (or `.yml`) if present.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct WorkspaceConfiguration {
    /// Glob patterns matching files to offer to project loaders.
    /// `!`-prefixed entries are exclusions.
    #[serde(default = "WorkspaceConfiguration::default_sources")]
    pub sources: Vec<String>,
}

impl WorkspaceConfiguration {
    fn default_sources() -> Vec<String> {
        vec!["**/*".to_string()]
    }
}

impl Default for WorkspaceConfiguration {
    fn default() -> Self {
        Self {
            sources: Self::default_sources(),
        }
    }
}

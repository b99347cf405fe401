// src/core/repository.rs

use crate::models::{PathStatus, ProjectVersion};
use chrono::{DateTime, Utc};
use log::debug;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::OnceCell;

/// Sentinel version hash used when no commit history covers the paths.
pub const UNCOMMITTED: &str = "uncommitted";

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Failed to execute `git {command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`git {command}` exited with code {code}: {stderr}")]
    GitFailed {
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("Failed to parse `git {command}` output line: '{line}'")]
    Parse { command: String, line: String },
}

/// An uncommitted change reported by the working tree status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UncommittedPath {
    /// Root-relative path with a leading `/`.
    pub path: String,
    pub status: PathStatus,
}

/// Resolves project versions from repository change history.
///
/// All queries go through the `git` command line; a non-zero exit is fatal
/// for the run. The working tree status is queried once and cached.
#[derive(Debug)]
pub struct Repository {
    base_dir: PathBuf,
    uncommitted: OnceCell<Vec<UncommittedPath>>,
}

impl Repository {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            uncommitted: OnceCell::new(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// The set of currently uncommitted changes, loaded once per run.
    pub async fn uncommitted_changes(&self) -> Result<&[UncommittedPath], RepositoryError> {
        let changes = self
            .uncommitted
            .get_or_try_init(|| self.load_uncommitted_changes())
            .await?;
        Ok(changes)
    }

    async fn load_uncommitted_changes(&self) -> Result<Vec<UncommittedPath>, RepositoryError> {
        let stdout = self.run_git(&["status", "-s", "-unormal"]).await?;

        let changes = stdout
            .lines()
            .filter_map(parse_status_line)
            .collect::<Vec<_>>();
        debug!("Found {} uncommitted changes", changes.len());
        Ok(changes)
    }

    /// Resolves the most recent change version covering any of `paths`
    /// (root-relative entries with a leading `/`).
    ///
    /// Uncommitted changes win over history: if any uncommitted path is an
    /// ancestor or descendant of a queried path, the version reports the
    /// aggregated worst [`PathStatus`] instead of a commit hash.
    pub async fn get_latest_version(
        &self,
        paths: &[String],
    ) -> Result<ProjectVersion, RepositoryError> {
        let uncommitted = self.uncommitted_changes().await?;

        let matching: Vec<&UncommittedPath> = uncommitted
            .iter()
            .filter(|change| paths.iter().any(|p| super::paths::overlaps(&change.path, p)))
            .collect();

        if !matching.is_empty() {
            let status = PathStatus::priority(matching.iter().map(|c| c.status));
            return Ok(ProjectVersion {
                hash: status.to_string(),
                hash_short: status.to_string(),
                timestamp: Utc::now(),
                ago: "now".to_string(),
                local_changes: Some(matching.iter().map(|c| c.path.clone()).collect()),
            });
        }

        self.latest_commit_version(paths).await
    }

    async fn latest_commit_version(
        &self,
        paths: &[String],
    ) -> Result<ProjectVersion, RepositoryError> {
        // Tab-separated full hash, short hash and committer date.
        let mut args = vec![
            "log".to_string(),
            "-n".to_string(),
            "1".to_string(),
            "--format=%H%x09%h%x09%cI".to_string(),
            "--".to_string(),
        ];
        args.extend(paths.iter().map(|path| {
            let stripped = path.trim_start_matches('/');
            if stripped.is_empty() { ".".to_string() } else { stripped.to_string() }
        }));

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let stdout = self.run_git(&arg_refs).await?;

        let Some(line) = stdout.lines().next().filter(|l| !l.trim().is_empty()) else {
            // No commit touches these paths.
            return Ok(ProjectVersion {
                hash: UNCOMMITTED.to_string(),
                hash_short: UNCOMMITTED.to_string(),
                timestamp: Utc::now(),
                ago: "now".to_string(),
                local_changes: None,
            });
        };

        let mut fields = line.split('\t');
        let (Some(hash), Some(hash_short), Some(raw_timestamp)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(RepositoryError::Parse {
                command: "log".to_string(),
                line: line.to_string(),
            });
        };

        let timestamp = DateTime::parse_from_rfc3339(raw_timestamp)
            .map_err(|_| RepositoryError::Parse {
                command: "log".to_string(),
                line: line.to_string(),
            })?
            .with_timezone(&Utc);

        Ok(ProjectVersion {
            hash: hash.to_string(),
            hash_short: hash_short.to_string(),
            timestamp,
            ago: format_ago(timestamp, Utc::now()),
            local_changes: None,
        })
    }

    /// Lists root-relative paths changed in `from`, or between `from` and
    /// `to` when both are given.
    pub async fn get_changes(
        &self,
        from: &str,
        to: Option<&str>,
    ) -> Result<Vec<String>, RepositoryError> {
        let mut args = vec!["diff-tree", "--no-commit-id", "--name-only", "-r", from];
        if let Some(to) = to {
            args.push(to);
        }

        let stdout = self.run_git(&args).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| format!("/{line}"))
            .collect())
    }

    async fn run_git(&self, args: &[&str]) -> Result<String, RepositoryError> {
        let command_name = args.first().copied().unwrap_or_default().to_string();
        debug!("Running git {args:?} in '{}'", self.base_dir.display());

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.base_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| RepositoryError::Spawn {
                command: command_name.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(RepositoryError::GitFailed {
                command: command_name,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Maps one `git status -s` line to an uncommitted change.
///
/// Only a fixed set of two-character codes is recognised (`M ` staged,
/// `MM`/` M` unstaged, `??` untracked); any other code is ignored.
pub fn parse_status_line(line: &str) -> Option<UncommittedPath> {
    if line.len() < 4 {
        return None;
    }
    let code = line.get(0..2)?;
    let status = match code {
        "M " => PathStatus::Staged,
        "MM" | " M" => PathStatus::Unstaged,
        "??" => PathStatus::Untracked,
        _ => return None,
    };

    Some(UncommittedPath {
        path: format!("/{}", line.get(3..)?),
        status,
    })
}

/// Renders the elapsed time since `timestamp` as its single largest
/// non-zero calendar unit, e.g. `3 days ago` (never `3 days, 2 hours ago`).
pub fn format_ago(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(timestamp);
    let seconds = elapsed.num_seconds().max(0);

    const UNITS: &[(i64, &str)] = &[
        (365 * 24 * 3600, "year"),
        (30 * 24 * 3600, "month"),
        (7 * 24 * 3600, "week"),
        (24 * 3600, "day"),
        (3600, "hour"),
        (60, "minute"),
        (1, "second"),
    ];

    for &(unit_seconds, unit_name) in UNITS {
        let count = seconds / unit_seconds;
        if count > 0 {
            let plural = if count == 1 { "" } else { "s" };
            return format!("{count} {unit_name}{plural} ago");
        }
    }

    "now".to_string()
}

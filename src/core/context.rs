// src/core/context.rs
//
// Holds everything expressions and spawned processes can see: the process
// environment, `.env` file layers, `--context` parameters, project metadata
// and live run statuses. All name lookups here are case-insensitive.

use crate::core::evaluator::{ContextMap, Value};
use crate::core::paths;
use crate::models::{ProjectCommandStatus, ProjectWithVersion};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

lazy_static! {
    // `${VAR}` or `$VAR` references inside env file values.
    static ref ENV_REFERENCE: Regex =
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
            .expect("valid regex");
}

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("Invalid context parameter '{value}': expected key=value")]
    InvalidParameter { value: String },
    #[error("Failed to read env file '{path}': {source}")]
    ReadEnvFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// The environment and context-variable store for one run.
#[derive(Debug)]
pub struct ContextService {
    base_dir: PathBuf,
    process_env: Vec<(String, String)>,
    /// Discovered env files, shallowest directory first, then shortest file
    /// name first. Later files override earlier ones when layering.
    env_files: Vec<String>,
    file_vars: RwLock<HashMap<String, Vec<(String, String)>>>,
    parameters: RwLock<Vec<(String, String)>>,
    statuses: RwLock<Vec<(String, ProjectCommandStatus)>>,
    /// The fixed evaluation-context entries, built once per run.
    fixed: RwLock<Option<ContextMap>>,
}

impl ContextService {
    /// `env_files` are root-relative paths, typically found with
    /// [`crate::constants::ENV_FILE_GLOB`].
    pub fn new(base_dir: PathBuf, env_files: Vec<String>) -> Self {
        Self::with_process_env(base_dir, env_files, std::env::vars().collect())
    }

    pub fn with_process_env(
        base_dir: PathBuf,
        mut env_files: Vec<String>,
        process_env: Vec<(String, String)>,
    ) -> Self {
        env_files.sort_by(|a, b| {
            let depth = |f: &str| f.matches('/').count();
            depth(a).cmp(&depth(b)).then(a.len().cmp(&b.len()))
        });

        Self {
            base_dir,
            process_env,
            env_files,
            file_vars: RwLock::new(HashMap::new()),
            parameters: RwLock::new(Vec::new()),
            statuses: RwLock::new(Vec::new()),
            fixed: RwLock::new(None),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    // --- CONTEXT PARAMETERS ---

    /// Parses `key=value` parameters from the command line. Later values
    /// replace earlier ones with the same key.
    pub fn set_parameters<S: AsRef<str>>(&self, values: &[S]) -> Result<(), ContextError> {
        let mut parameters = self
            .parameters
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for value in values {
            let value = value.as_ref();
            let Some((key, parameter)) = value.split_once('=') else {
                return Err(ContextError::InvalidParameter {
                    value: value.to_string(),
                });
            };
            upsert(&mut parameters, key, parameter.to_string());
        }
        Ok(())
    }

    // --- PROJECT STATUSES ---

    pub fn set_status(&self, project_name: &str, status: ProjectCommandStatus) {
        let mut statuses = self.statuses.write().unwrap_or_else(PoisonError::into_inner);
        upsert(&mut statuses, project_name, status);
    }

    pub fn get_status(&self, project_name: &str) -> Option<ProjectCommandStatus> {
        let statuses = self.statuses.read().unwrap_or_else(PoisonError::into_inner);
        lookup(&statuses, project_name).copied()
    }

    // --- ENV FILE LAYERING ---

    /// The env files applying to a project directory: every `.env` on the
    /// path from the repository root down to `dir`, plus `.{command}.env`
    /// files on the same path when a command scope is given.
    fn env_files_for_dir(&self, dir: &str, command: Option<&str>) -> Vec<&str> {
        let ancestry = paths::ancestry(dir);
        let scoped_name = command.map(|c| format!(".{c}.env"));

        self.env_files
            .iter()
            .map(String::as_str)
            .filter(|file| {
                let file_dir = paths::parent(file);
                let name = paths::base_name(file);
                let in_scope = name.eq_ignore_ascii_case(".env")
                    || scoped_name
                        .as_deref()
                        .is_some_and(|scoped| name.eq_ignore_ascii_case(scoped));
                in_scope && ancestry.iter().any(|d| d.eq_ignore_ascii_case(&file_dir))
            })
            .collect()
    }

    fn raw_file_vars(&self, file: &str) -> Result<Vec<(String, String)>, ContextError> {
        {
            let cache = self.file_vars.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(vars) = cache.get(file) {
                return Ok(vars.clone());
            }
        }

        let path = paths::to_file_path(&self.base_dir, file);
        let content = std::fs::read_to_string(&path).map_err(|source| {
            ContextError::ReadEnvFile {
                path: file.to_string(),
                source,
            }
        })?;
        let vars = parse_env_content(&content);

        let mut cache = self.file_vars.write().unwrap_or_else(PoisonError::into_inner);
        cache.insert(file.to_string(), vars.clone());
        Ok(vars)
    }

    /// Layers env files onto `base` for a directory and command scope, then
    /// expands `${VAR}` references against the merged set. The process
    /// environment is not consulted during expansion.
    fn env_vars_for_dir(
        &self,
        dir: &str,
        command: Option<&str>,
        base: Vec<(String, String)>,
    ) -> Result<Vec<(String, String)>, ContextError> {
        let mut merged = base;

        {
            let parameters = self.parameters.read().unwrap_or_else(PoisonError::into_inner);
            for (key, value) in parameters.iter() {
                upsert(
                    &mut merged,
                    &format!("CONTEXT_{}", key.to_uppercase()),
                    value.clone(),
                );
            }
        }

        for file in self.env_files_for_dir(dir, command) {
            debug!("Layering env file '{file}' for '{dir}'");
            for (key, value) in self.raw_file_vars(file)? {
                upsert(&mut merged, &key, value);
            }
        }

        Ok(expand_env_vars(merged))
    }

    /// The full extra environment for running a command in `project`:
    /// synthetic variables, `CONTEXT_*` parameters and env file layers.
    /// Callers merge this over the process environment when spawning.
    pub fn project_environment(
        &self,
        project: &ProjectWithVersion,
        command: Option<&str>,
    ) -> Result<Vec<(String, String)>, ContextError> {
        let project_dir = paths::to_file_path(&self.base_dir, &project.project.dir);
        let base = vec![
            (
                "REPOSITORY_DIR".to_string(),
                self.base_dir.display().to_string(),
            ),
            ("PROJECT_NAME".to_string(), project.project.name.clone()),
            ("PROJECT_DIR".to_string(), project_dir.display().to_string()),
            ("PROJECT_VERSION".to_string(), project.version.hash.clone()),
            (
                "PROJECT_VERSION_SHORT".to_string(),
                project.version.hash_short.clone(),
            ),
        ];
        self.env_vars_for_dir(&project.project.dir, command, base)
    }

    // --- EVALUATION CONTEXTS ---

    /// The base evaluation context: `env`, `os`, `projects`, `status`,
    /// `context` and the `ProjectCommandStatus` name constants. The fixed
    /// entries are built once per service; `status` and `context` reflect
    /// the live maps on every call.
    pub fn context(&self, projects: &[ProjectWithVersion]) -> Result<ContextMap, ContextError> {
        let mut context = self.fixed_context(projects)?;

        let status_map: ContextMap = {
            let statuses = self.statuses.read().unwrap_or_else(PoisonError::into_inner);
            statuses
                .iter()
                .map(|(name, status)| (name.clone(), Value::from(status.as_str())))
                .collect()
        };

        let parameter_map: ContextMap = {
            let parameters = self.parameters.read().unwrap_or_else(PoisonError::into_inner);
            parameters
                .iter()
                .map(|(key, value)| (key.clone(), Value::from(value.clone())))
                .collect()
        };

        context.insert("status", Value::Map(status_map));
        context.insert("context", Value::Map(parameter_map));
        Ok(context)
    }

    fn fixed_context(&self, projects: &[ProjectWithVersion]) -> Result<ContextMap, ContextError> {
        {
            let cached = self.fixed.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(fixed) = cached.as_ref() {
                return Ok(fixed.clone());
            }
        }

        let mut env: ContextMap = self
            .process_env
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.clone())))
            .collect();

        // A root-level `.env` is visible in the base context, unexpanded.
        if let Some(root_env) = self
            .env_files
            .iter()
            .find(|f| f.eq_ignore_ascii_case("/.env"))
        {
            for (key, value) in self.raw_file_vars(&root_env.clone())? {
                env.insert(key, Value::from(value));
            }
        }

        let project_map: ContextMap = projects
            .iter()
            .map(|p| (p.project.name.clone(), project_value(p)))
            .collect();

        let status_names: ContextMap = [
            ProjectCommandStatus::Pending,
            ProjectCommandStatus::Running,
            ProjectCommandStatus::Skipped,
            ProjectCommandStatus::Failed,
            ProjectCommandStatus::Success,
        ]
        .into_iter()
        .map(|status| (status.as_str(), Value::from(status.as_str())))
        .collect();

        let fixed: ContextMap = [
            ("env", Value::Map(env)),
            ("os", Value::from(std::env::consts::OS)),
            ("projects", Value::Map(project_map)),
            ("ProjectCommandStatus", Value::Map(status_names)),
        ]
        .into_iter()
        .collect();

        let mut cached = self.fixed.write().unwrap_or_else(PoisonError::into_inner);
        Ok(cached.get_or_insert(fixed).clone())
    }

    /// The base context scoped to one project: `env` gains the project's
    /// layered environment and the project's own fields become top-level
    /// bindings (`name`, `dir`, `version`, ...).
    pub fn project_context(
        &self,
        projects: &[ProjectWithVersion],
        project: &ProjectWithVersion,
        command: Option<&str>,
    ) -> Result<ContextMap, ContextError> {
        let mut context = self.context(projects)?;

        let mut env: ContextMap = self
            .process_env
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.clone())))
            .collect();
        for (key, value) in self.project_environment(project, command)? {
            env.insert(key, Value::from(value));
        }
        context.insert("env", Value::Map(env));

        if let Value::Map(fields) = project_value(project) {
            for (key, value) in fields.iter() {
                context.insert(key, value.clone());
            }
        }
        Ok(context)
    }
}

/// Replaces an entry by case-insensitive key, or appends a new one.
fn upsert<T>(entries: &mut Vec<(String, T)>, key: &str, value: T) {
    if let Some(entry) = entries.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
        entry.1 = value;
    } else {
        entries.push((key.to_string(), value));
    }
}

fn lookup<'a, T>(entries: &'a [(String, T)], key: &str) -> Option<&'a T> {
    if let Some((_, value)) = entries.iter().find(|(k, _)| k == key) {
        return Some(value);
    }
    entries
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, value)| value)
}

/// The evaluation-context rendering of a project: its definition fields plus
/// a `version` object with camelCase keys.
fn project_value(project: &ProjectWithVersion) -> Value {
    let version = &project.version;
    let local_changes = version
        .local_changes
        .as_ref()
        .map(|changes| Value::List(changes.iter().map(|c| Value::from(c.clone())).collect()))
        .unwrap_or(Value::Null);

    let version_map: ContextMap = [
        ("hash", Value::from(version.hash.clone())),
        ("hashShort", Value::from(version.hash_short.clone())),
        ("timestamp", Value::from(version.timestamp.to_rfc3339())),
        ("ago", Value::from(version.ago.clone())),
        ("localChanges", local_changes),
    ]
    .into_iter()
    .collect();

    let list = |items: &[String]| {
        Value::List(items.iter().map(|i| Value::from(i.clone())).collect())
    };

    Value::Map(
        [
            ("name", Value::from(project.project.name.clone())),
            ("dir", Value::from(project.project.dir.clone())),
            ("dependencies", list(&project.project.dependencies)),
            ("tags", list(&project.project.tags)),
            ("version", Value::Map(version_map)),
        ]
        .into_iter()
        .collect(),
    )
}

/// Minimal `.env` syntax: `KEY=value` lines, `#` comments, optional `export`
/// prefix, single or double quotes. Unquoted values lose trailing comments.
fn parse_env_content(content: &str) -> Vec<(String, String)> {
    let mut vars = Vec::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line).trim_start();
        let Some((key, raw_value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }

        let raw_value = raw_value.trim();
        let value = if (raw_value.starts_with('"') && raw_value.ends_with('"')
            || raw_value.starts_with('\'') && raw_value.ends_with('\''))
            && raw_value.len() >= 2
        {
            raw_value[1..raw_value.len() - 1].to_string()
        } else {
            match raw_value.find(" #") {
                Some(index) => raw_value[..index].trim().to_string(),
                None => raw_value.to_string(),
            }
        };

        upsert(&mut vars, key, value);
    }
    vars
}

/// Expands `${VAR}`/`$VAR` references against the merged variable set only.
/// Unresolvable references expand to the empty string.
fn expand_env_vars(merged: Vec<(String, String)>) -> Vec<(String, String)> {
    let mut expanded: Vec<(String, String)> = Vec::with_capacity(merged.len());

    for (key, value) in &merged {
        let resolved = ENV_REFERENCE
            .replace_all(value, |captures: &regex::Captures<'_>| {
                let name = captures
                    .get(1)
                    .or_else(|| captures.get(2))
                    .map_or("", |m| m.as_str());
                // Prefer already-expanded values, fall back to raw ones.
                expanded
                    .iter()
                    .chain(merged.iter())
                    .find(|(k, _)| k == name)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default()
            })
            .into_owned();
        expanded.push((key.clone(), resolved));
    }
    expanded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Project, ProjectVersion};
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    fn service(repo: &TempDir, env_files: Vec<&str>) -> ContextService {
        ContextService::with_process_env(
            repo.path().to_path_buf(),
            env_files.into_iter().map(String::from).collect(),
            vec![("PATH".to_string(), "/usr/bin".to_string())],
        )
    }

    fn project(name: &str, dir: &str) -> ProjectWithVersion {
        ProjectWithVersion {
            project: Project {
                name: name.to_string(),
                dir: dir.to_string(),
                ..Default::default()
            },
            version: ProjectVersion {
                hash: "abcdef1234".to_string(),
                hash_short: "abcdef".to_string(),
                timestamp: Utc::now(),
                ago: "now".to_string(),
                local_changes: None,
            },
        }
    }

    #[test]
    fn parses_and_looks_up_parameters_case_insensitively() {
        let repo = TempDir::new().unwrap();
        let service = service(&repo, vec![]);
        service.set_parameters(&["Key=value", "other=x"]).unwrap();

        let context = service.context(&[]).unwrap();
        let Some(Value::Map(params)) = context.get("context").cloned() else {
            panic!("expected context map");
        };
        assert_eq!(params.get("KEY"), Some(&Value::from("value")));
        assert_eq!(params.get("Key"), Some(&Value::from("value")));
    }

    #[test]
    fn rejects_parameters_without_equals() {
        let repo = TempDir::new().unwrap();
        let service = service(&repo, vec![]);
        assert!(matches!(
            service.set_parameters(&["novalue"]),
            Err(ContextError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn status_lookup_is_case_insensitive() {
        let repo = TempDir::new().unwrap();
        let service = service(&repo, vec![]);

        service.set_status("Project1", ProjectCommandStatus::Running);
        assert_eq!(
            service.get_status("project1"),
            Some(ProjectCommandStatus::Running)
        );

        service.set_status("PROJECT1", ProjectCommandStatus::Success);
        assert_eq!(
            service.get_status("Project1"),
            Some(ProjectCommandStatus::Success)
        );
    }

    #[test]
    fn layers_env_files_deepest_last() {
        // --- Setup ---
        let repo = TempDir::new().unwrap();
        fs::write(repo.path().join(".env"), "A=root\nB=root\n").unwrap();
        fs::create_dir_all(repo.path().join("svc")).unwrap();
        fs::write(repo.path().join("svc/.env"), "B=svc\n").unwrap();
        let service = service(&repo, vec!["/.env", "/svc/.env"]);

        // --- Execute ---
        let vars = service
            .env_vars_for_dir("/svc", None, Vec::new())
            .unwrap();

        // --- Assert ---
        assert!(vars.contains(&("A".to_string(), "root".to_string())));
        assert!(vars.contains(&("B".to_string(), "svc".to_string())));
    }

    #[test]
    fn command_scoped_env_overrides_generic() {
        let repo = TempDir::new().unwrap();
        fs::create_dir_all(repo.path().join("svc")).unwrap();
        fs::write(repo.path().join("svc/.env"), "MODE=generic\n").unwrap();
        fs::write(repo.path().join("svc/.build.env"), "MODE=build\n").unwrap();
        let service = service(&repo, vec!["/svc/.env", "/svc/.build.env"]);

        let generic = service.env_vars_for_dir("/svc", None, Vec::new()).unwrap();
        assert!(generic.contains(&("MODE".to_string(), "generic".to_string())));

        let scoped = service
            .env_vars_for_dir("/svc", Some("build"), Vec::new())
            .unwrap();
        assert!(scoped.contains(&("MODE".to_string(), "build".to_string())));

        let other = service
            .env_vars_for_dir("/svc", Some("test"), Vec::new())
            .unwrap();
        assert!(other.contains(&("MODE".to_string(), "generic".to_string())));
    }

    #[test]
    fn env_files_outside_ancestry_do_not_apply() {
        let repo = TempDir::new().unwrap();
        fs::create_dir_all(repo.path().join("other")).unwrap();
        fs::write(repo.path().join("other/.env"), "X=other\n").unwrap();
        let service = service(&repo, vec!["/other/.env"]);

        let vars = service.env_vars_for_dir("/svc", None, Vec::new()).unwrap();
        assert!(!vars.iter().any(|(k, _)| k == "X"));
    }

    #[test]
    fn expands_references_between_layers() {
        let repo = TempDir::new().unwrap();
        fs::write(repo.path().join(".env"), "HOST=localhost\n").unwrap();
        fs::create_dir_all(repo.path().join("svc")).unwrap();
        fs::write(repo.path().join("svc/.env"), "URL=http://${HOST}:8080\n").unwrap();
        let service = service(&repo, vec!["/.env", "/svc/.env"]);

        let vars = service.env_vars_for_dir("/svc", None, Vec::new()).unwrap();
        assert!(vars.contains(&("URL".to_string(), "http://localhost:8080".to_string())));
    }

    #[test]
    fn unresolved_references_expand_to_empty() {
        let vars = expand_env_vars(vec![("A".to_string(), "x${MISSING}y".to_string())]);
        assert_eq!(vars, vec![("A".to_string(), "xy".to_string())]);
    }

    #[test]
    fn project_environment_includes_synthetic_vars() {
        let repo = TempDir::new().unwrap();
        let service = service(&repo, vec![]);
        service.set_parameters(&["stage=dev"]).unwrap();
        let project = project("Svc", "/svc");

        let vars = service.project_environment(&project, Some("build")).unwrap();

        let get = |key: &str| {
            vars.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("PROJECT_NAME"), Some("Svc"));
        assert_eq!(get("PROJECT_VERSION"), Some("abcdef1234"));
        assert_eq!(get("PROJECT_VERSION_SHORT"), Some("abcdef"));
        assert_eq!(get("CONTEXT_STAGE"), Some("dev"));
        assert!(get("REPOSITORY_DIR").is_some());
        assert!(get("PROJECT_DIR").is_some());
    }

    #[test]
    fn project_context_exposes_project_fields() {
        let repo = TempDir::new().unwrap();
        let service = service(&repo, vec![]);
        let projects = vec![project("Svc", "/svc")];

        let context = service
            .project_context(&projects, &projects[0], None)
            .unwrap();

        assert_eq!(context.get("name"), Some(&Value::from("Svc")));
        assert_eq!(context.get("dir"), Some(&Value::from("/svc")));
        let Some(Value::Map(version)) = context.get("version") else {
            panic!("expected version map");
        };
        assert_eq!(version.get("hashShort"), Some(&Value::from("abcdef")));
    }

    #[test]
    fn fixed_context_entries_are_built_once() {
        // --- Setup ---
        let repo = TempDir::new().unwrap();
        let service = service(&repo, vec![]);
        let projects = vec![project("Svc", "/svc")];
        service.context(&projects).unwrap();

        // --- Execute ---
        // Later calls reuse the fixed part even with a different list.
        let reused = service.context(&[]).unwrap();

        // --- Assert ---
        let Some(Value::Map(map)) = reused.get("projects") else {
            panic!("expected projects map");
        };
        assert!(map.get("Svc").is_some());

        // Dynamic entries still refresh on every call.
        service.set_status("Svc", ProjectCommandStatus::Running);
        let refreshed = service.context(&projects).unwrap();
        let Some(Value::Map(status)) = refreshed.get("status") else {
            panic!("expected status map");
        };
        assert_eq!(status.get("Svc"), Some(&Value::from("running")));
    }

    #[test]
    fn base_context_projects_are_case_insensitive() {
        let repo = TempDir::new().unwrap();
        let service = service(&repo, vec![]);
        let projects = vec![project("Svc", "/svc")];

        let context = service.context(&projects).unwrap();
        let Some(Value::Map(map)) = context.get("projects") else {
            panic!("expected projects map");
        };
        assert!(map.get("svc").is_some());
        assert!(map.get("SVC").is_some());
    }

    #[test]
    fn parse_env_content_handles_quotes_and_comments() {
        let vars = parse_env_content(
            "# comment\nA=1\nexport B=\"two words\"\nC='$literal'\nD=value # trailing\n\n",
        );
        assert_eq!(
            vars,
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "two words".to_string()),
                ("C".to_string(), "$literal".to_string()),
                ("D".to_string(), "value".to_string()),
            ]
        );
    }
}

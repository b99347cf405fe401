// src/core/loaders/cargo.rs

use super::{LoadError, ProjectLoader};
use crate::core::paths;
use crate::core::processors::{ProjectMetadata, ProjectMetadataHandler};
use crate::models::{CommandPipeline, Project, ProjectCommand};
use log::warn;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Turns Cargo packages into projects without requiring any definition file,
/// and doubles as the metadata handler enriching definition-file projects
/// whose directory carries a manifest.
///
/// A package's dependencies are the directories of its `path = "..."`
/// dependency entries, followed transitively from manifest to manifest, plus
/// the root workspace manifest and any `.cargo/config.toml` overrides on the
/// path down to the package. Workspace-only (virtual) manifests are skipped.
#[derive(Debug, Default)]
pub struct CargoManifestLoader {
    // Path-dependency dirs per manifest file, so shared path deps are only
    // parsed once per run.
    path_deps: Mutex<BTreeMap<String, Vec<String>>>,
}

#[derive(serde::Deserialize)]
struct Manifest {
    package: Option<PackageSection>,
    #[serde(default)]
    dependencies: toml::Table,
    #[serde(rename = "dev-dependencies", default)]
    dev_dependencies: toml::Table,
    #[serde(rename = "build-dependencies", default)]
    build_dependencies: toml::Table,
}

#[derive(serde::Deserialize)]
struct PackageSection {
    name: Option<toml::Value>,
    edition: Option<toml::Value>,
}

impl CargoManifestLoader {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_manifest(&self, base_dir: &Path, file: &str) -> Result<Manifest, LoadError> {
        let path = paths::to_file_path(base_dir, file);
        let content = std::fs::read_to_string(&path).map_err(|source| LoadError::Io {
            path: file.to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| LoadError::Toml {
            path: file.to_string(),
            source,
        })
    }

    /// Directories of `path` dependencies declared in `file`, root-relative.
    /// Results are memoized; unreadable manifests contribute nothing.
    fn path_dependency_dirs(&self, base_dir: &Path, file: &str) -> Vec<String> {
        {
            let cache = self.path_deps.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(dirs) = cache.get(file) {
                return dirs.clone();
            }
        }

        let dirs = match self.read_manifest(base_dir, file) {
            Ok(manifest) => {
                let dir = paths::parent(file);
                manifest
                    .dependency_paths()
                    .map(|p| paths::resolve_relative_to(&dir, p))
                    .collect()
            }
            Err(error) => {
                warn!("Skipping unreadable manifest '{file}': {error}");
                Vec::new()
            }
        };

        let mut cache = self.path_deps.lock().unwrap_or_else(PoisonError::into_inner);
        cache.insert(file.to_string(), dirs.clone());
        dirs
    }

    /// The metadata a package manifest contributes. `None` for virtual
    /// workspace manifests.
    fn package_metadata(
        &self,
        base_dir: &Path,
        file: &str,
    ) -> Result<Option<ProjectMetadata>, LoadError> {
        let manifest = self.read_manifest(base_dir, file)?;
        let Some(package) = &manifest.package else {
            return Ok(None);
        };

        let dir = paths::parent(file);
        let name = package
            .name
            .as_ref()
            .and_then(toml::Value::as_str)
            .map(str::to_string);
        let edition = package.edition.as_ref().and_then(toml::Value::as_str);

        // Direct path dependencies, then everything they pull in.
        let mut dependencies: Vec<String> = Vec::new();
        let mut queue: Vec<String> = manifest
            .dependency_paths()
            .map(|p| paths::resolve_relative_to(&dir, p))
            .collect();
        while let Some(dep_dir) = queue.pop() {
            if dep_dir.eq_ignore_ascii_case(&dir)
                || dependencies.iter().any(|d| d.eq_ignore_ascii_case(&dep_dir))
            {
                continue;
            }
            let dep_manifest = format!("{}/Cargo.toml", dep_dir.trim_end_matches('/'));
            if paths::to_file_path(base_dir, &dep_manifest).is_file() {
                queue.extend(self.path_dependency_dirs(base_dir, &dep_manifest));
            }
            dependencies.push(dep_dir);
        }

        // Changes to the workspace manifest or cargo config also invalidate
        // the package, so they join the watched set.
        if dir != "/" && base_dir.join("Cargo.toml").is_file() {
            dependencies.push("/Cargo.toml".to_string());
        }
        for ancestor in paths::ancestry(&dir) {
            for name in [".cargo/config.toml", ".cargo/config"] {
                let candidate = paths::resolve_relative_to(&ancestor, name);
                if paths::to_file_path(base_dir, &candidate).is_file() {
                    dependencies.push(candidate);
                }
            }
        }

        let command = |line: &str| {
            CommandPipeline::from(ProjectCommand {
                command: line.to_string(),
                ..Default::default()
            })
        };
        let commands: BTreeMap<String, CommandPipeline> = [
            ("check", command("cargo check")),
            ("build", command("cargo build")),
            ("test", command("cargo test")),
            ("package", command("cargo package")),
        ]
        .into_iter()
        .map(|(name, pipeline)| (name.to_string(), pipeline))
        .collect();

        let mut tags = vec!["loader:cargo".to_string()];
        if let Some(edition) = edition {
            tags.push(format!("edition:{edition}"));
        }

        Ok(Some(ProjectMetadata {
            name,
            dependencies,
            tags,
            commands,
        }))
    }
}

impl Manifest {
    fn dependency_paths(&self) -> impl Iterator<Item = &str> {
        [&self.dependencies, &self.dev_dependencies, &self.build_dependencies]
            .into_iter()
            .flat_map(|table| table.values())
            .filter_map(|entry| entry.get("path").and_then(toml::Value::as_str))
    }
}

impl ProjectLoader for CargoManifestLoader {
    fn include(&self) -> &str {
        "**/Cargo.toml"
    }

    fn load_project(&self, base_dir: &Path, file: &str) -> Result<Option<Project>, LoadError> {
        let Some(metadata) = self.package_metadata(base_dir, file)? else {
            // Virtual workspace manifest.
            return Ok(None);
        };

        Ok(Some(Project {
            extends: None,
            name: metadata.name.unwrap_or_default(),
            dir: paths::parent(file),
            dependencies: metadata.dependencies,
            tags: metadata.tags,
            commands: metadata.commands,
            graph: Default::default(),
        }))
    }
}

impl ProjectMetadataHandler for CargoManifestLoader {
    fn file_pattern(&self) -> &str {
        "Cargo.toml"
    }

    fn load_metadata(&self, base_dir: &Path, file: &str) -> Result<ProjectMetadata, LoadError> {
        Ok(self.package_metadata(base_dir, file)?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(repo: &TempDir, file: &str, content: &str) {
        let path = repo.path().join(file);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn loads_a_package_manifest() {
        // --- Setup ---
        let repo = TempDir::new().unwrap();
        write(
            &repo,
            "svc/Cargo.toml",
            "[package]\nname = \"svc\"\nedition = \"2024\"\n\n[dependencies]\nserde = \"1\"\n",
        );
        let loader = CargoManifestLoader::new();

        // --- Execute ---
        let project = loader
            .load_project(repo.path(), "/svc/Cargo.toml")
            .unwrap()
            .unwrap();

        // --- Assert ---
        assert_eq!(project.name, "svc");
        assert_eq!(project.dir, "/svc");
        assert!(project.tags.contains(&"loader:cargo".to_string()));
        assert!(project.tags.contains(&"edition:2024".to_string()));
        for command in ["check", "build", "test", "package"] {
            assert!(project.commands.contains_key(command), "missing {command}");
        }
    }

    #[test]
    fn skips_virtual_workspace_manifests() {
        let repo = TempDir::new().unwrap();
        write(&repo, "Cargo.toml", "[workspace]\nmembers = [\"svc\"]\n");
        let loader = CargoManifestLoader::new();

        assert!(loader.load_project(repo.path(), "/Cargo.toml").unwrap().is_none());
    }

    #[test]
    fn follows_path_dependencies_transitively() {
        let repo = TempDir::new().unwrap();
        write(
            &repo,
            "app/Cargo.toml",
            "[package]\nname = \"app\"\n\n[dependencies]\nmid = { path = \"../mid\" }\n",
        );
        write(
            &repo,
            "mid/Cargo.toml",
            "[package]\nname = \"mid\"\n\n[dependencies]\nleaf = { path = \"../leaf\" }\n",
        );
        write(&repo, "leaf/Cargo.toml", "[package]\nname = \"leaf\"\n");
        let loader = CargoManifestLoader::new();

        let project = loader
            .load_project(repo.path(), "/app/Cargo.toml")
            .unwrap()
            .unwrap();

        assert!(project.dependencies.contains(&"/mid".to_string()));
        assert!(project.dependencies.contains(&"/leaf".to_string()));
    }

    #[test]
    fn workspace_manifest_and_cargo_config_are_watched() {
        let repo = TempDir::new().unwrap();
        write(&repo, "Cargo.toml", "[workspace]\nmembers = [\"svc\"]\n");
        write(&repo, ".cargo/config.toml", "[build]\n");
        write(&repo, "svc/Cargo.toml", "[package]\nname = \"svc\"\n");
        let loader = CargoManifestLoader::new();

        let project = loader
            .load_project(repo.path(), "/svc/Cargo.toml")
            .unwrap()
            .unwrap();

        assert!(project.dependencies.contains(&"/Cargo.toml".to_string()));
        assert!(project.dependencies.contains(&"/.cargo/config.toml".to_string()));
    }

    #[test]
    fn dev_and_build_dependencies_count() {
        let repo = TempDir::new().unwrap();
        write(
            &repo,
            "svc/Cargo.toml",
            "[package]\nname = \"svc\"\n\n[dev-dependencies]\nhelpers = { path = \"../helpers\" }\n",
        );
        let loader = CargoManifestLoader::new();

        let project = loader
            .load_project(repo.path(), "/svc/Cargo.toml")
            .unwrap()
            .unwrap();
        assert!(project.dependencies.contains(&"/helpers".to_string()));
    }
}

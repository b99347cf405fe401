// src/core/paths.rs

use std::path::{Path, PathBuf};

/// Walks upward from `start` looking for a directory containing `.git`.
/// Returns `None` when no enclosing repository exists.
pub fn find_repository_root(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(".git").exists() {
            return Some(dunce::simplified(&dir).to_path_buf());
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Normalizes a repository path to the canonical root-relative form: forward
/// slashes, a single leading `/`, no `.`/`..` segments and no trailing slash.
///
/// `"."` and `""` normalize to `/`, the repository root itself.
pub fn normalize(path: &str) -> String {
    let unified = path.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();

    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    format!("/{}", segments.join("/"))
}

/// Resolves `relative` against a project's root-relative `dir`. Entries that
/// are already root-relative (leading `/` or `\`) are normalized as-is.
pub fn resolve_relative_to(dir: &str, relative: &str) -> String {
    if relative.starts_with('/') || relative.starts_with('\\') {
        normalize(relative)
    } else {
        normalize(&format!("{dir}/{relative}"))
    }
}

/// Converts a root-relative path back to a filesystem path under `base_dir`.
pub fn to_file_path(base_dir: &Path, root_relative: &str) -> PathBuf {
    base_dir.join(root_relative.trim_start_matches(['/', '\\']))
}

/// The parent of a root-relative path (`/a/b` -> `/a`, `/a` -> `/`).
pub fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(index) => path[..index].to_string(),
    }
}

/// The last segment of a root-relative path, used to default project names.
pub fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// String-prefix test in both directions: true when one path is an ancestor
/// or descendant of the other.
pub fn overlaps(left: &str, right: &str) -> bool {
    left.starts_with(right) || right.starts_with(left)
}

/// Every ancestor directory of `dir` from the root down, including `dir`
/// itself (`/a/b` -> `["/", "/a", "/a/b"]`).
pub fn ancestry(dir: &str) -> Vec<String> {
    let mut dirs = vec!["/".to_string()];
    let mut current = String::new();
    for segment in dir.trim_matches('/').split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        dirs.push(current.clone());
    }
    dirs
}

// src/system/glob.rs

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use log::trace;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GlobError {
    #[error("Invalid glob pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
    #[error("Failed while scanning the repository: {0}")]
    Walk(#[from] ignore::Error),
}

/// Compiled include/exclude matcher over root-relative paths.
///
/// Patterns are matched case-insensitively; `!`-prefixed patterns exclude.
/// Matching ignores the canonical leading `/` of repository paths.
#[derive(Debug)]
pub struct FileMatcher {
    includes: GlobSet,
    excludes: GlobSet,
}

impl FileMatcher {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, GlobError> {
        let mut includes = GlobSetBuilder::new();
        let mut excludes = GlobSetBuilder::new();

        for pattern in patterns {
            let pattern = pattern.as_ref();
            let (builder, glob_text) = match pattern.strip_prefix('!') {
                Some(negated) => (&mut excludes, negated),
                None => (&mut includes, pattern),
            };
            let glob = GlobBuilder::new(glob_text.trim_start_matches('/'))
                .case_insensitive(true)
                .literal_separator(true)
                .build()
                .map_err(|source| GlobError::Pattern {
                    pattern: pattern.to_string(),
                    source,
                })?;
            builder.add(glob);
        }

        Ok(Self {
            includes: includes.build().map_err(|source| GlobError::Pattern {
                pattern: "<set>".to_string(),
                source,
            })?,
            excludes: excludes.build().map_err(|source| GlobError::Pattern {
                pattern: "<set>".to_string(),
                source,
            })?,
        })
    }

    pub fn is_match(&self, root_relative: &str) -> bool {
        let candidate = root_relative.trim_start_matches('/');
        self.includes.is_match(candidate) && !self.excludes.is_match(candidate)
    }
}

/// Finds all files under `base_dir` matching `patterns`, honoring
/// `.gitignore` rules along the way. Hidden files are included; the `.git`
/// directory itself is not.
///
/// Returns root-relative paths with a leading `/`, sorted for determinism.
pub fn find_files<S: AsRef<str>>(base_dir: &Path, patterns: &[S]) -> Result<Vec<String>, GlobError> {
    let matcher = FileMatcher::new(patterns)?;
    let mut found = Vec::new();

    let walk = WalkBuilder::new(base_dir)
        .hidden(false)
        .require_git(false)
        .filter_entry(|entry| entry.file_name() != ".git")
        .build();

    for entry in walk {
        let entry = entry?;
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(base_dir) else {
            continue;
        };
        let candidate = relative.to_string_lossy().replace('\\', "/");
        if matcher.is_match(&candidate) {
            trace!("Matched '{candidate}'");
            found.push(format!("/{candidate}"));
        }
    }

    found.sort();
    Ok(found)
}

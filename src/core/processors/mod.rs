// src/core/processors/mod.rs
//
// Batch transformations applied to freshly loaded projects. Processors are
// ordered by explicit before/after constraints first, then by phase.

pub mod extend;
pub mod finalize;
pub mod flatten;
pub mod graph;
pub mod merge;
pub mod metadata;
pub mod resolve;

use crate::core::loaders::{CargoManifestLoader, LoadError};
use crate::models::Project;
use crate::system::glob::GlobError;
use std::cmp::Ordering;
use std::path::Path;
use thiserror::Error;

pub use extend::ExtendProject;
pub use finalize::FinalizeDefinition;
pub use flatten::FlattenDependencies;
pub use graph::GraphDependencies;
pub use merge::MergeProjects;
pub use metadata::{LoadMetadata, ProjectMetadata, ProjectMetadataHandler};
pub use resolve::ResolveDependencies;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Dependency cycle detected: {chain}")]
    DependencyCycle { chain: String },
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Glob(#[from] GlobError),
}

/// Relative position of a processor within the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Phase {
    First,
    Start,
    #[default]
    Middle,
    End,
    Last,
}

pub trait ProjectProcessor {
    /// Stable identifier other processors reference in before/after.
    fn name(&self) -> &'static str;

    fn phase(&self) -> Phase {
        Phase::default()
    }

    /// Names of processors this one must run before.
    fn before(&self) -> &[&'static str] {
        &[]
    }

    /// Names of processors this one must run after.
    fn after(&self) -> &[&'static str] {
        &[]
    }

    fn process_batch(&self, projects: Vec<Project>) -> Result<Vec<Project>, ProcessError>;
}

/// The standard pipeline in declaration order; actual execution order comes
/// from [`sort_processors`].
pub fn default_processors(base_dir: &Path) -> Vec<Box<dyn ProjectProcessor>> {
    vec![
        Box::new(MergeProjects),
        Box::new(ExtendProject::new(base_dir.to_path_buf())),
        Box::new(LoadMetadata::new(
            base_dir.to_path_buf(),
            vec![Box::new(CargoManifestLoader::new())],
        )),
        Box::new(ResolveDependencies),
        Box::new(GraphDependencies),
        Box::new(FlattenDependencies),
        Box::new(FinalizeDefinition),
    ]
}

pub fn sort_processors(processors: &mut [Box<dyn ProjectProcessor>]) {
    processors.sort_by(|a, b| {
        if a.before().contains(&b.name()) || b.after().contains(&a.name()) {
            return Ordering::Less;
        }
        if a.after().contains(&b.name()) || b.before().contains(&a.name()) {
            return Ordering::Greater;
        }
        a.phase().cmp(&b.phase())
    });
}

/// Runs every processor over the batch and returns the result sorted by
/// project directory.
pub fn process(
    mut processors: Vec<Box<dyn ProjectProcessor>>,
    mut projects: Vec<Project>,
) -> Result<Vec<Project>, ProcessError> {
    sort_processors(&mut processors);

    for processor in &processors {
        projects = processor.process_batch(projects)?;
    }

    projects.sort_by(|a, b| a.dir.cmp(&b.dir));
    Ok(projects)
}

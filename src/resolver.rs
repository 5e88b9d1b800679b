//! Locate logical references under an ordered list of source roots.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::asset_paths::logical_to_path;
use crate::error::{PipelineError, Result};
use crate::models::ResolvedSource;

/// Secondary lookup consulted when none of the primary roots has the file.
pub trait SourceFinder: Send + Sync {
    /// Return `(root, absolute_path)` of a file matching `logical`, if any.
    fn find(&self, logical: &str) -> Option<(PathBuf, PathBuf)>;
}

impl<F: SourceFinder + ?Sized> SourceFinder for Box<F> {
    fn find(&self, logical: &str) -> Option<(PathBuf, PathBuf)> {
        (**self).find(logical)
    }
}

/// Finder searching additional directories, such as per-application static folders.
#[derive(Debug, Clone, Default)]
pub struct DirectoryFinder {
    directories: Vec<PathBuf>,
}

impl DirectoryFinder {
    /// Search `directories` in order.
    pub fn new(directories: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            directories: directories.into_iter().collect(),
        }
    }
}

impl SourceFinder for DirectoryFinder {
    fn find(&self, logical: &str) -> Option<(PathBuf, PathBuf)> {
        first_file_under(&self.directories, logical)
    }
}

/// Maps logical references to files on disk.
pub struct PathResolver {
    roots: Vec<PathBuf>,
    secondary: Option<Box<dyn SourceFinder>>,
}

impl PathResolver {
    /// Resolver searching `roots` in priority order.
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
            secondary: None,
        }
    }

    /// Install a finder consulted after every root missed.
    pub fn with_finder(mut self, finder: impl SourceFinder + 'static) -> Self {
        self.secondary = Some(Box::new(finder));
        self
    }

    /// Configured roots, highest priority first.
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Locate `logical`; the first root holding a regular file wins.
    pub fn resolve(&self, logical: &str) -> Result<ResolvedSource> {
        let reference = logical.trim();
        let found = first_file_under(&self.roots, reference).or_else(|| {
            self.secondary
                .as_ref()
                .and_then(|finder| finder.find(reference))
        });

        let Some((root, absolute_path)) = found else {
            return Err(PipelineError::SourceNotFound {
                reference: reference.to_string(),
            });
        };

        let modification_time = modification_time(&absolute_path)?;
        Ok(ResolvedSource {
            reference: reference.to_string(),
            absolute_path,
            root,
            modification_time,
        })
    }
}

impl std::fmt::Debug for PathResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathResolver")
            .field("roots", &self.roots)
            .field("secondary", &self.secondary.is_some())
            .finish()
    }
}

fn first_file_under(roots: &[PathBuf], logical: &str) -> Option<(PathBuf, PathBuf)> {
    roots.iter().find_map(|root| {
        let candidate = logical_to_path(root, logical);
        candidate
            .is_file()
            .then(|| (root.clone(), candidate))
    })
}

/// Modification time of `path` in whole Unix seconds.
pub fn modification_time(path: &Path) -> Result<u64> {
    let modified = fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .map_err(|err| PipelineError::io(path, err))?;

    Ok(
        modified
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default(),
    )
}

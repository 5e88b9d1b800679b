//! Removal of generated artifacts from a directory tree.
//!
//! Artifacts are recognised by name alone: a `.<10 digits>` segment followed by an extension
//! or the end of the name, e.g. `app.1257894000.css`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::error::{PipelineError, Result};

fn artifact_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\.\d{10}(\.|$)").expect("invalid artifact name regex"))
}

/// Whether `file_name` looks like a fingerprinted artifact.
pub fn is_generated_artifact(file_name: &str) -> bool {
    artifact_pattern().is_match(file_name)
}

/// Delete every artifact below `root` and return their paths, sorted.
///
/// Directories are descended into but never removed; symlinked directories are not
/// followed. With `dry_run` nothing is deleted.
pub fn remove_artifacts(root: &Path, dry_run: bool) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    prune_artifacts(root, dry_run, &mut removed)?;
    removed.sort();
    Ok(removed)
}

fn prune_artifacts(dir: &Path, dry_run: bool, removed: &mut Vec<PathBuf>) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(PipelineError::io(dir, err)),
    };

    for entry in entries {
        let entry = entry.map_err(|err| PipelineError::io(dir, err))?;
        let entry_path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|err| PipelineError::io(&entry_path, err))?;

        if file_type.is_dir() {
            prune_artifacts(&entry_path, dry_run, removed)?;
            continue;
        }

        let file_name = entry.file_name();
        if !file_name.to_str().is_some_and(is_generated_artifact) {
            continue;
        }
        if !dry_run {
            fs::remove_file(&entry_path).map_err(|err| PipelineError::io(&entry_path, err))?;
            debug!(path = ?entry_path, "removed artifact");
        }
        removed.push(entry_path);
    }

    Ok(())
}

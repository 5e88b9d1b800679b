//! Pipeline configuration loaded from `static_fingerprint.json`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::optimizer::OptimizerCommands;

/// File name looked up by [`PipelineConfig::discover`].
pub const DEFAULT_CONFIG_FILE: &str = "static_fingerprint.json";

/// Everything that shapes how references are fingerprinted and where artifacts go.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Re-check source modification times on every call.
    pub strict_mode: bool,
    /// When off, references pass through untouched.
    pub enabled: bool,
    /// Directories searched for sources, highest priority first.
    pub source_roots: Vec<PathBuf>,
    /// Where artifacts are written. Defaults to the root the source was found in.
    pub output_root: Option<PathBuf>,
    /// Prepended to every generated reference, but not to artifact paths.
    pub name_prefix: String,
    /// Public URL prefix, e.g. a CDN origin.
    pub public_url: String,
    /// Apply `public_url` even while the pipeline is disabled.
    pub public_url_always: bool,
    /// Longest combined base name, in characters.
    pub max_combined_name_length: usize,
    /// Link unmodified sources instead of copying them.
    pub use_symlink: bool,
    /// External optimizer commands.
    pub optimizer: OptimizerCommands,
    /// Attempts made to create a symlink before giving up.
    pub symlink_retries: u32,
    /// Nesting limit for references between stylesheets.
    pub max_reference_depth: usize,
    /// Extra directories searched after `source_roots` in strict mode, such as
    /// per-application static folders during development.
    pub finder_directories: Vec<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            enabled: true,
            source_roots: Vec::new(),
            output_root: None,
            name_prefix: String::new(),
            public_url: String::new(),
            public_url_always: false,
            max_combined_name_length: 40,
            use_symlink: cfg!(unix),
            optimizer: OptimizerCommands::default(),
            symlink_retries: 5,
            max_reference_depth: 16,
            finder_directories: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Load `static_fingerprint.json` from `dir`, or defaults when there is none.
    pub fn discover(dir: &Path) -> Result<Self> {
        let candidate = dir.join(DEFAULT_CONFIG_FILE);
        match Self::from_path(&candidate) {
            Err(PipelineError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Read configuration from a specific JSON file.
    ///
    /// Relative directories in the file are taken relative to the file's own directory.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|err| PipelineError::io(path, err))?;
        let config: Self = serde_json::from_str(&content).map_err(|source| PipelineError::Config {
            path: path.to_path_buf(),
            source,
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Ok(config.anchored_at(base))
    }

    /// Resolve relative directories against `base`.
    pub fn anchored_at(mut self, base: &Path) -> Self {
        let anchor = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        self.source_roots.iter_mut().for_each(anchor);
        self.finder_directories.iter_mut().for_each(anchor);
        self.output_root.iter_mut().for_each(anchor);
        self
    }
}

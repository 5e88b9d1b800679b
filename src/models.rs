//! Data structures passed between the pipeline stages.

use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;

use crate::asset_paths::{GeneratedName, extension_of};

fn stylesheet_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(concat!(
            r"(?s)\A\s*(?:/\*.*?\*/\s*)*",
            r"(?:@(?:charset|import|media|font-face|keyframes)\b",
            r"|[^{}();=]+\{\s*(?:[-a-zA-Z]+\s*:[^{};]*;?\s*)*\})",
        ))
        .expect("invalid stylesheet guess regex")
    })
}

fn script_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(?:function|var|let|const|return|document|window)\b|=>|\w\s*\([^()]*\)\s*;")
            .expect("invalid script guess regex")
    })
}

/// Key of a fingerprint entry: one reference, or an ordered `;`-joined list of them.
///
/// Order is significant, `a.js;b.js` and `b.js;a.js` are different keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Build the key for an ordered list of logical references.
    pub fn from_references<S: AsRef<str>>(references: &[S]) -> Self {
        let parts: Vec<&str> = references
            .iter()
            .map(|reference| reference.as_ref().trim())
            .collect();
        Self(parts.join(";"))
    }

    /// Borrow the textual key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A logical reference located on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    /// Reference as written by the consumer.
    pub reference: String,
    /// Absolute path of the matching file.
    pub absolute_path: PathBuf,
    /// Root directory the file was found under.
    pub root: PathBuf,
    /// Modification time in whole Unix seconds.
    pub modification_time: u64,
}

/// Cached fingerprint of a cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintEntry {
    /// Key the entry belongs to.
    pub cache_key: CacheKey,
    /// Name the artifact was written under.
    pub generated_name: GeneratedName,
    /// Source modification time the name was computed from.
    pub modification_time: u64,
    /// Physical location of the artifact written for this entry.
    pub artifact_path: PathBuf,
}

/// Kinds of content an optimizer knows how to shrink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    /// JavaScript.
    Script,
    /// CSS.
    Stylesheet,
}

impl ContentKind {
    /// Classify a reference by its extension.
    pub fn from_reference(reference: &str) -> Option<Self> {
        match extension_of(reference)?.as_str() {
            "js" | "mjs" => Some(Self::Script),
            "css" => Some(Self::Stylesheet),
            _ => None,
        }
    }

    /// Parse a kind name such as `css`, `js` or `javascript`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "js" | "javascript" => Some(Self::Script),
            "css" => Some(Self::Stylesheet),
            _ => None,
        }
    }

    /// Guess the kind of an inline block of content.
    pub fn guess(content: &str) -> Option<Self> {
        if stylesheet_pattern().is_match(content) {
            Some(Self::Stylesheet)
        } else if script_pattern().is_match(content) {
            Some(Self::Script)
        } else {
            None
        }
    }

    /// Wrap `text` in a comment valid for this kind of content.
    pub fn comment(self, text: &str) -> String {
        let text = text.replace("*/", "* /");
        format!("/*\n{text}\n*/\n")
    }
}

/// How the artifact for a reference is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactMode {
    /// Read, rewrite nested references, optimize, write.
    Optimize,
    /// Symbolic link to the original file.
    Symlink,
    /// Byte-for-byte copy of the original file.
    Copy,
    /// Members joined with newlines, without optimization.
    Concatenate,
}

/// The physical output of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Where the artifact was written.
    pub path: PathBuf,
    /// How it was produced.
    pub mode: ArtifactMode,
}

/// Per-call switches of [`crate::Pipeline::process`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOptions {
    /// Merge several references into one artifact.
    pub combine: bool,
    /// Run the optimizer over scripts and stylesheets.
    pub optimize: bool,
    /// Link to the original instead of copying when nothing is transformed.
    pub prefer_symlink: bool,
    /// Emit a warning when a reference can't be found.
    pub warn_if_missing: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self::static_file()
    }
}

impl ProcessOptions {
    /// Fingerprint without transforming content.
    pub fn static_file() -> Self {
        Self {
            combine: true,
            optimize: false,
            prefer_symlink: true,
            warn_if_missing: true,
        }
    }

    /// Fingerprint and optimize.
    pub fn slim_file() -> Self {
        Self {
            optimize: true,
            ..Self::static_file()
        }
    }
}

/// Everything the pipeline decided for one reference, reported to the file proxy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyEvent {
    /// Physical artifact path, when one exists.
    pub filepath: Option<PathBuf>,
    /// The cache key had no entry before this call.
    pub new: bool,
    /// A stale artifact was replaced.
    pub changed: bool,
    /// The source modification time was looked at.
    pub checked: bool,
    /// The reference could not be resolved.
    pub not_found: bool,
}

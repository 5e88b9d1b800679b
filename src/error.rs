//! Error taxonomy shared by every stage of the asset pipeline.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failures raised while resolving, fingerprinting or writing assets.
///
/// [`PipelineError::SourceNotFound`], [`PipelineError::OptimizerFailure`],
/// [`PipelineError::CyclicReference`] and [`PipelineError::NestingTooDeep`] are recovered
/// inside the pipeline; the rest reach the caller.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No configured root contains the referenced file.
    #[error("can't find file {reference} in any source root")]
    SourceNotFound {
        /// Logical reference that failed to resolve.
        reference: String,
    },

    /// A combination mixed files with different extensions.
    #[error("can't combine files with different extensions: {first} and {other}")]
    ExtensionMismatch {
        /// Reference that fixed the expected extension.
        first: String,
        /// Reference that disagreed with it.
        other: String,
    },

    /// Optimization was requested for content of a kind without an optimizer.
    #[error("unable to optimize {reference}: unrecognized content kind")]
    UnknownContentKind {
        /// Reference whose extension is not a script or stylesheet.
        reference: String,
    },

    /// The external optimizer produced an error stream or failed to run.
    #[error("optimizer failed: {message}")]
    OptimizerFailure {
        /// Error text reported by the optimizer.
        message: String,
    },

    /// Symlink creation kept failing after the retry budget was exhausted.
    #[error("failed to link {} after {attempts} attempts", destination.display())]
    FilesystemRace {
        /// Link that could not be created.
        destination: PathBuf,
        /// Number of attempts made.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        source: io::Error,
    },

    /// A plain file occupies a path that has to be a directory.
    #[error("a file with the same name as the desired dir, '{}', already exists", path.display())]
    DirectoryBlocked {
        /// Path of the blocking file.
        path: PathBuf,
    },

    /// A nested stylesheet reference loops back into a file that is being processed.
    #[error("cyclic reference to {reference} (via {trail})")]
    CyclicReference {
        /// Reference that closed the loop.
        reference: String,
        /// References being processed when the loop was found, outermost first.
        trail: String,
    },

    /// Nested stylesheet references go deeper than the configured limit.
    #[error("nesting limit of {limit} reached at {reference} (via {trail})")]
    NestingTooDeep {
        /// Reference that would exceed the limit.
        reference: String,
        /// Configured maximum nesting depth.
        limit: usize,
        /// References being processed, outermost first.
        trail: String,
    },

    /// Any other filesystem failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path involved in the failing operation.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The configuration file exists but could not be parsed.
    #[error("failed to parse configuration {}: {source}", path.display())]
    Config {
        /// Configuration file path.
        path: PathBuf,
        /// Parse error.
        #[source]
        source: serde_json::Error,
    },
}

impl PipelineError {
    /// Wrap an I/O error together with the path that produced it.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

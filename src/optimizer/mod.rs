//! Content shrinking for scripts and stylesheets.
//!
//! An [`Optimizer`] is chosen when the pipeline is built. [`SlimOptimizer`] is the built-in
//! conservative minifier; [`CommandOptimizer`] pipes content through external programs
//! (one per content kind) and falls back to the built-in one for kinds without a command.

mod command;
mod process;
mod slim;

pub use command::{CommandOptimizer, OptimizerCommands};
pub use process::{ProcessOutput, ProcessRunner, SystemProcessRunner};
pub use slim::SlimOptimizer;

use crate::error::Result;
use crate::models::ContentKind;

/// Shrinks content of a known kind.
///
/// Failures are reported as [`crate::PipelineError::OptimizerFailure`]; the writer turns them
/// into an annotated, unoptimized artifact.
pub trait Optimizer: Send + Sync {
    /// Whether this optimizer handles `kind`.
    fn supports(&self, kind: ContentKind) -> bool;

    /// Return the optimized form of `content`.
    fn optimize(&self, kind: ContentKind, content: &str) -> Result<String>;
}

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod asset_paths;
pub mod cleanup;
pub mod combine;
pub mod config;
pub mod css;
pub mod diagnostics;
pub mod error;
pub mod models;
pub mod optimizer;
pub mod pipeline;
pub mod proxy;
pub mod resolver;
pub mod rewriter;
pub mod store;
pub mod writer;

pub use cleanup::remove_artifacts;
pub use config::PipelineConfig;
pub use diagnostics::{CollectingDiagnostics, DiagnosticsSink, TracingDiagnostics};
pub use error::{PipelineError, Result};
pub use models::{ArtifactMode, CacheKey, ContentKind, ProcessOptions, ProxyEvent};
pub use optimizer::{CommandOptimizer, Optimizer, SlimOptimizer};
pub use pipeline::{Pipeline, PipelineBuilder, ProcessOutcome};
pub use proxy::{FileProxy, NoopFileProxy};
pub use resolver::{DirectoryFinder, PathResolver, SourceFinder};
pub use rewriter::ReferenceRewriter;
pub use store::FingerprintStore;

//! The consumer-facing entry point: references in, fingerprinted references out.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::asset_paths::{
    absolutize_reference, logical_dir, logical_to_path, should_ignore_asset_reference,
};
use crate::combine::{self, CombinedUnit};
use crate::config::PipelineConfig;
use crate::css::{self, ReferenceTrail};
use crate::diagnostics::{DiagnosticsSink, TracingDiagnostics};
use crate::error::{PipelineError, Result};
use crate::models::{
    ArtifactMode, CacheKey, ContentKind, ProcessOptions, ProxyEvent, ResolvedSource,
};
use crate::optimizer::{CommandOptimizer, Optimizer, ProcessRunner};
use crate::proxy::{FileProxy, NoopFileProxy};
use crate::resolver::{DirectoryFinder, PathResolver, SourceFinder};
use crate::store::{Fingerprint, FingerprintStore};
use crate::writer::ArtifactWriter;

const INLINE_CONTENT: &str = "inline content";

/// Reference handed back to the caller together with what produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Final reference, after the file proxy.
    pub reference: String,
    /// What the pipeline did; also passed to the file proxy.
    pub event: ProxyEvent,
}

/// Fingerprints, combines and optimizes static assets.
///
/// A pipeline is cheap to share: wrap it in an [`Arc`] and call [`Pipeline::process`] from as
/// many threads as needed.
pub struct Pipeline {
    config: PipelineConfig,
    resolver: PathResolver,
    store: Arc<FingerprintStore>,
    writer: ArtifactWriter,
    diagnostics: Arc<dyn DiagnosticsSink>,
    proxy: Arc<dyn FileProxy>,
}

impl Pipeline {
    /// Pipeline with default collaborators.
    pub fn new(config: PipelineConfig) -> Self {
        Self::builder(config).build()
    }

    /// Start configuring collaborators.
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder {
            config,
            store: None,
            optimizer: None,
            runner: None,
            diagnostics: None,
            proxy: None,
            finder: None,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Fingerprint cache shared by this pipeline.
    pub fn store(&self) -> &Arc<FingerprintStore> {
        &self.store
    }

    /// Whether references are processed at all.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Rewrite `references` into a fingerprinted reference.
    ///
    /// Several references are merged into one artifact when `options.combine` is set;
    /// otherwise each is processed on its own and the results are joined with `;`.
    pub fn process<S: AsRef<str>>(
        &self,
        references: &[S],
        options: ProcessOptions,
    ) -> Result<String> {
        Ok(self.process_outcome(references, options)?.reference)
    }

    /// Optimize an inline block of content, such as the body of a `<style>` element.
    ///
    /// Without `kind` the kind is guessed from the content. Content that is neither a script
    /// nor a stylesheet fails with [`PipelineError::UnknownContentKind`]. Nothing is written
    /// to disk and the fingerprint cache is not involved.
    pub fn optimize_content(&self, kind: Option<ContentKind>, content: &str) -> Result<String> {
        let content = content.trim();
        let Some(kind) = kind.or_else(|| ContentKind::guess(content)) else {
            return Err(PipelineError::UnknownContentKind {
                reference: INLINE_CONTENT.to_string(),
            });
        };
        debug!(?kind, "optimizing inline content");
        self.writer.optimize_text(kind, INLINE_CONTENT, content)
    }

    /// Like [`Pipeline::process`], also reporting what happened.
    pub fn process_outcome<S: AsRef<str>>(
        &self,
        references: &[S],
        options: ProcessOptions,
    ) -> Result<ProcessOutcome> {
        let references: Vec<&str> = references
            .iter()
            .map(|reference| reference.as_ref().trim())
            .filter(|reference| !reference.is_empty())
            .collect();

        if !self.config.enabled {
            return self.each(&references, |reference| Ok(self.passed_through(reference)));
        }

        let mut trail = ReferenceTrail::new(self.config.max_reference_depth);
        if references.is_empty() || (options.combine && references.len() > 1) {
            return self.process_group(&references, options, &mut trail);
        }

        self.each(&references, |reference| {
            self.process_group(&[reference], options, &mut trail)
        })
    }

    fn each<F>(&self, references: &[&str], mut process: F) -> Result<ProcessOutcome>
    where
        F: FnMut(&str) -> Result<ProcessOutcome>,
    {
        if let [single] = references {
            return process(single);
        }

        let mut outputs = Vec::with_capacity(references.len());
        let mut event = ProxyEvent::default();
        for reference in references {
            let outcome = process(reference)?;
            outputs.push(outcome.reference);
            event.new |= outcome.event.new;
            event.changed |= outcome.event.changed;
            event.checked |= outcome.event.checked;
            event.not_found |= outcome.event.not_found;
        }

        Ok(ProcessOutcome {
            reference: outputs.join(";"),
            event,
        })
    }

    fn process_group(
        &self,
        references: &[&str],
        options: ProcessOptions,
        trail: &mut ReferenceTrail,
    ) -> Result<ProcessOutcome> {
        let key = CacheKey::from_references(references);
        match references {
            [] => return Ok(self.unprocessed(String::new(), ProxyEvent::default())),
            [single] if should_ignore_asset_reference(single) => {
                return Ok(self.unprocessed(single.to_string(), ProxyEvent::default()));
            }
            _ => {}
        }

        // Mixed extensions fail before anything touches the disk.
        if references.len() > 1 {
            combine::check_members(references, self.config.max_combined_name_length)?;
        }

        if let Err(err) = trail.enter(&key) {
            self.diagnostics.warn(&err.to_string());
            return Ok(self.unprocessed(key.to_string(), ProxyEvent::default()));
        }
        let outcome = self.process_entered(&key, references, options, trail);
        trail.leave();
        outcome
    }

    fn process_entered(
        &self,
        key: &CacheKey,
        references: &[&str],
        options: ProcessOptions,
        trail: &mut ReferenceTrail,
    ) -> Result<ProcessOutcome> {
        if !self.config.strict_mode
            && let Some(entry) = self.store.get(key)
        {
            debug!(key = %key, name = %entry.generated_name, "cache hit");
            let event = ProxyEvent {
                filepath: Some(entry.artifact_path),
                ..ProxyEvent::default()
            };
            return Ok(self.served(entry.generated_name.as_str(), event));
        }

        let mut sources = Vec::with_capacity(references.len());
        for reference in references {
            match self.resolver.resolve(reference) {
                Ok(source) => sources.push(source),
                Err(err @ PipelineError::SourceNotFound { .. }) => {
                    if options.warn_if_missing {
                        self.diagnostics.warn(&err.to_string());
                    }
                    let event = ProxyEvent {
                        not_found: true,
                        ..ProxyEvent::default()
                    };
                    return Ok(self.unprocessed(key.to_string(), event));
                }
                Err(err) => return Err(err),
            }
        }

        let CombinedUnit {
            logical_name,
            modification_time,
        } = combine::combine(&sources, self.config.max_combined_name_length)?;
        let output_root = self.output_root_for(&sources);
        let mode = self.artifact_mode(options, &sources, trail);

        let fingerprint = self.store.lookup_or_refresh(
            key,
            &logical_name,
            modification_time,
            self.config.strict_mode,
            || {
                self.writer.prepare(&sources, mode, |member, text| {
                    self.rewrite_stylesheet(member, text, options, trail)
                })
            },
            |prepared, name, superseded| {
                let destination = logical_to_path(&output_root, name.as_str());
                let artifact = self.writer.commit(prepared, &destination)?;
                match superseded {
                    Some(old) => {
                        info!(
                            key = %key,
                            old = %old.generated_name,
                            new = %name,
                            "replacing stale artifact"
                        );
                        self.writer.remove_superseded(&old.artifact_path)?;
                    }
                    None => {
                        info!(
                            key = %key,
                            path = ?artifact.path,
                            mode = ?artifact.mode,
                            "wrote artifact"
                        );
                    }
                }
                Ok(artifact.path)
            },
        )?;

        let event = event_for(&fingerprint);
        Ok(self.served(fingerprint.name.as_str(), event))
    }

    fn rewrite_stylesheet(
        &self,
        member: &ResolvedSource,
        text: &str,
        options: ProcessOptions,
        trail: &mut ReferenceTrail,
    ) -> Result<String> {
        let base_dir = logical_dir(&member.reference);
        css::rewrite_references(text, |value| {
            let absolute = absolutize_reference(value, base_dir);
            let nested = ProcessOptions {
                combine: false,
                optimize: options.optimize
                    && ContentKind::from_reference(&absolute) == Some(ContentKind::Stylesheet),
                prefer_symlink: options.prefer_symlink,
                warn_if_missing: false,
            };
            let outcome = self.process_group(&[absolute.as_str()], nested, trail)?;
            Ok(outcome.reference)
        })
    }

    fn artifact_mode(
        &self,
        options: ProcessOptions,
        sources: &[ResolvedSource],
        trail: &ReferenceTrail,
    ) -> ArtifactMode {
        // The key being processed is already on the trail.
        let nested_stylesheet = trail.depth() > 1
            && sources.iter().all(|source| {
                ContentKind::from_reference(&source.reference) == Some(ContentKind::Stylesheet)
            });

        if options.optimize {
            ArtifactMode::Optimize
        } else if sources.len() > 1 || nested_stylesheet {
            ArtifactMode::Concatenate
        } else if options.prefer_symlink && self.config.use_symlink {
            ArtifactMode::Symlink
        } else {
            ArtifactMode::Copy
        }
    }

    fn output_root_for(&self, sources: &[ResolvedSource]) -> PathBuf {
        if let Some(root) = &self.config.output_root {
            return root.clone();
        }
        let found_in = sources
            .first()
            .map(|source| source.root.clone())
            .unwrap_or_default();
        if sources.len() > 1 {
            return self.resolver.roots().first().cloned().unwrap_or(found_in);
        }
        found_in
    }

    fn served(&self, name: &str, event: ProxyEvent) -> ProcessOutcome {
        let uri = format!("{}{}{name}", self.config.public_url, self.config.name_prefix);
        self.unprocessed(uri, event)
    }

    fn passed_through(&self, reference: &str) -> ProcessOutcome {
        let uri = if self.config.public_url_always {
            format!("{}{reference}", self.config.public_url)
        } else {
            reference.to_string()
        };
        self.unprocessed(uri, ProxyEvent::default())
    }

    fn unprocessed(&self, uri: String, event: ProxyEvent) -> ProcessOutcome {
        ProcessOutcome {
            reference: self.proxy.proxy(uri, &event),
            event,
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("resolver", &self.resolver)
            .field("entries", &self.store.len())
            .finish_non_exhaustive()
    }
}

fn event_for(fingerprint: &Fingerprint) -> ProxyEvent {
    ProxyEvent {
        filepath: Some(fingerprint.artifact_path.clone()),
        new: fingerprint.is_new(),
        changed: fingerprint.is_changed(),
        checked: fingerprint.was_checked(),
        not_found: false,
    }
}

/// Collaborators of a [`Pipeline`]; anything left unset gets its default.
pub struct PipelineBuilder {
    config: PipelineConfig,
    store: Option<Arc<FingerprintStore>>,
    optimizer: Option<Arc<dyn Optimizer>>,
    runner: Option<Arc<dyn ProcessRunner>>,
    diagnostics: Option<Arc<dyn DiagnosticsSink>>,
    proxy: Option<Arc<dyn FileProxy>>,
    finder: Option<Box<dyn SourceFinder>>,
}

impl PipelineBuilder {
    /// Share an existing fingerprint cache.
    pub fn store(mut self, store: Arc<FingerprintStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the configured optimizer entirely.
    pub fn optimizer(mut self, optimizer: impl Optimizer + 'static) -> Self {
        self.optimizer = Some(Arc::new(optimizer));
        self
    }

    /// Spawn the configured optimizer commands through `runner`.
    pub fn process_runner(mut self, runner: impl ProcessRunner + 'static) -> Self {
        self.runner = Some(Arc::new(runner));
        self
    }

    /// Send warnings to `sink`.
    pub fn diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    /// Pass every final reference through `proxy`.
    pub fn file_proxy(mut self, proxy: impl FileProxy + 'static) -> Self {
        self.proxy = Some(Arc::new(proxy));
        self
    }

    /// Consult `finder` when no source root has a reference.
    pub fn finder(mut self, finder: impl SourceFinder + 'static) -> Self {
        self.finder = Some(Box::new(finder));
        self
    }

    /// Assemble the pipeline.
    pub fn build(self) -> Pipeline {
        let config = self.config;
        let diagnostics = self.diagnostics.unwrap_or_else(|| Arc::new(TracingDiagnostics));
        let optimizer = self.optimizer.unwrap_or_else(|| {
            let commands = config.optimizer.clone();
            Arc::new(match self.runner {
                Some(runner) => CommandOptimizer::with_runner(commands, runner),
                None => CommandOptimizer::new(commands),
            })
        });

        let finder = self.finder.or_else(|| {
            (config.strict_mode && !config.finder_directories.is_empty()).then(|| {
                let finder = DirectoryFinder::new(config.finder_directories.clone());
                Box::new(finder) as Box<dyn SourceFinder>
            })
        });
        let mut resolver = PathResolver::new(config.source_roots.clone());
        if let Some(finder) = finder {
            resolver = resolver.with_finder(finder);
        }

        Pipeline {
            writer: ArtifactWriter::new(optimizer, diagnostics.clone())
                .with_symlink_retries(config.symlink_retries),
            resolver,
            store: self.store.unwrap_or_default(),
            diagnostics,
            proxy: self.proxy.unwrap_or_else(|| Arc::new(NoopFileProxy)),
            config,
        }
    }
}

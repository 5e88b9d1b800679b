//! Physical output: transformed writes, links, copies and superseded-artifact removal.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use same_file::is_same_file;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::diagnostics::DiagnosticsSink;
use crate::error::{PipelineError, Result};
use crate::models::{Artifact, ArtifactMode, ContentKind, ResolvedSource};
use crate::optimizer::Optimizer;

/// Content staged for an artifact, produced before the target name is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedArtifact {
    /// Bytes to write, already transformed.
    Content {
        /// Final artifact bytes.
        bytes: Vec<u8>,
        /// [`ArtifactMode::Optimize`] or [`ArtifactMode::Concatenate`].
        mode: ArtifactMode,
    },
    /// Link to an unmodified source.
    Link {
        /// File the link points at.
        source: PathBuf,
    },
    /// Copy of an unmodified source.
    Copy {
        /// File to duplicate.
        source: PathBuf,
    },
}

/// Produces artifacts on disk.
pub struct ArtifactWriter {
    optimizer: Arc<dyn Optimizer>,
    diagnostics: Arc<dyn DiagnosticsSink>,
    symlink_retries: u32,
}

impl ArtifactWriter {
    /// Writer optimizing with `optimizer` and reporting optimizer failures to `diagnostics`.
    pub fn new(optimizer: Arc<dyn Optimizer>, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            optimizer,
            diagnostics,
            symlink_retries: 5,
        }
    }

    /// Number of attempts made before symlink creation gives up.
    pub fn with_symlink_retries(mut self, retries: u32) -> Self {
        self.symlink_retries = retries.max(1);
        self
    }

    /// Read and transform `sources` for `mode`.
    ///
    /// `rewrite_stylesheet` is handed every stylesheet member before concatenation and returns
    /// its text with nested references rewritten. Several sources are always concatenated,
    /// whatever `mode` asks for.
    pub fn prepare<R>(
        &self,
        sources: &[ResolvedSource],
        mode: ArtifactMode,
        mut rewrite_stylesheet: R,
    ) -> Result<PreparedArtifact>
    where
        R: FnMut(&ResolvedSource, &str) -> Result<String>,
    {
        match (mode, sources) {
            (ArtifactMode::Symlink, [single]) => {
                return Ok(PreparedArtifact::Link {
                    source: single.absolute_path.clone(),
                });
            }
            (ArtifactMode::Copy, [single]) => {
                return Ok(PreparedArtifact::Copy {
                    source: single.absolute_path.clone(),
                });
            }
            _ => {}
        }

        let kind = match mode {
            ArtifactMode::Optimize => Some(self.optimizable_kind(sources)?),
            _ => None,
        };

        let mut members = Vec::with_capacity(sources.len());
        for source in sources {
            let raw = fs::read(&source.absolute_path)
                .map_err(|err| PipelineError::io(&source.absolute_path, err))?;
            if ContentKind::from_reference(&source.reference) != Some(ContentKind::Stylesheet) {
                members.push(raw);
                continue;
            }
            match String::from_utf8(raw) {
                Ok(text) => members.push(rewrite_stylesheet(source, &text)?.into_bytes()),
                Err(err) => {
                    self.diagnostics.warn(&format!(
                        "{} is not valid UTF-8, its references are left as written",
                        source.reference
                    ));
                    members.push(err.into_bytes());
                }
            }
        }
        let joined = members.join(&b'\n');

        let Some(kind) = kind else {
            return Ok(PreparedArtifact::Content {
                bytes: joined,
                mode: ArtifactMode::Concatenate,
            });
        };

        let reference = sources
            .iter()
            .map(|source| source.reference.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let bytes = match String::from_utf8(joined) {
            Ok(text) => self.optimize_or_annotate(kind, &reference, &text)?.into_bytes(),
            Err(err) => {
                let message = format!("{reference} is not valid UTF-8");
                self.diagnostics
                    .warn(&format!("failed to optimize {reference}: {message}"));
                let mut bytes = kind.comment(&format!("ERROR\n{message}")).into_bytes();
                bytes.extend_from_slice(err.as_bytes());
                bytes
            }
        };

        Ok(PreparedArtifact::Content {
            bytes,
            mode: ArtifactMode::Optimize,
        })
    }

    /// Put `prepared` in place at `destination`.
    pub fn commit(&self, prepared: PreparedArtifact, destination: &Path) -> Result<Artifact> {
        let mode = match prepared {
            PreparedArtifact::Content { bytes, mode } => {
                write_atomically(destination, &bytes)?;
                mode
            }
            PreparedArtifact::Link { source } => {
                self.link(&source, destination)?;
                ArtifactMode::Symlink
            }
            PreparedArtifact::Copy { source } => {
                copy_atomically(&source, destination)?;
                ArtifactMode::Copy
            }
        };

        Ok(Artifact {
            path: destination.to_path_buf(),
            mode,
        })
    }

    /// [`ArtifactWriter::prepare`] followed by [`ArtifactWriter::commit`].
    pub fn write<R>(
        &self,
        sources: &[ResolvedSource],
        destination: &Path,
        mode: ArtifactMode,
        rewrite_stylesheet: R,
    ) -> Result<Artifact>
    where
        R: FnMut(&ResolvedSource, &str) -> Result<String>,
    {
        let prepared = self.prepare(sources, mode, rewrite_stylesheet)?;
        self.commit(prepared, destination)
    }

    /// Optimize `text` of a known `kind` without writing anything.
    ///
    /// Optimizer failures are handled as for artifacts: the text comes back unoptimized
    /// behind an error comment.
    pub fn optimize_text(&self, kind: ContentKind, reference: &str, text: &str) -> Result<String> {
        if !self.optimizer.supports(kind) {
            return Err(PipelineError::UnknownContentKind {
                reference: reference.to_string(),
            });
        }
        self.optimize_or_annotate(kind, reference, text)
    }

    /// Delete an artifact that was replaced. A missing file is fine.
    pub fn remove_superseded(&self, path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => {
                debug!(path = ?path, "removed superseded artifact");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PipelineError::io(path, err)),
        }
    }

    fn optimizable_kind(&self, sources: &[ResolvedSource]) -> Result<ContentKind> {
        let reference = sources
            .first()
            .map(|source| source.reference.clone())
            .unwrap_or_default();

        ContentKind::from_reference(&reference)
            .filter(|kind| self.optimizer.supports(*kind))
            .ok_or(PipelineError::UnknownContentKind { reference })
    }

    fn optimize_or_annotate(
        &self,
        kind: ContentKind,
        reference: &str,
        text: &str,
    ) -> Result<String> {
        match self.optimizer.optimize(kind, text) {
            Ok(optimized) => Ok(optimized),
            Err(PipelineError::OptimizerFailure { message }) => {
                self.diagnostics
                    .warn(&format!("failed to optimize {reference}: {message}"));
                Ok(format!("{}{text}", kind.comment(&format!("ERROR\n{message}"))))
            }
            Err(other) => Err(other),
        }
    }

    fn link(&self, source: &Path, destination: &Path) -> Result<()> {
        ensure_parent(destination)?;
        let target = std::path::absolute(source).map_err(|err| PipelineError::io(source, err))?;

        let mut last_error = None;
        for attempt in 1..=self.symlink_retries {
            if fs::symlink_metadata(destination).is_ok() {
                if is_same_file(&target, destination).unwrap_or(false) {
                    return Ok(());
                }
                if let Err(err) = fs::remove_file(destination) {
                    if err.kind() != ErrorKind::NotFound {
                        debug!(
                            attempt,
                            path = ?destination,
                            error = %err,
                            "failed to unlink old artifact"
                        );
                        last_error = Some(err);
                        continue;
                    }
                }
            }

            match symlink_file(&target, destination) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    debug!(attempt, path = ?destination, error = %err, "symlink attempt failed");
                    last_error = Some(err);
                }
            }
        }

        Err(PipelineError::FilesystemRace {
            destination: destination.to_path_buf(),
            attempts: self.symlink_retries,
            source: last_error.unwrap_or_else(|| io::Error::other("symlink was never attempted")),
        })
    }
}

impl std::fmt::Debug for ArtifactWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactWriter")
            .field("symlink_retries", &self.symlink_retries)
            .finish_non_exhaustive()
    }
}

/// Make sure `path` is a directory, creating missing ancestors.
///
/// Fails with [`PipelineError::DirectoryBlocked`] when a plain file sits where a directory
/// has to go. A directory created concurrently by someone else is fine.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    if let Ok(metadata) = fs::metadata(path) {
        if metadata.is_dir() {
            return Ok(());
        }
        return Err(PipelineError::DirectoryBlocked {
            path: path.to_path_buf(),
        });
    }

    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    match fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            if path.is_dir() {
                Ok(())
            } else {
                Err(PipelineError::DirectoryBlocked {
                    path: path.to_path_buf(),
                })
            }
        }
        Err(err) => Err(PipelineError::io(path, err)),
    }
}

fn ensure_parent(destination: &Path) -> Result<&Path> {
    let parent = destination.parent().unwrap_or_else(|| Path::new("."));
    ensure_dir(parent)?;
    Ok(parent)
}

fn staging_file(parent: &Path) -> Result<NamedTempFile> {
    let dir = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    NamedTempFile::new_in(dir).map_err(|err| PipelineError::io(dir, err))
}

fn write_atomically(destination: &Path, bytes: &[u8]) -> Result<()> {
    let parent = ensure_parent(destination)?;
    let mut staged = staging_file(parent)?;
    staged
        .write_all(bytes)
        .map_err(|err| PipelineError::io(staged.path(), err))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        staged
            .as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))
            .map_err(|err| PipelineError::io(staged.path(), err))?;
    }

    staged
        .persist(destination)
        .map_err(|err| PipelineError::io(destination, err.error))?;
    Ok(())
}

fn copy_atomically(source: &Path, destination: &Path) -> Result<()> {
    let parent = ensure_parent(destination)?;
    let mut input = File::open(source).map_err(|err| PipelineError::io(source, err))?;
    let permissions = input
        .metadata()
        .map_err(|err| PipelineError::io(source, err))?
        .permissions();

    let mut staged = staging_file(parent)?;
    io::copy(&mut input, &mut staged).map_err(|err| PipelineError::io(staged.path(), err))?;
    staged
        .as_file()
        .set_permissions(permissions)
        .map_err(|err| PipelineError::io(staged.path(), err))?;

    staged
        .persist(destination)
        .map_err(|err| PipelineError::io(destination, err.error))?;
    Ok(())
}

#[cfg(unix)]
fn symlink_file(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_file(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(not(any(unix, windows)))]
fn symlink_file(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        ErrorKind::Unsupported,
        "symbolic links are not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingDiagnostics;
    use crate::optimizer::SlimOptimizer;
    use tempfile::tempdir;

    struct BrokenOptimizer;

    impl Optimizer for BrokenOptimizer {
        fn supports(&self, _kind: ContentKind) -> bool {
            true
        }

        fn optimize(&self, _kind: ContentKind, _content: &str) -> Result<String> {
            Err(PipelineError::OptimizerFailure {
                message: "Parse error at line 1".into(),
            })
        }
    }

    fn source(root: &Path, reference: &str, content: &str) -> ResolvedSource {
        let absolute_path = root.join(reference.trim_start_matches('/'));
        fs::create_dir_all(absolute_path.parent().unwrap()).unwrap();
        fs::write(&absolute_path, content).unwrap();
        ResolvedSource {
            reference: reference.to_string(),
            absolute_path,
            root: root.to_path_buf(),
            modification_time: 0,
        }
    }

    fn writer() -> ArtifactWriter {
        ArtifactWriter::new(
            Arc::new(SlimOptimizer),
            Arc::new(CollectingDiagnostics::new()),
        )
    }

    fn untouched(_: &ResolvedSource, css: &str) -> Result<String> {
        Ok(css.to_string())
    }

    #[test]
    fn ensure_dir_creates_missing_ancestors() {
        let temp = tempdir().unwrap();
        let nested = temp.path().join("a/b/c");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        ensure_dir(&nested).unwrap();
    }

    #[test]
    fn ensure_dir_refuses_to_replace_files() {
        let temp = tempdir().unwrap();
        let blocker = temp.path().join("css");
        fs::write(&blocker, "not a directory").unwrap();

        let err = ensure_dir(&blocker).unwrap_err();
        assert!(matches!(err, PipelineError::DirectoryBlocked { ref path } if *path == blocker));

        let err = ensure_dir(&blocker.join("deeper")).unwrap_err();
        assert!(matches!(err, PipelineError::DirectoryBlocked { ref path } if *path == blocker));
    }

    #[test]
    fn optimizes_into_destination() {
        let temp = tempdir().unwrap();
        let member = source(temp.path(), "/css/app.css", "a {\n  color: red;\n}\n");
        let destination = temp.path().join("out/css/app.100.css");

        let artifact = writer()
            .write(&[member], &destination, ArtifactMode::Optimize, untouched)
            .unwrap();

        assert_eq!(artifact.mode, ArtifactMode::Optimize);
        assert_eq!(fs::read_to_string(&destination).unwrap(), "a{color:red}");
    }

    #[test]
    fn optimizer_failure_keeps_original_content() {
        let temp = tempdir().unwrap();
        let member = source(temp.path(), "/foo.js", "function () { return 1 }");
        let destination = temp.path().join("foo.100.js");
        let diagnostics = Arc::new(CollectingDiagnostics::new());
        let writer = ArtifactWriter::new(Arc::new(BrokenOptimizer), diagnostics.clone());

        writer
            .write(&[member], &destination, ArtifactMode::Optimize, untouched)
            .unwrap();

        let written = fs::read_to_string(&destination).unwrap();
        assert!(written.starts_with("/*"));
        assert!(written.contains("ERROR"));
        assert!(written.contains("Parse error at line 1"));
        assert!(written.contains("*/"));
        assert!(written.ends_with("function () { return 1 }"));
        assert_eq!(diagnostics.messages().len(), 1);
    }

    #[test]
    fn refuses_to_optimize_unknown_kinds() {
        let temp = tempdir().unwrap();
        let member = source(temp.path(), "/logo.png", "PNG");
        let destination = temp.path().join("logo.100.png");

        let err = writer()
            .write(&[member], &destination, ArtifactMode::Optimize, untouched)
            .unwrap_err();

        assert!(matches!(err, PipelineError::UnknownContentKind { .. }));
        assert!(!destination.exists());
    }

    #[test]
    fn concatenates_members_after_rewriting_stylesheets() {
        let temp = tempdir().unwrap();
        let members = [
            source(temp.path(), "/css/one.css", "a { background: url(one.gif) }"),
            source(temp.path(), "/css/two.css", "b { background: url(two.gif) }"),
        ];
        let destination = temp.path().join("css/one_two.100.css");
        let mut seen = Vec::new();

        let artifact = writer()
            .write(&members, &destination, ArtifactMode::Symlink, |member, css| {
                seen.push(member.reference.clone());
                Ok(css.replace("url(", "url(/css/"))
            })
            .unwrap();

        assert_eq!(artifact.mode, ArtifactMode::Concatenate);
        assert_eq!(seen, ["/css/one.css", "/css/two.css"]);
        assert_eq!(
            fs::read_to_string(&destination).unwrap(),
            "a { background: url(/css/one.gif) }\nb { background: url(/css/two.gif) }"
        );
    }

    #[test]
    fn copies_bytes_verbatim() {
        let temp = tempdir().unwrap();
        let member = source(temp.path(), "/img/logo.png", "\u{1}PNG\u{0}");
        let destination = temp.path().join("img/logo.100.png");

        let artifact = writer()
            .write(&[member], &destination, ArtifactMode::Copy, untouched)
            .unwrap();

        assert_eq!(artifact.mode, ArtifactMode::Copy);
        assert_eq!(fs::read(&destination).unwrap(), b"\x01PNG\x00");
    }

    #[cfg(unix)]
    #[test]
    fn links_reuse_or_replace_existing_destinations() {
        let temp = tempdir().unwrap();
        let member = source(temp.path(), "/foo.js", "function(){}");
        let destination = temp.path().join("foo.100.js");
        let writer = writer();

        writer
            .write(&[member.clone()], &destination, ArtifactMode::Symlink, untouched)
            .unwrap();
        assert_eq!(fs::read_link(&destination).unwrap(), member.absolute_path);

        writer
            .write(&[member.clone()], &destination, ArtifactMode::Symlink, untouched)
            .unwrap();
        assert!(is_same_file(&destination, &member.absolute_path).unwrap());

        fs::remove_file(&destination).unwrap();
        fs::write(&destination, "stale").unwrap();
        writer
            .write(&[member.clone()], &destination, ArtifactMode::Symlink, untouched)
            .unwrap();
        assert_eq!(fs::read_to_string(&destination).unwrap(), "function(){}");
    }

    #[test]
    fn non_utf8_stylesheets_are_joined_byte_for_byte() {
        let temp = tempdir().unwrap();
        let latin1 = source(temp.path(), "/a.css", "");
        fs::write(&latin1.absolute_path, b"a{content:\"\xE9\"}").unwrap();
        let members = [latin1, source(temp.path(), "/b.css", "b{color:red}")];
        let destination = temp.path().join("a_b.100.css");
        let diagnostics = Arc::new(CollectingDiagnostics::new());
        let writer = ArtifactWriter::new(Arc::new(SlimOptimizer), diagnostics.clone());
        let mut rewritten = Vec::new();

        writer
            .write(&members, &destination, ArtifactMode::Concatenate, |member, css| {
                rewritten.push(member.reference.clone());
                Ok(css.to_string())
            })
            .unwrap();

        assert_eq!(fs::read(&destination).unwrap(), b"a{content:\"\xE9\"}\nb{color:red}");
        assert_eq!(rewritten, ["/b.css"]);
        assert_eq!(diagnostics.messages().len(), 1);
        assert!(diagnostics.messages()[0].contains("/a.css"));
    }

    #[test]
    fn non_utf8_content_is_annotated_instead_of_optimized() {
        let temp = tempdir().unwrap();
        let member = source(temp.path(), "/legacy.js", "");
        fs::write(&member.absolute_path, b"var s = '\xE9';").unwrap();
        let destination = temp.path().join("legacy.100.js");
        let diagnostics = Arc::new(CollectingDiagnostics::new());
        let writer = ArtifactWriter::new(Arc::new(SlimOptimizer), diagnostics.clone());

        writer
            .write(&[member], &destination, ArtifactMode::Optimize, untouched)
            .unwrap();

        let written = fs::read(&destination).unwrap();
        assert!(written.starts_with(b"/*\nERROR"));
        assert!(written.ends_with(b"var s = '\xE9';"));
        assert_eq!(diagnostics.messages().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_gives_up_after_the_retry_budget() {
        let temp = tempdir().unwrap();
        let member = source(temp.path(), "/foo.js", "function(){}");
        let destination = temp.path().join("foo.100.js");
        fs::create_dir(&destination).unwrap();
        fs::write(destination.join("occupant"), "x").unwrap();

        let err = writer()
            .with_symlink_retries(3)
            .write(&[member], &destination, ArtifactMode::Symlink, untouched)
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::FilesystemRace { attempts: 3, ref destination, .. }
                if destination.ends_with("foo.100.js")
        ));
        assert!(destination.join("occupant").exists());
    }

    #[test]
    fn removing_superseded_artifacts_is_idempotent() {
        let temp = tempdir().unwrap();
        let stale = temp.path().join("foo.100.js");
        fs::write(&stale, "old").unwrap();

        let writer = writer();
        writer.remove_superseded(&stale).unwrap();
        writer.remove_superseded(&stale).unwrap();
        assert!(!stale.exists());
    }
}

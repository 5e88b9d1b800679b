//! Optimizer backed by external programs.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::models::ContentKind;

use super::{Optimizer, ProcessRunner, SlimOptimizer, SystemProcessRunner};

/// External commands per content kind, as configured.
///
/// Each command is an argv list; the program reads content on stdin and writes the
/// optimized result to stdout. Anything written to stderr counts as a failure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OptimizerCommands {
    /// Command for JavaScript, e.g. `["terser", "--compress"]`.
    pub script_command: Option<Vec<String>>,
    /// Command for CSS, e.g. `["csso"]`.
    pub stylesheet_command: Option<Vec<String>>,
    /// Seconds to wait for a command before killing it.
    pub timeout_secs: u64,
}

impl Default for OptimizerCommands {
    fn default() -> Self {
        Self {
            script_command: None,
            stylesheet_command: None,
            timeout_secs: 30,
        }
    }
}

impl OptimizerCommands {
    fn for_kind(&self, kind: ContentKind) -> Option<&[String]> {
        let command = match kind {
            ContentKind::Script => self.script_command.as_deref(),
            ContentKind::Stylesheet => self.stylesheet_command.as_deref(),
        };
        command.filter(|argv| !argv.is_empty())
    }
}

/// Runs the configured command for a content kind, or the built-in minifier without one.
pub struct CommandOptimizer {
    commands: OptimizerCommands,
    runner: Arc<dyn ProcessRunner>,
    fallback: Box<dyn Optimizer>,
}

impl CommandOptimizer {
    /// Optimizer spawning real processes.
    pub fn new(commands: OptimizerCommands) -> Self {
        Self::with_runner(commands, Arc::new(SystemProcessRunner))
    }

    /// Optimizer spawning processes through `runner`.
    pub fn with_runner(commands: OptimizerCommands, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            commands,
            runner,
            fallback: Box::new(SlimOptimizer),
        }
    }
}

impl std::fmt::Debug for CommandOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandOptimizer")
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}

impl Optimizer for CommandOptimizer {
    fn supports(&self, kind: ContentKind) -> bool {
        self.commands.for_kind(kind).is_some() || self.fallback.supports(kind)
    }

    fn optimize(&self, kind: ContentKind, content: &str) -> Result<String> {
        let Some((program, args)) = self
            .commands
            .for_kind(kind)
            .and_then(|argv| argv.split_first())
        else {
            return self.fallback.optimize(kind, content);
        };

        debug!(program = %program, ?kind, "running external optimizer");
        let timeout = Duration::from_secs(self.commands.timeout_secs);
        let output = self
            .runner
            .run(program, args, content, timeout)
            .map_err(|err| PipelineError::OptimizerFailure {
                message: format!("failed to run {program}: {err}"),
            })?;

        let stderr = output.stderr.trim();
        if !stderr.is_empty() {
            return Err(PipelineError::OptimizerFailure {
                message: stderr.to_string(),
            });
        }
        if !output.success {
            return Err(PipelineError::OptimizerFailure {
                message: format!("{program} exited unsuccessfully"),
            });
        }

        Ok(output.stdout)
    }
}

//! User-facing warnings, such as references that can't be found.

use parking_lot::Mutex;

/// Receives warnings meant for whoever maintains the markup being processed.
pub trait DiagnosticsSink: Send + Sync {
    /// Report one warning.
    fn warn(&self, message: &str);
}

/// Forwards warnings to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn warn(&self, message: &str) {
        tracing::warn!("{message}");
    }
}

/// Keeps warnings in memory so they can be inspected or summarised later.
#[derive(Debug, Default)]
pub struct CollectingDiagnostics {
    messages: Mutex<Vec<String>>,
}

impl CollectingDiagnostics {
    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Warnings received so far, oldest first.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

impl DiagnosticsSink for CollectingDiagnostics {
    fn warn(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}

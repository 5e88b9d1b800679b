//! Hook for rewriting final references, e.g. to point them at a CDN.

use crate::models::ProxyEvent;

/// Called with every reference the pipeline hands back to its caller.
///
/// The returned string replaces `uri`. `event` describes what the pipeline did to produce
/// it; `event.filepath` points at the artifact on disk when there is one.
pub trait FileProxy: Send + Sync {
    /// Rewrite `uri`.
    fn proxy(&self, uri: String, event: &ProxyEvent) -> String;
}

/// Returns every reference unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFileProxy;

impl FileProxy for NoopFileProxy {
    fn proxy(&self, uri: String, _event: &ProxyEvent) -> String {
        uri
    }
}

impl<F> FileProxy for F
where
    F: Fn(String, &ProxyEvent) -> String + Send + Sync,
{
    fn proxy(&self, uri: String, event: &ProxyEvent) -> String {
        self(uri, event)
    }
}

//! In-memory fingerprint cache and the staleness decision.
//!
//! The store is the only shared mutable state of the pipeline. Reads go through a
//! read-write lock; the final "re-check, write artifact, commit entry" step for a key is
//! serialized by a mutex owned by that key, so two threads that detect the same stale source
//! never delete each other's artifacts. Preparing artifact content happens outside of any
//! lock, which keeps nested stylesheet processing free of lock-order deadlocks.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::asset_paths::GeneratedName;
use crate::error::Result;
use crate::models::{CacheKey, FingerprintEntry};

/// How a lookup was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refresh {
    /// First time the key was seen, an artifact was produced.
    New,
    /// Entry returned without looking at the source.
    Cached,
    /// Source verified, modification time unchanged.
    Unchanged,
    /// Source changed; a new artifact replaced the one under `superseded`.
    Changed {
        /// Name of the replaced artifact.
        superseded: GeneratedName,
    },
}

/// Result of [`FingerprintStore::lookup_or_refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Name to serve.
    pub name: GeneratedName,
    /// Where the artifact behind `name` lives.
    pub artifact_path: PathBuf,
    /// What happened to produce it.
    pub refresh: Refresh,
}

impl Fingerprint {
    /// A new artifact was produced for a key without an entry.
    pub fn is_new(&self) -> bool {
        self.refresh == Refresh::New
    }

    /// A stale artifact was replaced.
    pub fn is_changed(&self) -> bool {
        matches!(self.refresh, Refresh::Changed { .. })
    }

    /// The source modification time was consulted.
    pub fn was_checked(&self) -> bool {
        self.refresh != Refresh::Cached
    }
}

/// Process-wide map from cache key to fingerprint entry.
#[derive(Debug, Default)]
pub struct FingerprintStore {
    entries: RwLock<HashMap<CacheKey, FingerprintEntry>>,
    key_locks: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl FingerprintStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current entry for `key`.
    pub fn get(&self, key: &CacheKey) -> Option<FingerprintEntry> {
        self.entries.read().get(key).cloned()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no entry.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Forget every entry, as a process restart would.
    pub fn clear(&self) {
        self.entries.write().clear();
        self.key_locks.lock().clear();
    }

    /// Answer a lookup for `key`, producing a new artifact when needed.
    ///
    /// `observed_mtime` is the current modification time of the source (the newest member for
    /// combinations). Without `strict` an existing entry is trusted as is. `prepare` builds
    /// whatever the artifact needs without holding any lock; `finalize` writes it under the
    /// generated name while the key is locked, receives the superseded entry, if any, and
    /// returns the artifact path. The entry is committed only after `finalize` succeeded.
    pub fn lookup_or_refresh<T, P, F>(
        &self,
        key: &CacheKey,
        logical_name: &str,
        observed_mtime: u64,
        strict: bool,
        prepare: P,
        finalize: F,
    ) -> Result<Fingerprint>
    where
        P: FnOnce() -> Result<T>,
        F: FnOnce(T, &GeneratedName, Option<&FingerprintEntry>) -> Result<PathBuf>,
    {
        if let Some(fresh) = self.fresh(key, observed_mtime, strict) {
            return Ok(fresh);
        }

        let prepared = prepare()?;

        let lock = self.key_lock(key);
        let _guard = lock.lock();

        // Another thread may have finished the same work while we were preparing.
        if let Some(fresh) = self.fresh(key, observed_mtime, strict) {
            debug!(key = %key, "artifact committed concurrently, discarding prepared content");
            return Ok(fresh);
        }

        let previous = self.get(key);
        // An entry for a newer source wins; its artifact may already be served.
        if let Some(newer) = previous
            .as_ref()
            .filter(|entry| entry.modification_time > observed_mtime)
        {
            debug!(
                key = %key,
                observed = observed_mtime,
                committed = newer.modification_time,
                "newer artifact committed concurrently, serving it"
            );
            return Ok(Fingerprint {
                name: newer.generated_name.clone(),
                artifact_path: newer.artifact_path.clone(),
                refresh: Refresh::Unchanged,
            });
        }

        let name = GeneratedName::new(logical_name, observed_mtime);
        let superseded = previous
            .as_ref()
            .filter(|entry| entry.generated_name != name);

        let artifact_path = finalize(prepared, &name, superseded)?;

        let refresh = match superseded {
            Some(old) => Refresh::Changed {
                superseded: old.generated_name.clone(),
            },
            None if previous.is_some() => Refresh::Unchanged,
            None => Refresh::New,
        };

        self.entries.write().insert(
            key.clone(),
            FingerprintEntry {
                cache_key: key.clone(),
                generated_name: name.clone(),
                modification_time: observed_mtime,
                artifact_path: artifact_path.clone(),
            },
        );

        Ok(Fingerprint {
            name,
            artifact_path,
            refresh,
        })
    }

    fn fresh(&self, key: &CacheKey, observed_mtime: u64, strict: bool) -> Option<Fingerprint> {
        let entry = self.get(key)?;
        let refresh = if !strict {
            Refresh::Cached
        } else if entry.modification_time == observed_mtime {
            Refresh::Unchanged
        } else {
            return None;
        };

        Some(Fingerprint {
            name: entry.generated_name,
            artifact_path: entry.artifact_path,
            refresh,
        })
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        self.key_locks.lock().entry(key.clone()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn key(value: &str) -> CacheKey {
        CacheKey::from_references(&[value])
    }

    fn refresh(
        store: &FingerprintStore,
        mtime: u64,
        strict: bool,
        superseded: &mut Vec<GeneratedName>,
    ) -> Fingerprint {
        store
            .lookup_or_refresh(
                &key("/foo.js"),
                "/foo.js",
                mtime,
                strict,
                || Ok(()),
                |(), name, old| {
                    superseded.extend(old.map(|entry| entry.generated_name.clone()));
                    Ok(PathBuf::from(name.as_str()))
                },
            )
            .unwrap()
    }

    #[test]
    fn first_lookup_is_new() {
        let store = FingerprintStore::new();
        let mut superseded = Vec::new();
        let fingerprint = refresh(&store, 100, false, &mut superseded);

        assert_eq!(fingerprint.name.as_str(), "/foo.100.js");
        assert!(fingerprint.is_new());
        assert!(fingerprint.was_checked());
        assert!(superseded.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn trusts_cache_outside_strict_mode() {
        let store = FingerprintStore::new();
        let mut superseded = Vec::new();
        refresh(&store, 100, false, &mut superseded);

        let calls = AtomicUsize::new(0);
        let fingerprint = store
            .lookup_or_refresh(
                &key("/foo.js"),
                "/foo.js",
                200,
                false,
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                |(), _, _| Ok(PathBuf::new()),
            )
            .unwrap();

        assert_eq!(fingerprint.name.as_str(), "/foo.100.js");
        assert_eq!(fingerprint.artifact_path, PathBuf::from("/foo.100.js"));
        assert_eq!(fingerprint.refresh, Refresh::Cached);
        assert!(!fingerprint.was_checked());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn strict_mode_detects_changes() {
        let store = FingerprintStore::new();
        let mut superseded = Vec::new();
        refresh(&store, 100, true, &mut superseded);

        let unchanged = refresh(&store, 100, true, &mut superseded);
        assert_eq!(unchanged.refresh, Refresh::Unchanged);
        assert!(superseded.is_empty());

        let changed = refresh(&store, 110, true, &mut superseded);
        assert_eq!(changed.name.as_str(), "/foo.110.js");
        assert!(changed.is_changed());
        assert_eq!(superseded, vec![GeneratedName::new("/foo.js", 100)]);
        assert_eq!(store.get(&key("/foo.js")).unwrap().modification_time, 110);
    }

    #[test]
    fn failed_finalize_commits_nothing() {
        let store = FingerprintStore::new();
        let result = store.lookup_or_refresh(
            &key("/foo.js"),
            "/foo.js",
            100,
            false,
            || Ok(()),
            |(), _, _| {
                Err(PipelineError::UnknownContentKind {
                    reference: "/foo.js".into(),
                })
            },
        );

        assert!(result.is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn clear_forgets_entries() {
        let store = FingerprintStore::new();
        let mut superseded = Vec::new();
        refresh(&store, 100, false, &mut superseded);
        store.clear();

        let fingerprint = refresh(&store, 200, false, &mut superseded);
        assert!(fingerprint.is_new());
        assert_eq!(fingerprint.name.as_str(), "/foo.200.js");
    }

    #[test]
    fn concurrent_refreshes_finalize_once() {
        let store = Arc::new(FingerprintStore::new());
        let finalized = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let finalized = Arc::clone(&finalized);
                thread::spawn(move || {
                    store
                        .lookup_or_refresh(
                            &key("/shared.css"),
                            "/shared.css",
                            500,
                            true,
                            || Ok(()),
                            |(), name, _| {
                                finalized.fetch_add(1, Ordering::SeqCst);
                                Ok(PathBuf::from(name.as_str()))
                            },
                        )
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            let fingerprint = handle.join().unwrap();
            assert_eq!(fingerprint.name.as_str(), "/shared.500.css");
        }
        assert_eq!(finalized.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn slower_refresh_never_supersedes_newer_entry() {
        let store = FingerprintStore::new();
        let mut first = Vec::new();
        refresh(&store, 50, true, &mut first);

        let mut newer_superseded = Vec::new();
        let mut older_superseded = Vec::new();
        let mut newer = None;
        let older = store
            .lookup_or_refresh(
                &key("/foo.js"),
                "/foo.js",
                100,
                true,
                || {
                    // A concurrent request sees mtime 200 and commits first.
                    newer = Some(refresh(&store, 200, true, &mut newer_superseded));
                    Ok(())
                },
                |(), name, old| {
                    older_superseded.extend(old.map(|entry| entry.generated_name.clone()));
                    Ok(PathBuf::from(name.as_str()))
                },
            )
            .unwrap();

        let newer = newer.unwrap();
        assert_eq!(newer.name.as_str(), "/foo.200.js");
        assert_eq!(newer_superseded, vec![GeneratedName::new("/foo.js", 50)]);
        assert_eq!(older.name.as_str(), "/foo.200.js");
        assert!(older_superseded.is_empty());
        assert_eq!(store.get(&key("/foo.js")).unwrap().modification_time, 200);
    }
}

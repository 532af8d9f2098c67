//! Build cache
//!
//! Maps fingerprints to prior successful artifacts and keeps per-backend
//! attempt history. Entries live in a sharded map so access to one
//! fingerprint never contends with unrelated ones; the index is persisted as
//! JSON in the cache directory after every change, merged with whatever other
//! processes wrote there since.
//!
//! The cache also owns in-flight claims: the first orchestrator to claim a
//! build key leads, later ones wait for the outcome the leader publishes.

pub mod fingerprint;
pub mod metadata;

pub use fingerprint::{short_hash, InputDigest};
pub use metadata::{BackendHistory, CacheEntry, CacheIndex, INDEX_FILE};

use crate::attempt::BuildOutcome;
use crate::backend::BackendId;
use crate::cancel::CancellationToken;
use crate::error::{BuildError, BuildResult};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often a waiting follower re-checks cancellation
const FOLLOWER_POLL: Duration = Duration::from_millis(50);

/// Persistent fingerprint → artifact store
#[derive(Debug)]
pub struct BuildCache {
    /// None keeps everything in memory
    dir: Option<PathBuf>,
    entries: DashMap<String, CacheEntry>,
    history: DashMap<BackendId, BackendHistory>,
    in_flight: DashMap<String, Arc<InFlightSlot>>,
    /// Changes not yet written; also serializes index writes
    pending: Mutex<PendingChanges>,
}

/// What this process changed since the index was last written
#[derive(Debug, Default)]
struct PendingChanges {
    /// Dropped fingerprints that must not be merged back from disk
    removed: BTreeSet<String>,
    /// Attempt counts recorded here and not yet on disk
    history: BTreeMap<BackendId, BackendHistory>,
    /// Discard the on-disk index instead of merging it
    cleared: bool,
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub in_flight: usize,
}

impl BuildCache {
    /// Cache that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            entries: DashMap::new(),
            history: DashMap::new(),
            in_flight: DashMap::new(),
            pending: Mutex::new(PendingChanges::default()),
        }
    }

    /// Open (or create) the cache stored in `dir`
    ///
    /// An unreadable index is discarded with a warning; the cache starts empty.
    pub fn open(dir: impl Into<PathBuf>) -> BuildResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| BuildError::io(&dir, e))?;

        let cache = Self {
            dir: Some(dir.clone()),
            ..Self::in_memory()
        };

        let index_path = dir.join(INDEX_FILE);
        if !index_path.exists() {
            return Ok(cache);
        }
        let json = fs::read_to_string(&index_path).map_err(|e| BuildError::io(&index_path, e))?;
        match CacheIndex::parse(&json) {
            Ok((index, dropped)) => {
                for (key, entry) in index.entries {
                    cache.entries.insert(key, entry);
                }
                for (backend, history) in index.history {
                    cache.history.insert(backend, history);
                }
                if !dropped.is_empty() {
                    cache.persist()?;
                }
            }
            Err(e) => {
                let err = BuildError::cache_corruption(INDEX_FILE, e);
                warn!(path = %index_path.display(), error = %err, "discarding cache index");
                cache.persist()?;
            }
        }
        debug!(dir = %dir.display(), entries = cache.entries.len(), "opened build cache");
        Ok(cache)
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Valid entry for `fingerprint`
    ///
    /// An entry whose artifact has disappeared is corrupt: it is dropped and
    /// reported as a miss.
    pub fn lookup(&self, fingerprint: &str) -> Option<CacheEntry> {
        let entry = self.entries.get(fingerprint).map(|e| e.value().clone())?;
        if entry.valid && entry.artifact.exists() {
            debug!(fingerprint = %fingerprint, artifact = %entry.artifact.display(), "cache hit");
            return Some(entry);
        }

        let err = BuildError::cache_corruption(
            fingerprint,
            format!("artifact {} is missing", entry.artifact.display()),
        );
        warn!(error = %err, "dropping cache entry");
        {
            let mut pending = self.lock_pending();
            self.entries.remove(fingerprint);
            pending.removed.insert(fingerprint.to_string());
        }
        if let Err(e) = self.persist() {
            warn!(error = %e, "failed to persist cache index");
        }
        None
    }

    /// Record a successful build
    pub fn store(&self, entry: CacheEntry) -> BuildResult<()> {
        debug!(fingerprint = %entry.fingerprint, backend = %entry.backend, "caching artifact");
        {
            let mut pending = self.lock_pending();
            pending.removed.remove(&entry.fingerprint);
            self.entries.insert(entry.fingerprint.clone(), entry);
        }
        self.persist()
    }

    /// Count one attempt for `backend`
    pub fn record_attempt(&self, backend: BackendId, success: bool) {
        {
            let mut pending = self.lock_pending();
            self.history.entry(backend).or_default().record(success);
            pending.history.entry(backend).or_default().record(success);
        }
        if let Err(e) = self.persist() {
            warn!(error = %e, "failed to persist attempt history");
        }
    }

    pub fn history(&self) -> BTreeMap<BackendId, BackendHistory> {
        self.history.iter().map(|h| (*h.key(), *h.value())).collect()
    }

    /// Success rate per backend with any recorded history
    pub fn success_rates(&self) -> BTreeMap<BackendId, f64> {
        self.history
            .iter()
            .filter_map(|h| h.value().success_rate().map(|rate| (*h.key(), rate)))
            .collect()
    }

    /// All entries, oldest first
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        entries
    }

    /// Remove every entry and all history, returning the number of entries removed
    pub fn clear(&self) -> BuildResult<usize> {
        let removed = {
            let mut pending = self.lock_pending();
            let removed = self.entries.len();
            self.entries.clear();
            self.history.clear();
            *pending = PendingChanges {
                cleared: true,
                ..Default::default()
            };
            removed
        };
        self.persist()?;
        info!(removed, "cleared build cache");
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            in_flight: self.in_flight.len(),
        }
    }

    /// Claim the right to build `key`
    ///
    /// Returns [`Claim::Follower`] when another caller already holds it.
    pub fn claim(&self, key: &str) -> Claim<'_> {
        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                debug!(key = %key, "build already in flight, waiting");
                Claim::Follower(InFlightWait {
                    slot: Arc::clone(occupied.get()),
                })
            }
            Entry::Vacant(vacant) => {
                let slot = Arc::new(InFlightSlot::default());
                vacant.insert(Arc::clone(&slot));
                Claim::Leader(InFlightGuard {
                    cache: self,
                    key: key.to_string(),
                    slot,
                })
            }
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingChanges> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merge with the index on disk, then write it atomically (temp file + rename)
    ///
    /// Entries stored by other processes are adopted unless this process
    /// dropped them; history counts are summed.
    fn persist(&self) -> BuildResult<()> {
        let mut pending = self.lock_pending();
        let Some(dir) = &self.dir else {
            *pending = PendingChanges::default();
            return Ok(());
        };
        let path = dir.join(INDEX_FILE);

        let on_disk = if pending.cleared {
            CacheIndex::new()
        } else {
            read_index(&path)
        };
        for (key, entry) in on_disk.entries {
            if !pending.removed.contains(&key) {
                self.entries.entry(key).or_insert(entry);
            }
        }
        let mut history = on_disk.history;
        for (backend, delta) in &pending.history {
            let merged = history.entry(*backend).or_default();
            merged.successes = merged.successes.saturating_add(delta.successes);
            merged.failures = merged.failures.saturating_add(delta.failures);
        }
        self.history.retain(|backend, _| history.contains_key(backend));
        for (backend, counts) in &history {
            self.history.insert(*backend, *counts);
        }

        let mut index = CacheIndex::new();
        for entry in self.entries.iter() {
            index.entries.insert(entry.key().clone(), entry.value().clone());
        }
        index.history = history;

        let tmp = dir.join(format!("{}.tmp", INDEX_FILE));
        fs::write(&tmp, index.to_json()?).map_err(|e| BuildError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| BuildError::io(&path, e))?;
        *pending = PendingChanges::default();
        Ok(())
    }
}

/// Current on-disk index; a missing or unreadable one reads as empty
fn read_index(path: &Path) -> CacheIndex {
    let Ok(json) = fs::read_to_string(path) else {
        return CacheIndex::new();
    };
    match CacheIndex::parse(&json) {
        Ok((index, _)) => index,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "ignoring unreadable index while merging");
            CacheIndex::new()
        }
    }
}

#[derive(Debug, Default)]
struct InFlightSlot {
    state: Mutex<SlotState>,
    finished: Condvar,
}

#[derive(Debug, Default)]
struct SlotState {
    done: bool,
    outcome: Option<BuildOutcome>,
}

/// Result of [`BuildCache::claim`]
#[derive(Debug)]
pub enum Claim<'a> {
    /// Caller builds; completion is broadcast when the guard drops
    Leader(InFlightGuard<'a>),
    /// Another caller is building the same key
    Follower(InFlightWait),
}

/// Held by the leader for the duration of a build
#[derive(Debug)]
pub struct InFlightGuard<'a> {
    cache: &'a BuildCache,
    key: String,
    slot: Arc<InFlightSlot>,
}

impl InFlightGuard<'_> {
    /// Hand the leader's outcome to every waiting follower
    pub fn publish(&self, outcome: &BuildOutcome) {
        let mut state = self.slot.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.outcome = Some(outcome.clone());
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.cache
            .in_flight
            .remove_if(&self.key, |_, slot| Arc::ptr_eq(slot, &self.slot));
        let mut state = self.slot.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.done = true;
        self.slot.finished.notify_all();
    }
}

/// What a follower saw when it stopped waiting
#[derive(Debug)]
pub enum Waited {
    /// The leader published its outcome
    Finished(BuildOutcome),
    /// The leader went away without an outcome
    Abandoned,
    Cancelled,
}

/// Handle a follower waits on
#[derive(Debug)]
pub struct InFlightWait {
    slot: Arc<InFlightSlot>,
}

impl InFlightWait {
    /// Block until the leader finishes or `cancel` fires
    pub fn wait(&self, cancel: &CancellationToken) -> Waited {
        let mut state = self.slot.state.lock().unwrap_or_else(PoisonError::into_inner);
        while !state.done {
            if cancel.is_cancelled() {
                return Waited::Cancelled;
            }
            state = match self.slot.finished.wait_timeout(state, FOLLOWER_POLL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        match &state.outcome {
            Some(outcome) => Waited::Finished(outcome.clone()),
            None => Waited::Abandoned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::thread;
    use tempfile::TempDir;

    fn entry(dir: &Path, fingerprint: &str) -> CacheEntry {
        let artifact = dir.join(format!("{}.bin", fingerprint));
        fs::write(&artifact, b"exe").unwrap();
        CacheEntry {
            fingerprint: fingerprint.to_string(),
            backend: BackendId::Bundler,
            backend_version: "6.3.0".to_string(),
            entry_point: PathBuf::from("main.py"),
            artifact,
            created_at: Utc::now(),
            valid: true,
        }
    }

    #[test]
    fn test_store_and_lookup() {
        let dir = TempDir::new().unwrap();
        let cache = BuildCache::in_memory();
        cache.store(entry(dir.path(), "abc")).unwrap();
        assert!(cache.lookup("abc").is_some());
        assert!(cache.lookup("def").is_none());
    }

    #[test]
    fn test_entries_persist_across_opens() {
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("cache");
        {
            let cache = BuildCache::open(&cache_dir).unwrap();
            cache.store(entry(dir.path(), "abc")).unwrap();
            cache.record_attempt(BackendId::Bundler, true);
        }
        let reopened = BuildCache::open(&cache_dir).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.success_rates()[&BackendId::Bundler], 1.0);
    }

    #[test]
    fn test_concurrent_processes_keep_each_others_entries() {
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("cache");
        let first = BuildCache::open(&cache_dir).unwrap();
        let second = BuildCache::open(&cache_dir).unwrap();

        first.store(entry(dir.path(), "a")).unwrap();
        first.record_attempt(BackendId::Bundler, true);
        second.store(entry(dir.path(), "b")).unwrap();
        second.record_attempt(BackendId::Bundler, false);

        let reopened = BuildCache::open(&cache_dir).unwrap();
        let keys: Vec<_> = reopened.entries().into_iter().map(|e| e.fingerprint).collect();
        assert_eq!(keys.len(), 2);
        assert!(reopened.lookup("a").is_some());
        assert!(reopened.lookup("b").is_some());
        assert_eq!(
            reopened.history()[&BackendId::Bundler],
            BackendHistory {
                successes: 1,
                failures: 1
            }
        );
        assert!(second.lookup("a").is_some());
    }

    #[test]
    fn test_dropped_entry_is_not_merged_back() {
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("cache");
        let cache = BuildCache::open(&cache_dir).unwrap();
        let stale = entry(dir.path(), "stale");
        fs::remove_file(&stale.artifact).unwrap();
        cache.store(stale).unwrap();

        assert!(cache.lookup("stale").is_none());
        cache.store(entry(dir.path(), "fresh")).unwrap();

        let reopened = BuildCache::open(&cache_dir).unwrap();
        assert_eq!(reopened.len(), 1);
        assert!(reopened.lookup("fresh").is_some());
    }

    #[test]
    fn test_clear_discards_other_processes_entries() {
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("cache");
        let first = BuildCache::open(&cache_dir).unwrap();
        let second = BuildCache::open(&cache_dir).unwrap();
        first.store(entry(dir.path(), "a")).unwrap();

        assert_eq!(second.clear().unwrap(), 0);
        assert!(BuildCache::open(&cache_dir).unwrap().is_empty());
    }

    #[test]
    fn test_missing_artifact_is_dropped() {
        let dir = TempDir::new().unwrap();
        let cache = BuildCache::in_memory();
        let e = entry(dir.path(), "abc");
        fs::remove_file(&e.artifact).unwrap();
        cache.store(e).unwrap();
        assert!(cache.lookup("abc").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_corrupt_index_starts_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(INDEX_FILE), "{ not json").unwrap();
        let cache = BuildCache::open(dir.path()).unwrap();
        assert!(cache.is_empty());
        let rewritten = fs::read_to_string(dir.path().join(INDEX_FILE)).unwrap();
        assert!(CacheIndex::parse(&rewritten).is_ok());
    }

    #[test]
    fn test_clear() {
        let dir = TempDir::new().unwrap();
        let cache = BuildCache::open(dir.path().join("cache")).unwrap();
        cache.store(entry(dir.path(), "a")).unwrap();
        cache.store(entry(dir.path(), "b")).unwrap();
        assert_eq!(cache.clear().unwrap(), 2);
        assert!(cache.entries().is_empty());
    }

    #[test]
    fn test_second_claim_follows() {
        let cache = BuildCache::in_memory();
        let leader = cache.claim("key");
        assert!(matches!(leader, Claim::Leader(_)));
        assert!(matches!(cache.claim("key"), Claim::Follower(_)));
        assert!(matches!(cache.claim("other"), Claim::Leader(_)));
        drop(leader);
        assert!(matches!(cache.claim("key"), Claim::Leader(_)));
    }

    #[test]
    fn test_follower_wakes_when_leader_finishes() {
        let cache = Arc::new(BuildCache::in_memory());
        let Claim::Leader(guard) = cache.claim("key") else {
            panic!("expected leader");
        };
        let Claim::Follower(wait) = cache.claim("key") else {
            panic!("expected follower");
        };
        let waiter = thread::spawn(move || wait.wait(&CancellationToken::new()));
        thread::sleep(Duration::from_millis(50));
        drop(guard);
        assert!(matches!(waiter.join().unwrap(), Waited::Abandoned));
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[test]
    fn test_follower_receives_published_outcome() {
        let cache = Arc::new(BuildCache::in_memory());
        let Claim::Leader(guard) = cache.claim("key") else {
            panic!("expected leader");
        };
        let Claim::Follower(wait) = cache.claim("key") else {
            panic!("expected follower");
        };
        let waiter = thread::spawn(move || wait.wait(&CancellationToken::new()));
        thread::sleep(Duration::from_millis(50));
        let outcome = BuildOutcome::cancelled("main.py", "stopped");
        guard.publish(&outcome);
        drop(guard);
        match waiter.join().unwrap() {
            Waited::Finished(shared) => assert_eq!(shared, outcome),
            other => panic!("expected the leader's outcome, got {:?}", other),
        }
    }

    #[test]
    fn test_follower_stops_on_cancel() {
        let cache = BuildCache::in_memory();
        let _leader = cache.claim("key");
        let Claim::Follower(wait) = cache.claim("key") else {
            panic!("expected follower");
        };
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(wait.wait(&token), Waited::Cancelled));
    }
}

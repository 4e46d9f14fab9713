//! Content-addressed result cache with expiry.
//!
//! Each entry is one JSON file `medocr-<key>.json` in the cache directory
//! holding `{key, document_result, cached_at}`. The key is
//!
//! ```text
//! sha256( hex(sha256(content)) ":" canonical_json(params) [ ":" scope ] )
//! ```
//!
//! so identical bytes processed with identical [`ProcessingParameters`]
//! always land on the same entry, and changing any parameter is a miss.
//! `scope` carries pipeline identity that is not a per-call parameter (the
//! OCR engine's fingerprint, the render cap); an empty scope adds nothing.
//!
//! Only files carrying the `medocr-` prefix are ever listed, swept or
//! cleared, so the directory can be shared with other tools.
//!
//! ## Failure policy
//!
//! The cache is best-effort. Every I/O or decode failure is logged and
//! reported to the caller as a miss (reads) or silently skipped (writes); a
//! [`CacheError`] never leaves this module.
//!
//! ## Locking
//!
//! A single mutex serialises every filesystem touch (including reads, so a
//! reader never sees a half-written file). Writes go to a temp file that is
//! renamed into place.

use crate::config::ProcessingParameters;
use crate::error::CacheError;
use crate::output::DocumentResult;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// File name prefix of every entry and temp file this store owns.
const ENTRY_PREFIX: &str = "medocr-";

/// Fingerprint of (content, parameters); the storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key. Pure: same inputs, same key.
    pub fn derive(content: &[u8], params: &ProcessingParameters) -> Self {
        Self::derive_scoped(content, params, "")
    }

    /// [`Self::derive`] with extra identity mixed in. Different scopes give
    /// different keys; the empty scope gives the same key as `derive`.
    pub fn derive_scoped(content: &[u8], params: &ProcessingParameters, scope: &str) -> Self {
        let content_hash = hex::encode(Sha256::digest(content));
        // Struct field order is fixed and the plugin set is a BTreeSet, so
        // this serialisation is canonical.
        let params_json = serde_json::to_string(params).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(content_hash.as_bytes());
        hasher.update(b":");
        hasher.update(params_json.as_bytes());
        if !scope.is_empty() {
            hasher.update(b":");
            hasher.update(scope.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0[..12.min(self.0.len())])
    }
}

/// Persisted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub document_result: DocumentResult,
    pub cached_at: DateTime<Utc>,
}

/// Directory-backed cache store. Construct one per pipeline and share it by
/// `Arc`; there is no process-wide instance.
#[derive(Debug)]
pub struct CacheStore {
    dir: PathBuf,
    ttl: Duration,
    lock: Mutex<()>,
}

impl CacheStore {
    /// Open (creating if needed) a cache directory.
    ///
    /// A directory that cannot be created is logged; the store then behaves
    /// as an always-missing cache.
    pub fn open(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        let dir = dir.into();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!("Cannot create cache directory {}: {}", dir.display(), e);
        }
        Self {
            dir,
            ttl,
            lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    // ── Contract ─────────────────────────────────────────────────────────

    /// Look up by the unscoped key. Entries written by an orchestrator carry
    /// its scope and are reached through [`Self::get_by_key`].
    pub fn get(&self, content: &[u8], params: &ProcessingParameters) -> Option<DocumentResult> {
        self.get_by_key(&CacheKey::derive(content, params))
    }

    pub fn set(&self, content: &[u8], params: &ProcessingParameters, result: &DocumentResult) {
        self.set_by_key(&CacheKey::derive(content, params), result)
    }

    pub fn invalidate(&self, content: &[u8], params: &ProcessingParameters) {
        self.invalidate_key(&CacheKey::derive(content, params))
    }

    /// Remove every entry and any leftover temp file.
    pub fn clear(&self) {
        let _guard = self.lock.lock();
        let mut removed = 0usize;
        let entries = self.owned_paths(is_entry_name);
        let temps = self.owned_paths(is_temp_name);
        for path in entries.into_iter().chain(temps) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Cache clear: cannot remove {}: {}", path.display(), e),
            }
        }
        info!("Cleared cache ({} entries)", removed);
    }

    // ── Key-level operations (the orchestrator hashes once per call) ─────

    pub fn get_by_key(&self, key: &CacheKey) -> Option<DocumentResult> {
        let path = self.entry_path(key);
        let _guard = self.lock.lock();

        match read_entry(&path) {
            Ok(None) => {
                debug!("Cache miss for {}", key);
                None
            }
            Ok(Some(entry)) => {
                if self.is_expired(&entry) {
                    info!("Cache entry {} expired; removing", key);
                    remove_quietly(&path);
                    None
                } else {
                    info!("Cache hit for {}", key);
                    Some(entry.document_result)
                }
            }
            Err(e) => {
                warn!("{}; treating as miss", e);
                if matches!(e, CacheError::Corrupt { .. }) {
                    remove_quietly(&path);
                }
                None
            }
        }
    }

    pub fn set_by_key(&self, key: &CacheKey, result: &DocumentResult) {
        let entry = CacheEntry {
            key: key.clone(),
            document_result: result.clone(),
            cached_at: Utc::now(),
        };
        let path = self.entry_path(key);
        let _guard = self.lock.lock();
        match write_entry(&path, &entry) {
            Ok(()) => info!("Cached result {}", key),
            Err(e) => warn!("Cache write skipped: {}", e),
        }
    }

    pub fn invalidate_key(&self, key: &CacheKey) {
        let path = self.entry_path(key);
        let _guard = self.lock.lock();
        match std::fs::remove_file(&path) {
            Ok(()) => info!("Invalidated cache entry {}", key),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Cannot invalidate {}: {}", path.display(), e),
        }
    }

    // ── Expiry ───────────────────────────────────────────────────────────

    /// Delete every expired (or unreadable) entry. Returns how many were removed.
    ///
    /// Temp files left by an interrupted write are deleted too; writes hold
    /// the lock, so any temp file seen here is orphaned.
    pub fn sweep_expired(&self) -> usize {
        let _guard = self.lock.lock();
        for path in self.owned_paths(is_temp_name) {
            if std::fs::remove_file(&path).is_ok() {
                debug!("Sweep removed orphaned {}", path.display());
            }
        }
        let mut removed = 0usize;
        for path in self.entry_paths() {
            let stale = match read_entry(&path) {
                Ok(Some(entry)) => self.is_expired(&entry),
                Ok(None) => false,
                Err(e) => {
                    warn!("Sweep: {}", e);
                    true
                }
            };
            if stale && std::fs::remove_file(&path).is_ok() {
                debug!("Sweep removed {}", path.display());
                removed += 1;
            }
        }
        if removed > 0 {
            info!("Cache sweep removed {} entries", removed);
        }
        removed
    }

    /// Number of persisted entries, expired or not.
    pub fn len(&self) -> usize {
        let _guard = self.lock.lock();
        self.entry_paths().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, entry: &CacheEntry) -> bool {
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => Utc::now() - entry.cached_at > ttl,
            Err(_) => false,
        }
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{ENTRY_PREFIX}{}.json", key.as_str()))
    }

    fn entry_paths(&self) -> Vec<PathBuf> {
        self.owned_paths(is_entry_name)
    }

    fn owned_paths(&self, keep: fn(&str) -> bool) -> Vec<PathBuf> {
        let read = match std::fs::read_dir(&self.dir) {
            Ok(r) => r,
            Err(e) => {
                warn!("Cannot list cache directory {}: {}", self.dir.display(), e);
                return Vec::new();
            }
        };
        read.filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name().and_then(|n| n.to_str()).is_some_and(keep)
            })
            .collect()
    }
}

fn is_entry_name(name: &str) -> bool {
    name.starts_with(ENTRY_PREFIX) && name.ends_with(".json")
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with(ENTRY_PREFIX) && name.ends_with(".json.tmp")
}

fn read_entry(path: &Path) -> Result<Option<CacheEntry>, CacheError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(CacheError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| CacheError::Corrupt {
            path: path.to_path_buf(),
            source: e,
        })
}

fn write_entry(path: &Path, entry: &CacheEntry) -> Result<(), CacheError> {
    let io_err = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };
    let json = serde_json::to_vec_pretty(entry).map_err(|e| CacheError::Corrupt {
        path: path.to_path_buf(),
        source: e,
    })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Cannot remove cache file {}: {}", path.display(), e);
        }
    }
}

/// Background expiry sweep. Dropping the handle stops the sweep.
#[derive(Debug)]
pub struct SweepHandle {
    task: tokio::task::JoinHandle<()>,
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start a periodic sweep of `store` on the current Tokio runtime.
///
/// The task holds only a weak reference, so it ends on its own once the
/// store is dropped. Must be called from within a Tokio runtime.
pub fn spawn_sweeper(store: &Arc<CacheStore>, every: Duration) -> SweepHandle {
    let weak: Weak<CacheStore> = Arc::downgrade(store);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately; skip it so the first sweep
        // runs one interval after start.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(store) = weak.upgrade() else {
                debug!("Cache dropped; sweeper exiting");
                break;
            };
            if let Err(e) = tokio::task::spawn_blocking(move || store.sweep_expired()).await {
                warn!("Cache sweep task failed: {}", e);
            }
        }
    });
    SweepHandle { task }
}

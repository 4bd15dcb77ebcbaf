//! On-disk store of conversion results.
//!
//! Layout: `<root>/entries/<aa>/<digest>.json`, where `digest` is the SHA-256
//! of the key components and `aa` its first two hex characters. Entries that
//! carry binary payloads (transcoded images) keep them in a sibling
//! `<digest>.bin`, written before the JSON so a readable JSON file always has
//! its payload next to it.
//!
//! The key includes the source file's modification time, so touching a file
//! makes its old entry unreachable. Unreachable entries stay on disk until
//! [`ConversionCache::prune`] removes them.

use crate::error::CacheError;
use crate::utils::{CachePolicy, atomic_write};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

/// Hash free-form conversion parameters (e.g. the vision prompt) into a short,
/// fixed-size fingerprint.
pub fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())[..16].to_string()
}

/// Identity of a cached result: source path + modification time + parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source: PathBuf,
    pub modified: DateTime<Utc>,
    pub fingerprint: String,
    digest: String,
}

impl CacheKey {
    /// Returns `None` when the modification time is unknown; such files are
    /// never cached because staleness could not be detected.
    pub fn new(source: &Path, modified: Option<SystemTime>, fingerprint: &str) -> Option<Self> {
        let modified = DateTime::<Utc>::from(modified?);
        let mut hasher = Sha256::new();
        hasher.update(source.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(modified.to_rfc3339().as_bytes());
        hasher.update([0u8]);
        hasher.update(fingerprint.as_bytes());
        Some(Self {
            source: source.to_path_buf(),
            modified,
            fingerprint: fingerprint.to_string(),
            digest: format!("{:x}", hasher.finalize()),
        })
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// How the cached result was originally produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachedVia {
    Primary,
    Fallback,
}

/// A stored conversion result. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub source: PathBuf,
    pub modified: DateTime<Utc>,
    pub fingerprint: String,
    pub via: CachedVia,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(default)]
    pub has_payload: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub payload: Option<Vec<u8>>,
}

impl CacheEntry {
    pub fn text(key: &CacheKey, via: CachedVia, markdown: String) -> Self {
        Self::build(key, via, Some(markdown), None)
    }

    pub fn bytes(key: &CacheKey, payload: Vec<u8>) -> Self {
        Self::build(key, CachedVia::Primary, None, Some(payload))
    }

    fn build(
        key: &CacheKey,
        via: CachedVia,
        markdown: Option<String>,
        payload: Option<Vec<u8>>,
    ) -> Self {
        Self {
            source: key.source.clone(),
            modified: key.modified,
            fingerprint: key.fingerprint.clone(),
            via,
            markdown,
            has_payload: payload.is_some(),
            created_at: Utc::now(),
            payload,
        }
    }

    fn matches(&self, key: &CacheKey) -> bool {
        self.source == key.source
            && self.modified == key.modified
            && self.fingerprint == key.fingerprint
    }
}

/// Persistent, process-wide cache. Safe to share between worker threads:
/// entries for different keys never contend, and [`with_key_lock`] serializes
/// the get-compute-put sequence for one key.
///
/// [`with_key_lock`]: ConversionCache::with_key_lock
pub struct ConversionCache {
    root: PathBuf,
    policy: CachePolicy,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConversionCache {
    pub fn open(root: &Path, policy: CachePolicy) -> Result<Self, CacheError> {
        if policy != CachePolicy::Disabled {
            fs::create_dir_all(root.join("entries"))
                .map_err(|e| CacheError::CreateDir(root.to_path_buf(), e))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
            policy,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &CacheKey, ext: &str) -> PathBuf {
        self.root
            .join("entries")
            .join(&key.digest[..2])
            .join(format!("{}.{}", key.digest, ext))
    }

    /// Pure lookup. Any read or decode problem is a miss.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        if !self.policy.reads() {
            return None;
        }
        let raw = fs::read(self.entry_path(key, "json")).ok()?;
        let mut entry: CacheEntry = match serde_json::from_slice(&raw) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!("Discarding unreadable cache entry {}: {}", key.digest, e);
                return None;
            }
        };
        if !entry.matches(key) {
            return None;
        }
        if entry.has_payload {
            entry.payload = Some(fs::read(self.entry_path(key, "bin")).ok()?);
        }
        tracing::debug!("Cache hit for {}", key.source.display());
        Some(entry)
    }

    pub fn put(&self, key: &CacheKey, entry: &CacheEntry) -> Result<(), CacheError> {
        if !self.policy.writes() {
            return Ok(());
        }
        if let Some(payload) = &entry.payload {
            let bin = self.entry_path(key, "bin");
            atomic_write(&bin, payload).map_err(|e| CacheError::Write(bin, e))?;
        }
        let json_path = self.entry_path(key, "json");
        let json = serde_json::to_vec_pretty(entry)?;
        atomic_write(&json_path, &json).map_err(|e| CacheError::Write(json_path, e))
    }

    /// Run `f` while holding the lock for `key`. The lock is dropped from the
    /// table once no other caller holds or waits on it.
    pub fn with_key_lock<T>(&self, key: &CacheKey, f: impl FnOnce() -> T) -> T {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key.digest.clone()).or_default().clone()
        };
        let result = {
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            f()
        };

        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Clones are only taken under the table lock: two references means
        // the table's and ours.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&key.digest);
        }
        result
    }

    /// Delete entries created more than `max_age` ago, plus anything that no
    /// longer parses. Returns the number of entries removed.
    pub fn prune(&self, max_age: Duration) -> Result<usize, CacheError> {
        let entries = self.root.join("entries");
        let cutoff = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age));
        let (Some(cutoff), true) = (cutoff, entries.exists()) else {
            return Ok(0);
        };
        let mut removed = 0;
        for entry in WalkDir::new(&entries).into_iter().flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|e| e != "json") {
                continue;
            }
            let stale = match fs::read(path)
                .ok()
                .and_then(|raw| serde_json::from_slice::<CacheEntry>(&raw).ok())
            {
                Some(e) => e.created_at <= cutoff,
                None => true,
            };
            if stale {
                fs::remove_file(path).map_err(|e| CacheError::Remove(path.to_path_buf(), e))?;
                let bin = path.with_extension("bin");
                if bin.exists() {
                    fs::remove_file(&bin).map_err(|e| CacheError::Remove(bin, e))?;
                }
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root).map_err(|e| CacheError::Remove(self.root.clone(), e))?;
        }
        Ok(())
    }
}

//! Content hash cache — skips redundant recomputation across sequential
//! tasks with an unchanged input window.
//!
//! This layers on top of the dedupe-key guarantee, it does not replace it:
//! dedupe prevents concurrent duplicate *tasks*, the hash cache prevents
//! redundant *work* when back-to-back runs see identical data.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;

/// Default entry lifetime.
const DEFAULT_TTL: Duration = Duration::from_secs(300); // 5 minutes

struct CacheEntry {
    hash: u64,
    result: Value,
    inserted_at: Instant,
}

/// TTL'd map of `key -> (content hash, last result)`.
pub struct ContentHashCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ContentHashCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Hash an input data window.
    pub fn content_hash(content: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        hasher.finish()
    }

    /// Look up a fresh result computed from identical content.
    pub fn get(&self, key: &str, hash: u64) -> Option<Value> {
        let entries = self.entries.lock().ok()?;
        let entry = entries.get(key)?;
        if entry.hash == hash && entry.inserted_at.elapsed() < self.ttl {
            Some(entry.result.clone())
        } else {
            None
        }
    }

    /// Record the result computed from the given content hash.
    pub fn put(&self, key: &str, hash: u64, result: Value) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|_, e| e.inserted_at.elapsed() < self.ttl);
            entries.insert(
                key.to_string(),
                CacheEntry {
                    hash,
                    result,
                    inserted_at: Instant::now(),
                },
            );
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ContentHashCache {
    fn default() -> Self {
        Self::new()
    }
}

//! Provider result caching.
//!
//! `session` entries live in the resolver (one per run); `{ttlMs}` and
//! `always` entries live in a process-wide table. Keys hash the repo root
//! together with the full provider config, so different workspaces never
//! collide.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};

use wizard_core::{CacheMode, DynamicSource};

/// Stable cache key for `(repoRoot, providerConfig)`.
pub fn cache_key(repo_root: &Path, source: &DynamicSource) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repo_root.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    if let Ok(serialized) = serde_json::to_vec(source) {
        hasher.update(&serialized);
    }
    format!("{:x}", hasher.finalize())
}

struct GlobalEntry {
    records: Vec<Value>,
    expires_at: Option<Instant>,
}

fn global_cache() -> &'static Mutex<HashMap<String, GlobalEntry>> {
    static CACHE: OnceLock<Mutex<HashMap<String, GlobalEntry>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

pub fn global_get(key: &str) -> Option<Vec<Value>> {
    let mut cache = global_cache().lock().ok()?;
    match cache.get(key) {
        Some(entry) => {
            if entry.expires_at.is_some_and(|deadline| Instant::now() >= deadline) {
                cache.remove(key);
                None
            } else {
                Some(entry.records.clone())
            }
        }
        None => None,
    }
}

pub fn global_put(key: String, records: Vec<Value>, mode: &CacheMode) {
    let expires_at = match mode {
        CacheMode::Ttl { ttl_ms } => Some(Instant::now() + Duration::from_millis(*ttl_ms)),
        CacheMode::Always => None,
        CacheMode::Session => return,
    };
    if let Ok(mut cache) = global_cache().lock() {
        cache.insert(
            key,
            GlobalEntry {
                records,
                expires_at,
            },
        );
    }
}

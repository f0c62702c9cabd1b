//! Cache tier (§4.3): short-TTL, process-local, for recently observed tool
//! outputs and prompts. Never survives a process restart.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;

struct Entry {
    value: Value,
    expires_at: Instant,
}

pub struct CacheTier {
    ttl: Duration,
    entries: RwLock<FxHashMap<String, Entry>>,
}

impl CacheTier {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn put(&self, key: impl Into<String>, value: Value) {
        self.entries.write().insert(
            key.into(),
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if entry.expires_at < Instant::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    /// Drop all expired entries; called periodically, not on every read.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.write().retain(|_, e| e.expires_at >= now);
    }
}

impl Default for CacheTier {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

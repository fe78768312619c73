//! Injected stores for the cache, history log and usage counter.
//! Everything is an explicit trait object handed to the scanner at
//! construction time, so tests substitute in-memory fakes and the
//! pipeline never touches ambient globals.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Result, ScanError};
use crate::types::{HistoryEntry, ScanResult};

/// History keeps this many entries; `append` evicts the oldest beyond it.
pub const HISTORY_LIMIT: usize = 20;

/// Only the leading bytes of an image feed the cache key. Payloads run
/// to megabytes and a 10 KiB prefix already separates real-world
/// uploads; two different images sharing an identical prefix is a
/// tolerable cache collision, not a correctness problem.
pub const CACHE_PREFIX_BYTES: usize = 10 * 1024;

const KEY_HEX_CHARS: usize = 16;

/// Deterministic content key for an encoded image: SHA-256 of the
/// first `CACHE_PREFIX_BYTES`, truncated to a fixed-length hex string.
pub fn content_key(bytes: &[u8]) -> String {
    let prefix = &bytes[..bytes.len().min(CACHE_PREFIX_BYTES)];
    let digest = Sha256::digest(prefix);
    let mut hex = String::with_capacity(KEY_HEX_CHARS);
    for b in digest.iter() {
        hex.push_str(&format!("{:02x}", b));
        if hex.len() >= KEY_HEX_CHARS {
            break;
        }
    }
    hex.truncate(KEY_HEX_CHARS);
    hex
}

/// Content-addressed memoization of full extraction results.
pub trait ResultCache {
    fn get(&self, key: &str) -> Result<Option<ScanResult>>;
    fn put(&self, key: &str, result: &ScanResult) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Bounded most-recent-first log of past extractions.
pub trait HistoryStore {
    fn append(&self, entry: HistoryEntry) -> Result<()>;
    /// Entries newest first, at most `HISTORY_LIMIT`.
    fn list(&self) -> Result<Vec<HistoryEntry>>;
    fn remove(&self, id: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Per-calendar-day counter of provider calls. A stored count from a
/// different day reads as zero and resets on the next record.
pub trait UsageStore {
    fn count_for(&self, day: &str) -> Result<u32>;
    fn record(&self, day: &str) -> Result<u32>;
}

#[derive(Default)]
struct MemoryInner {
    cache: HashMap<String, ScanResult>,
    /// Newest first.
    history: Vec<HistoryEntry>,
    usage: Option<(String, u32)>,
}

/// Mutex-guarded in-memory store implementing all three traits. Used
/// by tests and by runs that do not want a database on disk.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|e| ScanError::Storage(e.to_string()))
    }
}

impl ResultCache for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<ScanResult>> {
        Ok(self.lock()?.cache.get(key).cloned())
    }

    fn put(&self, key: &str, result: &ScanResult) -> Result<()> {
        self.lock()?.cache.insert(key.to_string(), result.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.lock()?.cache.clear();
        Ok(())
    }
}

impl HistoryStore for MemoryStore {
    fn append(&self, entry: HistoryEntry) -> Result<()> {
        let mut inner = self.lock()?;
        inner.history.insert(0, entry);
        inner.history.truncate(HISTORY_LIMIT);
        Ok(())
    }

    fn list(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self.lock()?.history.clone())
    }

    fn remove(&self, id: &str) -> Result<()> {
        self.lock()?.history.retain(|e| e.id != id);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.lock()?.history.clear();
        Ok(())
    }
}

impl UsageStore for MemoryStore {
    fn count_for(&self, day: &str) -> Result<u32> {
        Ok(match &self.lock()?.usage {
            Some((stored_day, count)) if stored_day == day => *count,
            _ => 0,
        })
    }

    fn record(&self, day: &str) -> Result<u32> {
        let mut inner = self.lock()?;
        let next = match &inner.usage {
            Some((stored_day, count)) if stored_day == day => count + 1,
            _ => 1,
        };
        inner.usage = Some((day.to_string(), next));
        Ok(next)
    }
}

//! In-memory cache of agent responses keyed by a request fingerprint.
//!
//! The fingerprint covers the page identity and content plus the *sizes* of
//! the file and folder lists, not their contents. A changed tree with the
//! same counts is a cache hit.

use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::agent::{AgentRequest, AgentResponse};

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    response: AgentResponse,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) > self.ttl
    }
}

/// Entry counts returned by [`ResponseCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// All stored entries, expired ones included.
    pub size: usize,
    /// Entries still within their TTL.
    pub entries: usize,
    pub expired: usize,
}

pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
}

impl ResponseCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A fresh cached response with `cached` set, or `None`. An expired
    /// entry found here is deleted.
    pub fn get(&self, request: &AgentRequest) -> Option<AgentResponse> {
        let key = fingerprint(request);
        let mut entries = self.lock();
        let entry = entries.get(&key)?;

        if entry.is_expired(Instant::now()) {
            entries.remove(&key);
            tracing::debug!(doc = %request.doc_path, "cache entry expired");
            return None;
        }

        tracing::debug!(doc = %request.doc_path, "cache hit");
        let mut response = entry.response.clone();
        response.cached = true;
        Some(response)
    }

    /// Store `response`, replacing any entry with the same fingerprint.
    /// Expired entries are swept first.
    pub fn set(&self, request: &AgentRequest, response: &AgentResponse, ttl: Option<Duration>) {
        let now = Instant::now();
        let mut entries = self.lock();
        entries.retain(|_, entry| !entry.is_expired(now));
        entries.insert(
            fingerprint(request),
            CacheEntry {
                response: response.clone(),
                stored_at: now,
                ttl: ttl.unwrap_or(self.default_ttl),
            },
        );
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn size(&self) -> usize {
        self.lock().len()
    }

    /// Count entries without evicting anything.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let entries = self.lock();
        let expired = entries.values().filter(|e| e.is_expired(now)).count();
        CacheStats {
            size: entries.len(),
            entries: entries.len() - expired,
            expired,
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

/// Stable cache key for `request`.
pub fn fingerprint(request: &AgentRequest) -> String {
    json!({
        "docPath": request.doc_path,
        "docTitle": request.doc_title,
        "contentHash": string_hash(&request.doc_content),
        "fileCount": request.available_files.len(),
        "folderCount": request.available_folders.len(),
    })
    .to_string()
}

/// 31-multiplier rolling hash over UTF-16 code units, rendered in base 36.
fn string_hash(text: &str) -> String {
    let hash = text
        .encode_utf16()
        .fold(0i32, |acc, unit| acc.wrapping_mul(31).wrapping_add(unit as i32));
    let mut n = hash.unsigned_abs();
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(std::char::from_digit(n % 36, 36).unwrap_or('0'));
        n /= 36;
    }
    if hash < 0 {
        digits.push('-');
    }
    digits.iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Confidence;

    fn request(content: &str) -> AgentRequest {
        AgentRequest {
            doc_path: "docs/storage.md".into(),
            doc_title: "Storage".into(),
            doc_content: content.into(),
            available_files: vec!["src/a.ts".into(), "src/b.ts".into()],
            available_folders: vec!["src".into()],
            existing_mapping: None,
        }
    }

    fn response() -> AgentResponse {
        AgentResponse {
            files: vec!["src/a.ts".into()],
            folders: vec![],
            confidence: Confidence::High,
            reasoning: vec!["r".into()],
            tokens_used: 42,
            tool_calls: 3,
            model: "m".into(),
            cached: false,
        }
    }

    #[test]
    fn round_trip_marks_cached_without_touching_store() {
        let cache = ResponseCache::default();
        let req = request("body");
        cache.set(&req, &response(), None);

        let hit = cache.get(&req).unwrap();
        assert!(hit.cached);
        assert_eq!(AgentResponse { cached: false, ..hit }, response());

        let stored = cache.lock().values().next().unwrap().response.clone();
        assert!(!stored.cached);
    }

    #[test]
    fn miss_on_different_content() {
        let cache = ResponseCache::default();
        cache.set(&request("one"), &response(), None);
        assert!(cache.get(&request("two")).is_none());
    }

    #[test]
    fn fingerprint_ignores_file_identity() {
        let a = request("x");
        let mut b = request("x");
        b.available_files = vec!["lib/other.rs".into(), "lib/more.rs".into()];
        assert_eq!(fingerprint(&a), fingerprint(&b));

        b.available_files.push("lib/third.rs".into());
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn expired_entry_is_evicted_on_get() {
        let cache = ResponseCache::default();
        let req = request("body");
        cache.set(&req, &response(), Some(Duration::from_millis(5)));
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(cache.size(), 1);
        assert!(cache.get(&req).is_none());
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn stats_do_not_evict() {
        let cache = ResponseCache::default();
        cache.set(&request("old"), &response(), Some(Duration::from_millis(5)));
        std::thread::sleep(Duration::from_millis(20));
        cache.lock().insert(
            "fresh".into(),
            CacheEntry {
                response: response(),
                stored_at: Instant::now(),
                ttl: DEFAULT_TTL,
            },
        );

        let stats = cache.stats();
        assert_eq!(
            stats,
            CacheStats {
                size: 2,
                entries: 1,
                expired: 1
            }
        );
        assert_eq!(cache.size(), 2);
    }

    #[test]
    fn set_sweeps_expired_entries() {
        let cache = ResponseCache::default();
        cache.set(&request("old"), &response(), Some(Duration::from_millis(5)));
        std::thread::sleep(Duration::from_millis(20));
        cache.set(&request("new"), &response(), None);
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn clear_empties() {
        let cache = ResponseCache::default();
        cache.set(&request("a"), &response(), None);
        cache.set(&request("b"), &response(), None);
        assert_eq!(cache.size(), 2);
        cache.clear();
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn string_hash_is_deterministic() {
        assert_eq!(string_hash(""), "0");
        assert_eq!(string_hash("a"), "2p");
        assert_eq!(string_hash("hello"), string_hash("hello"));
        assert_ne!(string_hash("hello"), string_hash("hellp"));
    }
}

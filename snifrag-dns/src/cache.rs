//! DoH cache with TTL awareness

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Subtracted from every answer TTL so entries die a little before the
/// authoritative record does.
const TTL_MARGIN_SECS: i64 = 10;

/// A single cached resolution
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Resolved IP, as returned by the DoH answer `data` field
    pub ip: String,
    /// Unix seconds after which the entry must not be served
    pub expires_at: i64,
}

impl CacheEntry {
    fn is_expired(&self, now: i64) -> bool {
        self.expires_at < now
    }
}

/// TTL-aware cache keyed by `"{name_lowercased}/{qtype}"`.
///
/// Entries are never mutated in place: a refresh inserts a new entry, and
/// expired entries are dropped on access.
pub struct DohCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl DohCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a live entry, removing it if it has expired.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = unix_now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    debug!("doh cache hit: {}", key);
                    return Some(entry.ip.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: drop it so the caller re-resolves.
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(key) {
            if entry.is_expired(unix_now()) {
                debug!("doh cache expired: {}", key);
                entries.remove(key);
            } else {
                return Some(entry.ip.clone());
            }
        }
        None
    }

    pub fn insert(&self, key: String, ip: String, ttl: u32) {
        let entry = CacheEntry {
            ip,
            expires_at: unix_now() + i64::from(ttl) - TTL_MARGIN_SECS,
        };
        debug!("doh cache insert: {} (expires_at={})", key, entry.expires_at);
        self.entries.write().insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for DohCache {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_basic() {
        let cache = DohCache::new();
        cache.insert("example.com/A".to_string(), "93.184.216.34".to_string(), 300);

        assert_eq!(
            cache.get("example.com/A").as_deref(),
            Some("93.184.216.34")
        );
        assert_eq!(cache.len(), 1);
        assert!(cache.get("example.com/AAAA").is_none());
    }

    #[test]
    fn test_cache_expiry_on_read() {
        let cache = DohCache::new();
        // TTL below the safety margin puts expires_at in the past.
        cache.insert("stale.test/A".to_string(), "203.0.113.1".to_string(), 0);

        assert!(cache.get("stale.test/A").is_none());
        // The expired entry was removed, not just skipped.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_refresh_replaces_entry() {
        let cache = DohCache::new();
        cache.insert("example.com/A".to_string(), "192.0.2.1".to_string(), 300);
        cache.insert("example.com/A".to_string(), "192.0.2.2".to_string(), 300);

        assert_eq!(cache.get("example.com/A").as_deref(), Some("192.0.2.2"));
        assert_eq!(cache.len(), 1);
    }
}

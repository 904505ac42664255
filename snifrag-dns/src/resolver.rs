//! Name resolution with caching and single-flight coordination

use crate::cache::DohCache;
use crate::doh::DohTransport;
use crate::error::Result;
use crate::{lookup_key, RecordType};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Hosts that must never be resolved through the tunnel: the DoH endpoint is
/// itself reached through this proxy, so these break the bootstrap cycle.
const BOOTSTRAP_HOSTS: [&str; 2] = ["cloudflare-dns.com", "one.one.one.one"];
const BOOTSTRAP_IP: &str = "104.16.249.249";

/// DoH resolver shared by every connection.
///
/// The cache and the in-flight map share the same key space; for any key at
/// most one remote query runs at a time. Waiters block on the leader's gate
/// and then re-read the cache, which holds the authoritative value.
pub struct DohResolver {
    cache: DohCache,
    inflight: DashMap<String, Arc<Mutex<()>>>,
    transport: Arc<dyn DohTransport>,
}

impl DohResolver {
    pub fn new(transport: Arc<dyn DohTransport>) -> Self {
        Self {
            cache: DohCache::new(),
            inflight: DashMap::new(),
            transport,
        }
    }

    /// Resolve `name` to an IP string, consulting the cache first.
    pub async fn resolve(&self, name: &str, qtype: RecordType) -> Result<String> {
        if qtype == RecordType::A
            && BOOTSTRAP_HOSTS
                .iter()
                .any(|h| h.eq_ignore_ascii_case(name))
        {
            return Ok(BOOTSTRAP_IP.to_string());
        }

        let key = lookup_key(name, qtype);
        loop {
            if let Some(ip) = self.cache.get(&key) {
                return Ok(ip);
            }

            let gate = self
                .inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();

            match gate.clone().try_lock_owned() {
                Ok(_leader) => {
                    // Another leader may have published between our cache miss
                    // and taking the gate.
                    if let Some(ip) = self.cache.get(&key) {
                        self.inflight.remove(&key);
                        return Ok(ip);
                    }

                    let result = self.transport.query(name, qtype).await;

                    // Publish to the cache first, then clear the marker: a
                    // caller arriving after the marker is gone must find the
                    // value, or it would start a duplicate query. The marker
                    // still goes away on every exit path.
                    return match result {
                        Ok(answer) => {
                            debug!("resolved {} -> {}", key, answer.ip);
                            self.cache.insert(key.clone(), answer.ip.clone(), answer.ttl);
                            self.inflight.remove(&key);
                            Ok(answer.ip)
                        }
                        Err(e) => {
                            debug!("resolution failed for {}: {}", key, e);
                            self.inflight.remove(&key);
                            Err(e)
                        }
                    };
                }
                Err(_) => {
                    // Somebody else is resolving this key. Wait for the gate
                    // to open, then start over from the cache.
                    let _ = gate.lock().await;
                }
            }
        }
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

//! TTL-bounded store for reputation records.

use crate::providers::ReputationRecord;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Cached reputation record.
#[derive(Debug, Clone)]
pub struct CachedRecord {
    /// The record as returned by the provider.
    pub record: ReputationRecord,
    /// When this entry was cached.
    pub cached_at: Instant,
    /// TTL for this entry.
    pub ttl: Duration,
}

impl CachedRecord {
    /// Check if this cache entry has expired.
    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }
}

/// Thread-safe TTL store keyed by IP address.
pub struct ReputationStore {
    entries: RwLock<HashMap<IpAddr, CachedRecord>>,
    default_ttl: Duration,
    max_entries: usize,
}

impl ReputationStore {
    /// Create a new store.
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Get a record if present and not expired.
    pub fn get(&self, ip: &IpAddr) -> Option<ReputationRecord> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(ip)?;

        if entry.is_expired() {
            // Left in place; cleanup() or the next set() drops it
            None
        } else {
            Some(entry.record.clone())
        }
    }

    /// Store a record with the default TTL.
    pub fn set(&self, record: ReputationRecord) {
        self.set_with_ttl(record, self.default_ttl);
    }

    /// Store a record with a custom TTL. Last write wins.
    pub fn set_with_ttl(&self, record: ReputationRecord, ttl: Duration) {
        let ip = record.ip;
        let entry = CachedRecord {
            record,
            cached_at: Instant::now(),
            ttl,
        };

        if let Ok(mut entries) = self.entries.write() {
            if entries.len() >= self.max_entries && !entries.contains_key(&ip) {
                entries.retain(|_, v| !v.is_expired());

                if entries.len() >= self.max_entries {
                    if let Some(oldest) = entries
                        .iter()
                        .min_by_key(|(_, v)| v.cached_at)
                        .map(|(k, _)| *k)
                    {
                        entries.remove(&oldest);
                    }
                }
            }

            entries.insert(ip, entry);
        }
    }

    /// Drop the entry for `ip`, if any.
    pub fn remove(&self, ip: &IpAddr) -> bool {
        self.entries
            .write()
            .map(|mut e| e.remove(ip).is_some())
            .unwrap_or(false)
    }

    /// Remove expired entries.
    pub fn cleanup(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.retain(|_, v| !v.is_expired());
        }
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn record(ip: &str, isp: &str) -> ReputationRecord {
        ReputationRecord::new(ip.parse().unwrap(), isp, "15169")
    }

    #[test]
    fn test_store_set_and_get() {
        let store = ReputationStore::new(Duration::from_secs(3600), 1000);
        let ip: IpAddr = "192.168.1.1".parse().unwrap();

        store.set(record("192.168.1.1", "Example ISP"));

        let result = store.get(&ip).unwrap();
        assert_eq!(result.isp, "Example ISP");
        assert_eq!(result.asn, "15169");
    }

    #[test]
    fn test_store_miss() {
        let store = ReputationStore::new(Duration::from_secs(3600), 1000);
        let ip: IpAddr = "192.168.1.1".parse().unwrap();

        assert!(store.get(&ip).is_none());
    }

    #[test]
    fn test_store_expiration() {
        let store = ReputationStore::new(Duration::ZERO, 1000);
        let ip: IpAddr = "192.168.1.1".parse().unwrap();

        store.set(record("192.168.1.1", "isp"));

        thread::sleep(Duration::from_millis(10));
        assert!(store.get(&ip).is_none());
    }

    #[test]
    fn test_store_custom_ttl() {
        let store = ReputationStore::new(Duration::from_secs(3600), 1000);
        let ip: IpAddr = "192.168.1.1".parse().unwrap();

        store.set_with_ttl(record("192.168.1.1", "isp"), Duration::from_millis(1));

        thread::sleep(Duration::from_millis(10));
        assert!(store.get(&ip).is_none());
    }

    #[test]
    fn test_store_last_write_wins() {
        let store = ReputationStore::new(Duration::from_secs(3600), 1000);
        let ip: IpAddr = "10.1.1.1".parse().unwrap();

        store.set(record("10.1.1.1", "first"));
        store.set(record("10.1.1.1", "second"));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&ip).unwrap().isp, "second");
    }

    #[test]
    fn test_store_max_entries() {
        let store = ReputationStore::new(Duration::from_secs(3600), 2);
        let ip1: IpAddr = "192.168.1.1".parse().unwrap();
        let ip3: IpAddr = "192.168.1.3".parse().unwrap();

        store.set(record("192.168.1.1", "a"));
        thread::sleep(Duration::from_millis(1));
        store.set(record("192.168.1.2", "b"));
        thread::sleep(Duration::from_millis(1));
        store.set(record("192.168.1.3", "c"));

        assert_eq!(store.len(), 2);
        assert!(store.get(&ip1).is_none());
        assert!(store.get(&ip3).is_some());
    }

    #[test]
    fn test_store_remove() {
        let store = ReputationStore::new(Duration::from_secs(3600), 1000);
        let ip: IpAddr = "192.168.1.1".parse().unwrap();

        store.set(record("192.168.1.1", "isp"));
        assert!(store.remove(&ip));
        assert!(!store.remove(&ip));
        assert!(store.get(&ip).is_none());
    }

    #[test]
    fn test_store_cleanup() {
        let store = ReputationStore::new(Duration::ZERO, 1000);

        store.set(record("192.168.1.1", "a"));
        store.set(record("192.168.1.2", "b"));

        thread::sleep(Duration::from_millis(10));
        store.cleanup();

        assert!(store.is_empty());
    }

    #[test]
    fn test_store_clear() {
        let store = ReputationStore::new(Duration::from_secs(3600), 1000);

        store.set(record("192.168.1.1", "a"));
        store.set(record("192.168.1.2", "b"));
        assert_eq!(store.len(), 2);

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_cached_record_is_expired() {
        let entry = CachedRecord {
            record: record("1.1.1.1", "isp"),
            cached_at: Instant::now() - Duration::from_secs(100),
            ttl: Duration::from_secs(60),
        };
        assert!(entry.is_expired());

        let fresh = CachedRecord {
            record: record("1.1.1.1", "isp"),
            cached_at: Instant::now(),
            ttl: Duration::from_secs(60),
        };
        assert!(!fresh.is_expired());
    }
}

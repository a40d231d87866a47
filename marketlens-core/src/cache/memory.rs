//! In-process hash store backed by `DashMap`.

use super::store::{HashStore, KeyInfo};
use super::CacheError;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    fields: BTreeMap<String, Vec<u8>>,
    /// `None` when the TTL runs past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    map: DashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HashStore for MemoryStore {
    fn write_fields(&self, key: &str, fields: Vec<(String, Vec<u8>)>, ttl: Duration) -> Result<(), CacheError> {
        let now = Instant::now();
        // The entry guard holds the shard lock, so field writes and the TTL reset
        // land together.
        let mut entry = self.map.entry(key.to_string()).or_insert_with(|| Entry {
            fields: BTreeMap::new(),
            expires_at: Some(now),
        });
        if entry.is_expired(now) {
            entry.fields.clear();
        }
        entry.fields.extend(fields);
        entry.expires_at = now.checked_add(ttl);
        Ok(())
    }

    fn read_fields(&self, key: &str) -> Result<Option<Vec<(String, Vec<u8>)>>, CacheError> {
        let now = Instant::now();
        let expired = match self.map.get(key) {
            None => return Ok(None),
            Some(e) if e.is_expired(now) => true,
            Some(e) => {
                if e.fields.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(e.fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect()));
            }
        };
        if expired {
            self.map.remove_if(key, |_, e| e.is_expired(now));
        }
        Ok(None)
    }

    fn keys(&self) -> Result<Vec<KeyInfo>, CacheError> {
        let now = Instant::now();
        let mut out: Vec<KeyInfo> = self
            .map
            .iter()
            .filter(|e| !e.is_expired(now))
            .map(|e| KeyInfo {
                key: e.key().clone(),
                fields: e.fields.len(),
                expires_in: e.expires_at.map(|at| at.saturating_duration_since(now)),
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<(String, Vec<u8>)> {
        names.iter().map(|n| (n.to_string(), n.as_bytes().to_vec())).collect()
    }

    #[test]
    fn absent_key_reads_none() {
        let s = MemoryStore::new();
        assert!(s.read_fields("nope").unwrap().is_none());
    }

    #[test]
    fn writes_merge_fields_and_refresh_ttl() {
        let s = MemoryStore::new();
        s.write_fields("k", fields(&["a", "b"]), Duration::from_secs(60)).unwrap();
        s.write_fields("k", fields(&["b", "c"]), Duration::from_secs(120)).unwrap();
        let got = s.read_fields("k").unwrap().unwrap();
        assert_eq!(got.len(), 3);
        let info = &s.keys().unwrap()[0];
        assert_eq!(info.fields, 3);
        assert!(info.expires_in.unwrap() > Duration::from_secs(60));
    }

    #[test]
    fn expired_keys_read_absent() {
        let s = MemoryStore::new();
        s.write_fields("k", fields(&["a"]), Duration::from_millis(5)).unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert!(s.read_fields("k").unwrap().is_none());
        assert!(s.keys().unwrap().is_empty());

        s.write_fields("k", fields(&["b"]), Duration::from_secs(60)).unwrap();
        let got = s.read_fields("k").unwrap().unwrap();
        assert_eq!(got, fields(&["b"]));
    }

    #[test]
    fn unrepresentable_ttl_never_expires() {
        let s = MemoryStore::new();
        s.write_fields("k", fields(&["a"]), Duration::MAX).unwrap();
        assert_eq!(s.read_fields("k").unwrap().unwrap(), fields(&["a"]));
        let info = &s.keys().unwrap()[0];
        assert_eq!(info.expires_in, None);
    }
}

//! Durable hash store on the local filesystem.
//!
//! Layout: `{root}/{blake3(key)}/meta.json` plus one `{blake3(field)}.rec` file
//! per field.
//!
//! - Atomic writes (write to .tmp, rename into place)
//! - Every field file carries a blake3 checksum; a mismatch quarantines the file
//!   (`.rec.quarantined`) and the field is skipped
//! - `meta.json` keeps the original key, the field → file map and the expiry

use super::store::{HashStore, KeyInfo};
use super::CacheError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

const CHECKSUM_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyMeta {
    key: String,
    /// Unix milliseconds.
    expires_at_ms: u64,
    /// field name → file name
    fields: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| CacheError::Io(format!("create {}: {e}", root.display())))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_dir(&self, key: &str) -> PathBuf {
        self.root.join(blake3::hash(key.as_bytes()).to_hex().as_str())
    }

    fn meta_path(dir: &Path) -> PathBuf {
        dir.join("meta.json")
    }

    fn field_file(field: &str) -> String {
        format!("{}.rec", &blake3::hash(field.as_bytes()).to_hex()[..32])
    }

    /// Removes an expired key directory under the write lock. The meta is read
    /// again once the lock is held: a writer may have refreshed the key since the
    /// caller saw it expired.
    fn evict_if_expired(&self, dir: &Path) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        match Self::read_meta(dir) {
            Ok(Some(meta)) if meta.expires_at_ms > now_ms() => {}
            _ => {
                let _ = fs::remove_dir_all(dir);
            }
        }
    }

    fn read_meta(dir: &Path) -> Result<Option<KeyMeta>, CacheError> {
        let path = Self::meta_path(dir);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| CacheError::Backend(format!("meta {}: {e}", path.display())))
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// Write to `{path}.tmp`, then rename into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|e| CacheError::Io(format!("write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        CacheError::Io(format!("atomic rename failed: {e}"))
    })
}

fn quarantine(path: &Path, reason: &str) {
    let target = path.with_extension("rec.quarantined");
    warn!(path = %path.display(), reason, "quarantining corrupt cache field");
    let _ = fs::rename(path, target);
}

impl HashStore for FileStore {
    fn write_fields(&self, key: &str, fields: Vec<(String, Vec<u8>)>, ttl: Duration) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let dir = self.key_dir(key);
        fs::create_dir_all(&dir).map_err(|e| CacheError::Io(format!("failed to create dir: {e}")))?;

        let now = now_ms();
        let mut meta = match Self::read_meta(&dir)? {
            Some(m) if m.expires_at_ms > now => m,
            _ => KeyMeta {
                key: key.to_string(),
                expires_at_ms: now,
                fields: BTreeMap::new(),
            },
        };

        for (field, bytes) in fields {
            let file = Self::field_file(&field);
            let mut framed = Vec::with_capacity(CHECKSUM_LEN + bytes.len());
            framed.extend_from_slice(blake3::hash(&bytes).as_bytes());
            framed.extend_from_slice(&bytes);
            write_atomic(&dir.join(&file), &framed)?;
            meta.fields.insert(field, file);
        }

        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        meta.expires_at_ms = now.saturating_add(ttl_ms);
        let json = serde_json::to_vec_pretty(&meta).map_err(|e| CacheError::Backend(format!("meta serialization: {e}")))?;
        write_atomic(&Self::meta_path(&dir), &json)
    }

    fn read_fields(&self, key: &str) -> Result<Option<Vec<(String, Vec<u8>)>>, CacheError> {
        let dir = self.key_dir(key);
        let Some(meta) = Self::read_meta(&dir)? else {
            return Ok(None);
        };
        if meta.expires_at_ms <= now_ms() {
            self.evict_if_expired(&dir);
            return Ok(None);
        }

        let mut out = Vec::with_capacity(meta.fields.len());
        for (field, file) in &meta.fields {
            let path = dir.join(file);
            let framed = match fs::read(&path) {
                Ok(b) => b,
                Err(e) => {
                    warn!(key, field = %field, error = %e, "cache field unreadable, skipping");
                    continue;
                }
            };
            if framed.len() < CHECKSUM_LEN {
                quarantine(&path, "truncated");
                continue;
            }
            let (sum, bytes) = framed.split_at(CHECKSUM_LEN);
            if blake3::hash(bytes).as_bytes() != sum {
                quarantine(&path, "checksum mismatch");
                continue;
            }
            out.push((field.clone(), bytes.to_vec()));
        }
        Ok(if out.is_empty() { None } else { Some(out) })
    }

    fn keys(&self) -> Result<Vec<KeyInfo>, CacheError> {
        let now = now_ms();
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            match Self::read_meta(&path) {
                Ok(Some(meta)) if meta.expires_at_ms > now => out.push(KeyInfo {
                    key: meta.key,
                    fields: meta.fields.len(),
                    expires_in: Some(Duration::from_millis(meta.expires_at_ms - now)),
                }),
                Ok(_) => {}
                Err(e) => warn!(dir = %path.display(), error = %e, "unreadable cache meta"),
            }
        }
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
    fn write_then_read() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path()).unwrap();
        store
            .write_fields("daily:A:600519", fields(&["20240102 00:00:00", "20240103 00:00:00"]), Duration::from_secs(60))
            .unwrap();
        let mut got = store.read_fields("daily:A:600519").unwrap().unwrap();
        got.sort();
        assert_eq!(got, fields(&["20240102 00:00:00", "20240103 00:00:00"]));
        assert_eq!(store.keys().unwrap()[0].key, "daily:A:600519");
        assert!(store.read_fields("daily:A:000001").unwrap().is_none());
    }

    #[test]
    fn survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        FileStore::new(tmp.path())
            .unwrap()
            .write_fields("k", fields(&["a"]), Duration::from_secs(60))
            .unwrap();
        let reopened = FileStore::new(tmp.path()).unwrap();
        assert_eq!(reopened.read_fields("k").unwrap().unwrap().len(), 1);
    }

    #[test]
    fn corrupt_field_is_quarantined_and_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path()).unwrap();
        store.write_fields("k", fields(&["a", "b"]), Duration::from_secs(60)).unwrap();

        let dir = store.key_dir("k");
        let bad = dir.join(FileStore::field_file("a"));
        let mut bytes = fs::read(&bad).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&bad, bytes).unwrap();

        let got = store.read_fields("k").unwrap().unwrap();
        assert_eq!(got, fields(&["b"]));
        assert!(!bad.exists());
        assert!(bad.with_extension("rec.quarantined").exists());
    }

    #[test]
    fn expired_key_is_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path()).unwrap();
        store.write_fields("k", fields(&["a"]), Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.read_fields("k").unwrap().is_none());
        assert!(!store.key_dir("k").exists());
    }

    #[test]
    fn eviction_keeps_a_key_refreshed_after_it_was_seen_expired() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path()).unwrap();
        store.write_fields("k", fields(&["a"]), Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let dir = store.key_dir("k");
        assert!(FileStore::read_meta(&dir).unwrap().unwrap().expires_at_ms <= now_ms());

        // A writer refreshes the key between the reader's expiry check and its eviction.
        store.write_fields("k", fields(&["b"]), Duration::from_secs(60)).unwrap();
        store.evict_if_expired(&dir);

        assert_eq!(store.read_fields("k").unwrap().unwrap(), fields(&["b"]));
    }
}

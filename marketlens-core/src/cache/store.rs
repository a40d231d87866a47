//! `CacheStore`: row-level writes and reads over a `HashStore` backend.

use super::codec;
use super::memory::MemoryStore;
use super::CacheError;
use crate::domain::{Row, Table, Value};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Byte-level hash storage: fields under a key, one TTL per key.
///
/// Implementations are synchronous; `CacheStore` drives them from
/// `spawn_blocking`.
pub trait HashStore: Send + Sync {
    /// Set `fields` under `key` and reset the key's TTL, as one operation.
    fn write_fields(&self, key: &str, fields: Vec<(String, Vec<u8>)>, ttl: Duration) -> Result<(), CacheError>;

    /// All live fields of `key`; `None` if the key is absent or expired.
    fn read_fields(&self, key: &str) -> Result<Option<Vec<(String, Vec<u8>)>>, CacheError>;

    /// Live keys with their field counts.
    fn keys(&self) -> Result<Vec<KeyInfo>, CacheError>;
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct KeyInfo {
    pub key: String,
    pub fields: usize,
    pub expires_in: Option<Duration>,
}

/// Process-wide cache handle. Cheap to clone.
///
/// Every backend failure is logged and surfaces as a miss (`None`) or as zero
/// rows written; nothing here returns an error to the caller.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn HashStore>,
    hits: Arc<DashMap<String, u64>>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore").field("hits", &self.hit_counts()).finish()
    }
}

impl CacheStore {
    pub fn new(backend: Arc<dyn HashStore>) -> Self {
        Self {
            backend,
            hits: Arc::new(DashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Write each row as one field keyed by its date, then refresh the key's TTL.
    ///
    /// Returns the number of rows written. Empty tables and tables without a
    /// `trade_date`/`date` column are skipped.
    pub async fn write_rows(&self, key: &str, table: &Table, ttl: Duration) -> usize {
        if table.is_empty() {
            debug!(key, "skipping cache write for empty table");
            return 0;
        }
        let Some(date_col) = table.date_column() else {
            warn!(key, "table has no date column, not cached");
            return 0;
        };

        let mut fields = Vec::with_capacity(table.len());
        let mut seen: HashMap<String, usize> = HashMap::new();
        for row in table.rows() {
            let Some(mut field) = row.get(date_col).and_then(codec::field_key) else {
                warn!(key, "row without a date value, skipped");
                continue;
            };
            if let Some(code) = row_discriminator(row) {
                field = format!("{field}|{code}");
            }
            let n = seen.entry(field.clone()).or_insert(0);
            *n += 1;
            if *n > 1 {
                field = format!("{field}#{n}");
            }
            match codec::encode_row(row) {
                Ok(bytes) => fields.push((field, bytes)),
                Err(e) => warn!(key, field = %field, error = %e, "failed to encode row"),
            }
        }
        if fields.is_empty() {
            return 0;
        }

        let written = fields.len();
        let backend = Arc::clone(&self.backend);
        let owned_key = key.to_string();
        match tokio::task::spawn_blocking(move || backend.write_fields(&owned_key, fields, ttl)).await {
            Ok(Ok(())) => {
                debug!(key, rows = written, ttl_secs = ttl.as_secs(), "cached rows");
                written
            }
            Ok(Err(e)) => {
                warn!(key, error = %e, "cache write failed");
                0
            }
            Err(e) => {
                warn!(key, error = %e, "cache write task failed");
                0
            }
        }
    }

    /// Read every row under `key`, sorted by its date column.
    ///
    /// `None` means never cached (or expired, or unreadable); a `Some` table is
    /// never empty. A `Some` counts as a hit.
    pub async fn read_rows(&self, key: &str) -> Option<Table> {
        let table = self.load(key).await?;
        *self.hits.entry(key_prefix(key).to_string()).or_insert(0) += 1;
        debug!(key, rows = table.len(), "cache hit");
        Some(table)
    }

    /// Write `table` under `key`, then return every row now stored there.
    ///
    /// Used to merge a freshly fetched tail into older rows; the reload is
    /// not a hit.
    pub async fn upsert_rows(&self, key: &str, table: &Table, ttl: Duration) -> Option<Table> {
        self.write_rows(key, table, ttl).await;
        self.load(key).await
    }

    async fn load(&self, key: &str) -> Option<Table> {
        let backend = Arc::clone(&self.backend);
        let owned_key = key.to_string();
        let fields = match tokio::task::spawn_blocking(move || backend.read_fields(&owned_key)).await {
            Ok(Ok(Some(fields))) => fields,
            Ok(Ok(None)) => {
                debug!(key, "cache miss");
                return None;
            }
            Ok(Err(e)) => {
                warn!(key, error = %e, "cache read failed, treating as miss");
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "cache read task failed, treating as miss");
                return None;
            }
        };

        let mut table = Table::new();
        for (field, bytes) in fields {
            match codec::decode_row(&bytes) {
                Ok(row) => table.push(row),
                Err(e) => warn!(key, field = %field, error = %e, "failed to decode cached row"),
            }
        }
        if table.is_empty() {
            return None;
        }
        if let Some(col) = table.date_column() {
            table.sort_by_column(col);
        }
        Some(table)
    }

    /// Successful reads per key prefix (text before the first `:`).
    pub fn hit_counts(&self) -> BTreeMap<String, u64> {
        self.hits.iter().map(|e| (e.key().clone(), *e.value())).collect()
    }

    /// Live keys, for status reporting.
    pub async fn keys(&self) -> Vec<KeyInfo> {
        let backend = Arc::clone(&self.backend);
        match tokio::task::spawn_blocking(move || backend.keys()).await {
            Ok(Ok(keys)) => keys,
            Ok(Err(e)) => {
                warn!(error = %e, "listing cache keys failed");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "listing cache keys failed");
                Vec::new()
            }
        }
    }
}

/// Cross-sectional tables carry many rows per date; the instrument code
/// keeps their fields apart.
fn row_discriminator(row: &Row) -> Option<&str> {
    ["ts_code", "symbol"].iter().find_map(|c| row.get(*c).and_then(Value::as_str))
}

fn key_prefix(key: &str) -> &str {
    key.split(':').next().unwrap_or(key)
}

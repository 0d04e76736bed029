//! Durable byte cache for voice assets.
//!
//! [`BlobCache`] is the capability the style cache consumes; every call is
//! fallible and callers treat failures as a cache miss.  [`SqliteBlobCache`]
//! stores blobs keyed by the SHA-256 of their URL, with LRU eviction once
//! the total stored size exceeds a limit.  Async access runs the SQLite
//! work on the blocking pool.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Default size limit for the on-disk cache, in megabytes.
pub const DEFAULT_MAX_SIZE_MB: u64 = 200;

/// Get/put byte storage keyed by string.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobCache: Send + Sync {
    /// Fetch the bytes stored under `key`, or `None` on a miss.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `bytes` under `key`, replacing any previous value.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// SQLite-backed [`BlobCache`].  Clones share one connection.
#[derive(Clone)]
pub struct SqliteBlobCache {
    conn: Arc<Mutex<Connection>>,
    /// Maximum total size of stored blobs in bytes.
    max_total_bytes: u64,
}

impl SqliteBlobCache {
    /// Open (or create) a cache database at the given path.
    pub fn open(db_path: &str) -> Result<Self> {
        Self::open_with_limit(db_path, DEFAULT_MAX_SIZE_MB)
    }

    /// Open with a custom max total size in megabytes.
    pub fn open_with_limit(db_path: &str, max_total_size_mb: u64) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create cache directory {}", parent.display()))?;
            }
        }
        let conn = Connection::open(db_path).context("failed to open voice cache database")?;
        Self::with_connection(conn, max_total_size_mb * 1024 * 1024)
    }

    /// Create an in-memory cache (for testing).
    pub fn in_memory(max_total_size_mb: u64) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, max_total_size_mb * 1024 * 1024)
    }

    fn with_connection(conn: Connection, max_total_bytes: u64) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS blob_cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                cache_key TEXT NOT NULL UNIQUE,
                url TEXT NOT NULL,
                data BLOB NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                last_used_at TEXT NOT NULL DEFAULT (datetime('now')),
                use_count INTEGER NOT NULL DEFAULT 1,
                access_seq INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_blob_cache_key ON blob_cache(cache_key);
            ",
        )
        .context("failed to initialize voice cache schema")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            max_total_bytes,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("voice cache connection lock poisoned"))
    }

    /// Look up a blob by key.  On hit, bumps its recency.
    pub fn lookup(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn()?;
        let hashed = cache_key(key);

        let result = conn.query_row(
            "SELECT data FROM blob_cache WHERE cache_key = ?1",
            params![hashed],
            |row| row.get::<_, Vec<u8>>(0),
        );

        match result {
            Ok(data) => {
                conn.execute(
                    "UPDATE blob_cache SET last_used_at = datetime('now'), use_count = use_count + 1, access_seq = (SELECT COALESCE(MAX(access_seq), 0) + 1 FROM blob_cache) WHERE cache_key = ?1",
                    params![hashed],
                )?;
                debug!(key, bytes = data.len(), "Voice cache hit");
                Ok(Some(data))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                debug!(key, "Voice cache miss");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Insert or replace a blob, then evict LRU entries over the size limit.
    pub fn insert(&self, key: &str, data: &[u8]) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO blob_cache (cache_key, url, data, access_seq)
             VALUES (?1, ?2, ?3, (SELECT COALESCE(MAX(access_seq), 0) + 1 FROM blob_cache))",
            params![cache_key(key), key, data],
        )?;
        debug!(key, bytes = data.len(), "Voice cache insert");
        Self::evict_if_needed(&conn, self.max_total_bytes)
    }

    /// Total size of stored blobs in bytes.
    pub fn total_size_bytes(&self) -> Result<u64> {
        let conn = self.conn()?;
        Self::total_size(&conn)
    }

    /// Number of stored blobs.
    pub fn entry_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM blob_cache", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Remove all stored blobs.
    pub fn clear(&self) -> Result<()> {
        self.conn()?.execute("DELETE FROM blob_cache", [])?;
        Ok(())
    }

    fn total_size(conn: &Connection) -> Result<u64> {
        let size: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(length(data)), 0) FROM blob_cache",
                [],
                |row| row.get(0),
            )
            .context("failed to query total cache size")?;
        Ok(size as u64)
    }

    fn evict_if_needed(conn: &Connection, max_total_bytes: u64) -> Result<()> {
        loop {
            let total = Self::total_size(conn)?;
            if total <= max_total_bytes {
                break;
            }

            let deleted = conn.execute(
                "DELETE FROM blob_cache WHERE id = (
                    SELECT id FROM blob_cache ORDER BY access_seq ASC LIMIT 1
                )",
                [],
            )?;
            if deleted == 0 {
                break;
            }

            debug!(
                total_bytes = total,
                limit_bytes = max_total_bytes,
                "Voice cache: evicted LRU entry"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl BlobCache for SqliteBlobCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let cache = self.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || cache.lookup(&key))
            .await
            .context("voice cache lookup task failed")?
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let cache = self.clone();
        let key = key.to_string();
        let bytes = bytes.to_vec();
        tokio::task::spawn_blocking(move || cache.insert(&key, &bytes))
            .await
            .context("voice cache insert task failed")?
    }
}

/// SHA-256 hex digest of a cache key.
pub fn cache_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL_A: &str = "https://example.com/voices/af_heart.bin";
    const URL_B: &str = "https://example.com/voices/af_bella.bin";
    const URL_C: &str = "https://example.com/voices/am_adam.bin";

    fn tiny_cache(max_total_bytes: u64) -> SqliteBlobCache {
        SqliteBlobCache::with_connection(Connection::open_in_memory().unwrap(), max_total_bytes)
            .unwrap()
    }

    #[test]
    fn cache_key_is_sha256_hex() {
        let key = cache_key(URL_A);
        assert_eq!(key.len(), 64);
        assert_eq!(key, cache_key(URL_A));
        assert_ne!(key, cache_key(URL_B));
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let cache = SqliteBlobCache::in_memory(10).unwrap();
        assert!(cache.get(URL_A).await.unwrap().is_none());

        cache.put(URL_A, &[1, 2, 3, 4]).await.unwrap();
        assert_eq!(cache.get(URL_A).await.unwrap(), Some(vec![1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn concurrent_async_access_shares_one_database() {
        let cache = SqliteBlobCache::in_memory(10).unwrap();
        let (a, b) = tokio::join!(cache.put(URL_A, &[1u8; 64]), cache.put(URL_B, &[2u8; 64]));
        a.unwrap();
        b.unwrap();

        let clone = cache.clone();
        let (a, b) = tokio::join!(cache.get(URL_A), clone.get(URL_B));
        assert_eq!(a.unwrap(), Some(vec![1u8; 64]));
        assert_eq!(b.unwrap(), Some(vec![2u8; 64]));
        assert_eq!(clone.entry_count().unwrap(), 2);
    }

    #[test]
    fn put_replaces_existing() {
        let cache = SqliteBlobCache::in_memory(10).unwrap();
        cache.insert(URL_A, &[1, 2, 3]).unwrap();
        cache.insert(URL_A, &[4, 5, 6, 7]).unwrap();

        assert_eq!(cache.entry_count().unwrap(), 1);
        assert_eq!(cache.lookup(URL_A).unwrap(), Some(vec![4, 5, 6, 7]));
    }

    #[test]
    fn total_size_tracking() {
        let cache = SqliteBlobCache::in_memory(10).unwrap();
        assert_eq!(cache.total_size_bytes().unwrap(), 0);
        cache.insert(URL_A, &[0u8; 1000]).unwrap();
        cache.insert(URL_B, &[0u8; 1000]).unwrap();
        assert_eq!(cache.total_size_bytes().unwrap(), 2000);
    }

    #[test]
    fn lru_eviction() {
        let cache = tiny_cache(100);
        cache.insert(URL_A, &[0u8; 50]).unwrap();
        cache.insert(URL_B, &[0u8; 50]).unwrap();

        // Touch A so B becomes least recently used.
        cache.lookup(URL_A).unwrap();
        cache.insert(URL_C, &[0u8; 50]).unwrap();

        assert!(cache.total_size_bytes().unwrap() <= 100);
        assert!(cache.lookup(URL_B).unwrap().is_none());
        assert!(cache.lookup(URL_A).unwrap().is_some());
        assert!(cache.lookup(URL_C).unwrap().is_some());
    }

    #[test]
    fn clear_removes_all() {
        let cache = SqliteBlobCache::in_memory(10).unwrap();
        cache.insert(URL_A, &[0; 10]).unwrap();
        cache.clear().unwrap();
        assert_eq!(cache.entry_count().unwrap(), 0);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("voices.db");
        let path = path.to_str().unwrap();

        {
            let cache = SqliteBlobCache::open(path).unwrap();
            cache.insert(URL_A, &[9, 8, 7]).unwrap();
        }

        let reopened = SqliteBlobCache::open(path).unwrap();
        assert_eq!(reopened.lookup(URL_A).unwrap(), Some(vec![9, 8, 7]));
    }
}

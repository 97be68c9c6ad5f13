//! polwatch persistence: a small key-value store with per-key expiry. [`RedisKv`]
//! is shared by replicas on any node; [`SqliteKv`] is a file for processes on one host.

#![forbid(unsafe_code)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use metrics::{counter, histogram};
use parking_lot::Mutex;
use rusqlite::OptionalExtension;
use tracing::debug;

mod redis_kv;

pub use redis_kv::RedisKv;

/// Key-value operations the shared result cache is built on.
pub trait KvStore: Send + Sync {
    /// Insert or overwrite. `None` means the key never expires.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    fn get(&self, key: &str) -> Result<Option<String>>;
    /// Live keys starting with `prefix`.
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;
    /// Give a live key an expiry; returns false if the key does not exist.
    fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
    fn del(&self, keys: &[String]) -> Result<usize>;
    /// Physically drop expired keys. Reads already ignore them.
    fn purge_expired(&self) -> Result<usize> {
        Ok(0)
    }
}

/// SQLite-backed store. WAL mode plus a busy timeout lets processes on the same host share one file.
/// WAL needs shared memory, so the file must not live on a network filesystem.
pub struct SqliteKv {
    db: Mutex<rusqlite::Connection>,
}

impl SqliteKv {
    pub fn open(path: &str) -> Result<Self> {
        let db = rusqlite::Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        Self::init(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(rusqlite::Connection::open_in_memory().context("opening in-memory sqlite db")?)
    }

    fn init(db: rusqlite::Connection) -> Result<Self> {
        let started = std::time::Instant::now();
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        db.busy_timeout(Duration::from_secs(5)).context("setting busy timeout")?;
        db.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                expires_at INTEGER
            )",
            [],
        )
        .context("creating kv table")?;
        db.execute("CREATE INDEX IF NOT EXISTS idx_kv_expires ON kv(expires_at)", []).ok();
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(Self { db: Mutex::new(db) })
    }
}

impl KvStore for SqliteKv {
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let started = std::time::Instant::now();
        let expires_at = ttl.map(|t| now_ms() + t.as_millis() as i64);
        let db = self.db.lock();
        db.execute(
            "INSERT INTO kv(key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
            (key, value, expires_at),
        )
        .with_context(|| format!("setting {}", key))?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock();
        let v = db
            .query_row(
                "SELECT value FROM kv WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?2)",
                (key, now_ms()),
                |row| row.get::<_, String>(0),
            )
            .optional()
            .with_context(|| format!("getting {}", key))?;
        Ok(v)
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let started = std::time::Instant::now();
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT key FROM kv
             WHERE substr(key, 1, length(?1)) = ?1 AND (expires_at IS NULL OR expires_at > ?2)
             ORDER BY key",
        )?;
        let mut rows = stmt.query((prefix, now_ms()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row.get::<_, String>(0)?);
        }
        histogram!("persist_scan_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = now_ms();
        let db = self.db.lock();
        let n = db.execute(
            "UPDATE kv SET expires_at = ?2 WHERE key = ?1 AND (expires_at IS NULL OR expires_at > ?3)",
            (key, now + ttl.as_millis() as i64, now),
        )?;
        Ok(n > 0)
    }

    fn del(&self, keys: &[String]) -> Result<usize> {
        let mut db = self.db.lock();
        let tx = db.transaction()?;
        let mut n = 0;
        for k in keys {
            n += tx.execute("DELETE FROM kv WHERE key = ?1", [k])?;
        }
        tx.commit()?;
        Ok(n)
    }

    fn purge_expired(&self) -> Result<usize> {
        let db = self.db.lock();
        let n = db.execute("DELETE FROM kv WHERE expires_at IS NOT NULL AND expires_at <= ?1", [now_ms()])?;
        if n > 0 {
            debug!(purged = n, "expired keys removed");
        }
        Ok(n)
    }
}

fn now_ms() -> i64 {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    now.as_millis() as i64
}

use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use metrics::{counter, histogram};
use parking_lot::Mutex;
use redis::{Client, Commands, Connection, RedisResult};
use tracing::{debug, warn};

use crate::KvStore;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis-backed store. Expiry is left to the server, so keys vanish on every
/// replica at once and nothing needs purging.
pub struct RedisKv {
    client: Client,
    conn: Mutex<Option<Connection>>,
}

impl RedisKv {
    /// Parses the url; the connection is opened on first use.
    pub fn open(url: &str) -> Result<Self> {
        let client = Client::open(url).with_context(|| format!("parsing redis url {}", url))?;
        Ok(Self { client, conn: Mutex::new(None) })
    }

    fn with_conn<T>(&self, op: &'static str, f: impl FnOnce(&mut Connection) -> RedisResult<T>) -> Result<T> {
        let mut guard = self.conn.lock();
        if guard.is_none() {
            let conn = self.client.get_connection_with_timeout(CONNECT_TIMEOUT).context("connecting to redis")?;
            counter!("persist_connect_total", 1u64);
            debug!("redis connection opened");
            *guard = Some(conn);
        }
        let res = match guard.as_mut() {
            Some(conn) => f(conn),
            None => return Err(anyhow!("redis connection unavailable")),
        };
        res.or_else(|e| {
            // A broken connection is dropped and reopened by the next call.
            if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
                warn!(op, error = %e, "dropping redis connection");
                *guard = None;
            }
            Err(e).with_context(|| format!("redis {}", op))
        })
    }
}

impl KvStore for RedisKv {
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let started = Instant::now();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl.as_millis().max(1) as u64);
        }
        self.with_conn("set", |c| cmd.query::<()>(c))?;
        histogram!("persist_put_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("persist_put_total", 1u64);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_conn("get", |c| c.get(key))
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let started = Instant::now();
        let pattern = format!("{}*", glob_escape(prefix));
        let mut keys = self.with_conn("scan", |c| {
            let iter = c.scan_match::<_, String>(&pattern)?;
            Ok(iter.collect::<Vec<_>>())
        })?;
        // SCAN may return a key more than once.
        keys.sort();
        keys.dedup();
        histogram!("persist_scan_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(keys)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let ms = ttl.as_millis().max(1) as u64;
        let set: i64 = self.with_conn("expire", |c| redis::cmd("PEXPIRE").arg(key).arg(ms).query(c))?;
        Ok(set == 1)
    }

    fn del(&self, keys: &[String]) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("DEL");
        for k in keys {
            cmd.arg(k);
        }
        self.with_conn("del", |c| cmd.query(c))
    }
}

/// Escapes the glob metacharacters of a `SCAN MATCH` pattern.
fn glob_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

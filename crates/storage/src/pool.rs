//! SQLite connection pool
//!
//! A fixed set of read-write connections. A caller takes one with
//! [`ConnectionPool::acquire`], waiting up to the acquire timeout, and hands it
//! back by dropping the [`PooledConnection`].
//!
//! Every connection is configured the same way on open: busy timeout, WAL
//! journal (file databases only) and the `regexp()` SQL function.

use jsondb_core::error::{Error, Result};
use parking_lot::{Condvar, Mutex, MutexGuard};
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Path that opens a private in-memory database
pub const MEMORY_PATH: &str = ":memory:";

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// How to open and size the pool
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Database file, or [`MEMORY_PATH`]
    pub path: PathBuf,
    /// Number of connections
    pub size: usize,
    /// How long `acquire` waits for a free connection
    pub acquire_timeout: Duration,
    /// How long SQLite retries a locked database before failing
    pub busy_timeout: Duration,
    /// Use the WAL journal for file databases
    pub wal_mode: bool,
}

impl PoolOptions {
    fn is_memory(&self) -> bool {
        self.path == Path::new(MEMORY_PATH)
    }
}

/// Fixed-size pool of SQLite connections
pub struct ConnectionPool {
    connections: Vec<Mutex<Connection>>,
    free: Mutex<usize>,
    returned: Condvar,
    acquire_timeout: Duration,
    path: PathBuf,
}

impl ConnectionPool {
    /// Open every connection up front.
    ///
    /// An in-memory database exists per connection, so [`MEMORY_PATH`] always
    /// gets a single connection.
    pub fn open(options: &PoolOptions) -> Result<Self> {
        let size = if options.is_memory() {
            1
        } else {
            if let Some(parent) = options.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            options.size.max(1)
        };

        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open(&options.path)?;
            configure_connection(&conn, options)?;
            connections.push(Mutex::new(conn));
        }

        info!(
            target: "jsondb::store",
            path = %options.path.display(),
            connections = size,
            "Opened connection pool"
        );

        Ok(ConnectionPool {
            connections,
            free: Mutex::new(size),
            returned: Condvar::new(),
            acquire_timeout: options.acquire_timeout,
            path: options.path.clone(),
        })
    }

    /// Take a connection, waiting up to the acquire timeout.
    pub fn acquire(&self) -> Result<PooledConnection<'_>> {
        let deadline = Instant::now() + self.acquire_timeout;
        {
            let mut free = self.free.lock();
            while *free == 0 {
                if self.returned.wait_until(&mut free, deadline).timed_out() && *free == 0 {
                    debug!(target: "jsondb::store", timeout = ?self.acquire_timeout, "Pool acquire timed out");
                    return Err(Error::PoolTimeout(self.acquire_timeout));
                }
            }
            *free -= 1;
        }

        let permit = Permit { pool: self };
        for slot in &self.connections {
            if let Some(conn) = slot.try_lock() {
                return Ok(PooledConnection {
                    conn,
                    _permit: permit,
                });
            }
        }
        // Connections are unlocked before their permit is returned, so a
        // permit always finds a free slot.
        Err(Error::PoolTimeout(self.acquire_timeout))
    }

    /// Number of connections not currently handed out
    pub fn available(&self) -> usize {
        *self.free.lock()
    }

    /// Total number of connections
    pub fn size(&self) -> usize {
        self.connections.len()
    }

    /// Database path the pool was opened on
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Returns one unit of capacity to the pool when dropped.
struct Permit<'p> {
    pool: &'p ConnectionPool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        *self.pool.free.lock() += 1;
        self.pool.returned.notify_one();
    }
}

/// A connection on loan from the pool
///
/// Field order matters: the connection lock is released before the permit.
pub struct PooledConnection<'p> {
    conn: MutexGuard<'p, Connection>,
    _permit: Permit<'p>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

fn configure_connection(conn: &Connection, options: &PoolOptions) -> Result<()> {
    conn.busy_timeout(options.busy_timeout)?;
    if options.wal_mode && !options.is_memory() {
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(target: "jsondb::store", journal_mode = %mode, "Configured journal mode");
    }
    register_regexp(conn)?;
    Ok(())
}

/// Install `regexp(pattern, text)`, which backs SQLite's `REGEXP` operator.
///
/// The compiled pattern is cached per statement. A NULL text never matches.
pub fn register_regexp(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: Arc<Regex> = ctx.get_or_create_aux(0, |value| -> std::result::Result<Regex, BoxError> {
                Ok(Regex::new(value.as_str()?)?)
            })?;
            let matched = match ctx.get_raw(1) {
                ValueRef::Text(bytes) => {
                    let text = std::str::from_utf8(bytes)
                        .map_err(|e| rusqlite::Error::UserFunctionError(e.into()))?;
                    pattern.is_match(text)
                }
                _ => false,
            };
            Ok(matched)
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(path: PathBuf, size: usize) -> PoolOptions {
        PoolOptions {
            path,
            size,
            acquire_timeout: Duration::from_millis(50),
            busy_timeout: Duration::from_millis(500),
            wal_mode: true,
        }
    }

    #[test]
    fn test_memory_pool_has_one_connection() {
        let pool = ConnectionPool::open(&options(PathBuf::from(MEMORY_PATH), 8)).unwrap();
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::open(&options(dir.path().join("pool.db"), 2)).unwrap();
        assert_eq!(pool.size(), 2);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!(pool.available(), 0);
        assert!(matches!(pool.acquire(), Err(Error::PoolTimeout(_))));

        drop(a);
        assert_eq!(pool.available(), 1);
        let c = pool.acquire().unwrap();
        let one: i64 = c.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
        assert_eq!(one, 1);
        drop(b);
        drop(c);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_waiter_wakes_when_connection_returns() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(dir.path().join("wait.db"), 1);
        opts.acquire_timeout = Duration::from_secs(5);
        let pool = ConnectionPool::open(&opts).unwrap();

        let held = pool.acquire().unwrap();
        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| pool.acquire().map(|_| ()));
            std::thread::sleep(Duration::from_millis(20));
            drop(held);
            assert!(waiter.join().unwrap().is_ok());
        });
    }

    #[test]
    fn test_file_pool_uses_wal() {
        let dir = TempDir::new().unwrap();
        let pool = ConnectionPool::open(&options(dir.path().join("nested/wal.db"), 1)).unwrap();
        let conn = pool.acquire().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_ascii_lowercase(), "wal");
    }

    #[test]
    fn test_regexp_function() {
        let pool = ConnectionPool::open(&options(PathBuf::from(MEMORY_PATH), 1)).unwrap();
        let conn = pool.acquire().unwrap();
        let hit: bool = conn
            .query_row("SELECT '/users/:a1/name/' REGEXP '^/users/:[^/]+/name/$'", [], |row| row.get(0))
            .unwrap();
        assert!(hit);
        let miss: bool = conn
            .query_row("SELECT '/users/:a1/x/name/' REGEXP '^/users/:[^/]+/name/$'", [], |row| row.get(0))
            .unwrap();
        assert!(!miss);
        let null: bool = conn
            .query_row("SELECT NULL REGEXP 'x' IS 0", [], |row| row.get(0))
            .unwrap();
        assert!(null);
    }
}

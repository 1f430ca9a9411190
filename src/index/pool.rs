use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rusqlite::Connection;

use super::IndexError;
use super::util::map_sql_error;

/// Bounded set of SQLite connections shared by readers and the writer.
///
/// Connections are opened lazily up to `max_size`; callers block for at most
/// `checkout_timeout` waiting for one to be returned.
pub(super) struct ConnectionPool {
    path: PathBuf,
    max_size: usize,
    checkout_timeout: Duration,
    state: Mutex<PoolState>,
    returned: Condvar,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<Connection>,
    open: usize,
}

/// A checked-out connection; returned to the pool on drop.
pub(super) struct PooledConnection<'pool> {
    pool: &'pool ConnectionPool,
    connection: Option<Connection>,
}

impl ConnectionPool {
    pub(super) fn new(path: &Path, max_size: usize, checkout_timeout: Duration) -> Self {
        Self {
            path: path.to_path_buf(),
            max_size: max_size.max(1),
            checkout_timeout,
            state: Mutex::new(PoolState::default()),
            returned: Condvar::new(),
        }
    }

    pub(super) fn path(&self) -> &Path {
        &self.path
    }

    pub(super) fn checkout(&self) -> Result<PooledConnection<'_>, IndexError> {
        let deadline = Instant::now() + self.checkout_timeout;
        let mut state = self.lock_state()?;
        loop {
            if let Some(connection) = state.idle.pop() {
                if is_healthy(&connection) {
                    return Ok(self.wrap(connection));
                }
                tracing::warn!("Discarding unhealthy connection to {}", self.path.display());
                state.open = state.open.saturating_sub(1);
                continue;
            }
            if state.open < self.max_size {
                state.open += 1;
                drop(state);
                return match open_connection(&self.path) {
                    Ok(connection) => Ok(self.wrap(connection)),
                    Err(err) => {
                        let mut state = self.lock_state()?;
                        state.open = state.open.saturating_sub(1);
                        self.returned.notify_one();
                        Err(err)
                    }
                };
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(IndexError::Unavailable(format!(
                    "no connection to {} became free within {:?}",
                    self.path.display(),
                    self.checkout_timeout
                )));
            }
            let (guard, _) = self
                .returned
                .wait_timeout(state, deadline - now)
                .map_err(|_| poisoned())?;
            state = guard;
        }
    }

    /// Number of connections currently open, idle or checked out.
    pub(super) fn open_connections(&self) -> usize {
        self.state.lock().map(|state| state.open).unwrap_or(0)
    }

    fn wrap(&self, connection: Connection) -> PooledConnection<'_> {
        PooledConnection {
            pool: self,
            connection: Some(connection),
        }
    }

    fn checkin(&self, connection: Connection) {
        match self.state.lock() {
            Ok(mut state) => {
                state.idle.push(connection);
                self.returned.notify_one();
            }
            Err(_) => tracing::error!("Connection pool lock poisoned; dropping connection"),
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, PoolState>, IndexError> {
        self.state.lock().map_err(|_| poisoned())
    }
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only taken in `drop`.
        self.connection.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.connection.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.checkin(connection);
        }
    }
}

fn poisoned() -> IndexError {
    IndexError::Unavailable("connection pool lock poisoned".into())
}

fn open_connection(path: &Path) -> Result<Connection, IndexError> {
    let connection = Connection::open(path).map_err(|err| match map_sql_error(err) {
        IndexError::Sql(err) => IndexError::Unavailable(format!("{}: {err}", path.display())),
        other => other,
    })?;
    apply_pragmas(&connection)?;
    Ok(connection)
}

fn apply_pragmas(connection: &Connection) -> Result<(), IndexError> {
    connection
        .execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;
             PRAGMA temp_store=MEMORY;
             PRAGMA cache_size=-32000;",
        )
        .map_err(map_sql_error)
}

fn is_healthy(connection: &Connection) -> bool {
    connection
        .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn connections_are_reused_after_checkin() {
        let dir = tempdir().unwrap();
        let pool = ConnectionPool::new(&dir.path().join("pool.db"), 2, Duration::from_millis(50));
        {
            let conn = pool.checkout().unwrap();
            let busy_timeout: i64 = conn
                .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
                .unwrap();
            assert_eq!(busy_timeout, 5000);
        }
        {
            let _conn = pool.checkout().unwrap();
        }
        assert_eq!(pool.open_connections(), 1);
    }

    #[test]
    fn exhausted_pool_times_out_as_unavailable() {
        let dir = tempdir().unwrap();
        let pool = ConnectionPool::new(&dir.path().join("pool.db"), 1, Duration::from_millis(30));
        let _held = pool.checkout().unwrap();
        let err = pool.checkout().err().unwrap();
        assert!(err.is_unavailable());
    }

    #[test]
    fn waiting_checkout_gets_returned_connection() {
        let dir = tempdir().unwrap();
        let pool = Arc::new(ConnectionPool::new(
            &dir.path().join("pool.db"),
            1,
            Duration::from_secs(5),
        ));
        let held = pool.checkout().unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.checkout().map(|_| ()).is_ok())
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn unopenable_path_is_unavailable() {
        let dir = tempdir().unwrap();
        let pool = ConnectionPool::new(
            &dir.path().join("missing").join("nested").join("pool.db"),
            1,
            Duration::from_millis(10),
        );
        let err = pool.checkout().err().unwrap();
        assert!(err.is_unavailable());
        assert_eq!(pool.open_connections(), 0);
    }
}

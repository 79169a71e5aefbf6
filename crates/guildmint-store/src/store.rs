use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, Transaction};
use tracing::debug;

use guildmint_core::MintError;

/// The process-wide SQLite handle.
///
/// All writers serialize on the inner mutex; transactions are expected to be
/// short and must never bracket an external network call. The HTTP thread
/// shares this handle with the bot-side tasks.
pub struct Store {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl Store {
    /// Open (or create) the database at `path` and apply the runtime pragmas.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MintError> {
        let conn = Connection::open(path.as_ref())?;
        Self::apply_pragmas(&conn)?;
        Ok(Store {
            conn: Mutex::new(conn),
            path: Some(path.as_ref().to_path_buf()),
        })
    }

    /// Open an in-memory database. Used by the test suites.
    pub fn open_in_memory() -> Result<Self, MintError> {
        let conn = Connection::open_in_memory()?;
        Self::apply_pragmas(&conn)?;
        Ok(Store {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    fn apply_pragmas(conn: &Connection) -> Result<(), MintError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(())
    }

    /// Path of the backing file, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` with the shared connection, outside any explicit transaction.
    /// Suitable for reads and single-statement writes.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, MintError>,
    ) -> Result<T, MintError> {
        let conn = self.conn.lock().map_err(|_| poisoned())?;
        f(&conn)
    }

    /// Run `f` inside a transaction: committed when `f` returns `Ok`,
    /// rolled back on `Err` (or on any early `?` inside `f`).
    ///
    /// This is the scoped-acquisition primitive every multi-step operation
    /// goes through; the rollback happens on every exit path because the
    /// transaction guard rolls back on drop.
    pub fn with_tx<T>(
        &self,
        f: impl FnOnce(&Transaction) -> Result<T, MintError>,
    ) -> Result<T, MintError> {
        let mut conn = self.conn.lock().map_err(|_| poisoned())?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Like [`Store::with_tx`], but a transient lock/busy failure is
    /// retried exactly once after a short jittered pause. Anything else
    /// surfaces immediately.
    pub fn with_tx_retry<T>(
        &self,
        f: impl Fn(&Transaction) -> Result<T, MintError>,
    ) -> Result<T, MintError> {
        match self.with_tx(&f) {
            Err(e) if e.is_retryable() => {
                let jitter_ms = 25 + (std::process::id() as u64 % 50);
                debug!(jitter_ms, "store busy; retrying once");
                std::thread::sleep(Duration::from_millis(jitter_ms));
                self.with_tx(&f)
            }
            other => other,
        }
    }

    /// Run SQLite's integrity check, mapping any non-`ok` report to
    /// [`MintError::Corruption`].
    pub fn integrity_check(&self) -> Result<(), MintError> {
        self.with_conn(|conn| {
            let verdict: String =
                conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
            if verdict == "ok" {
                debug!("integrity check passed");
                Ok(())
            } else {
                Err(MintError::Corruption(verdict))
            }
        })
    }
}

/// Open a database file read-only; used to verify snapshots without
/// disturbing the live handle.
pub fn open_read_only(path: &Path) -> Result<Connection, MintError> {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(MintError::from)
}

fn poisoned() -> MintError {
    MintError::Storage("store mutex poisoned".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_tx_commits_on_ok() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_tx(|tx| {
                tx.execute("CREATE TABLE t (x INTEGER)", [])?;
                tx.execute("INSERT INTO t (x) VALUES (1)", [])?;
                Ok(())
            })
            .unwrap();
        let n: i64 = store
            .with_conn(|c| Ok(c.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn with_tx_rolls_back_on_err() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|c| {
                c.execute("CREATE TABLE t (x INTEGER)", [])?;
                Ok(())
            })
            .unwrap();
        let res: Result<(), MintError> = store.with_tx(|tx| {
            tx.execute("INSERT INTO t (x) VALUES (1)", [])?;
            Err(MintError::Other("boom".into()))
        });
        assert!(res.is_err());
        let n: i64 = store
            .with_conn(|c| Ok(c.query_row("SELECT COUNT(*) FROM t", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(n, 0, "failed transaction must leave no rows behind");
    }
}

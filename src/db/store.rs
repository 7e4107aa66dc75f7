use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use anyhow::Context;
use rusqlite::Connection;

use super::{migrations, open_connection, resolve_path};
use crate::errors::AppError;

/// Reader connections opened next to the writer.
const READER_COUNT: usize = 4;

/// SQLite store with a single writer and a small set of readers.
///
/// The writer connection lives behind an async mutex, and that mutex is the
/// process-wide write lock: every mutating operation runs its whole
/// read-check-write sequence while holding it. Reads go through the reader
/// connections and never wait on the write lock, so a reader may see a state
/// a writer is about to change.
pub struct Store {
    writer: tokio::sync::Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
    lock_timeout: Duration,
}

impl Store {
    pub fn open(path: &str, lock_timeout: Duration) -> anyhow::Result<Self> {
        let path = resolve_path(path);

        let writer = open_connection(&path, lock_timeout)?;
        migrations::run_migrations(&writer).context("failed to run migrations")?;
        let readers = (0..READER_COUNT)
            .map(|_| open_connection(&path, lock_timeout).map(Mutex::new))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            writer: tokio::sync::Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
            lock_timeout,
        })
    }

    /// Run `f` while holding the write lock. Waiting longer than the lock
    /// timeout fails with `StoreTimeout` instead of blocking.
    pub async fn write<T, F>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&Connection) -> Result<T, AppError>,
    {
        let conn = tokio::time::timeout(self.lock_timeout, self.writer.lock())
            .await
            .map_err(|_| {
                tracing::warn!(timeout = ?self.lock_timeout, "timed out waiting for write lock");
                AppError::StoreTimeout
            })?;
        f(&conn)
    }

    pub fn read<T, F>(&self, f: F) -> Result<T, AppError>
    where
        F: FnOnce(&Connection) -> Result<T, AppError>,
    {
        let conn = self.reader();
        f(&conn)
    }

    /// Take the first idle reader, starting from a rotating offset. When all
    /// are busy, wait on the one at the offset.
    fn reader(&self) -> MutexGuard<'_, Connection> {
        let start = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        for i in 0..self.readers.len() {
            let slot = &self.readers[(start + i) % self.readers.len()];
            match slot.try_lock() {
                Ok(conn) => return conn,
                Err(TryLockError::Poisoned(e)) => return e.into_inner(),
                Err(TryLockError::WouldBlock) => {}
            }
        }
        // a panic inside a read closure leaves the connection itself usable
        self.readers[start]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reader_sees_committed_writes() {
        let store = Store::open(":memory:", Duration::from_secs(1)).unwrap();

        store
            .write(|conn| {
                conn.execute(
                    "INSERT INTO penalties (client_id, date, reason, created_at)
                     VALUES (7, '2025-06-16', 'late', '2025-06-16 08:00:00')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let count: i64 = store
            .read(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM penalties", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_memory_stores_are_isolated() {
        let a = Store::open(":memory:", Duration::from_secs(1)).unwrap();
        let b = Store::open(":memory:", Duration::from_secs(1)).unwrap();

        a.write(|conn| {
            conn.execute(
                "INSERT INTO work_hours (provider_id, hour_slot, is_enabled) VALUES (1, 0, 1)",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let count: i64 = b
            .read(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM work_hours", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_reads_use_an_idle_reader() {
        let store = Store::open(":memory:", Duration::from_secs(1)).unwrap();
        let held: Vec<_> = store.readers[..READER_COUNT - 1]
            .iter()
            .map(|r| r.lock().unwrap())
            .collect();

        // all but one reader busy: the read still goes through without waiting
        for _ in 0..READER_COUNT {
            let one: i64 = store
                .read(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get(0))?))
                .unwrap();
            assert_eq!(one, 1);
        }
        drop(held);
    }

    #[test]
    fn test_reads_survive_a_panicking_reader() {
        let store = Store::open(":memory:", Duration::from_secs(1)).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.read::<(), _>(|_| panic!("read closure failed"))
        }));
        assert!(result.is_err());
        assert!(store.readers.iter().any(|r| r.is_poisoned()));

        for _ in 0..READER_COUNT * 2 {
            let count: i64 = store
                .read(|conn| {
                    Ok(conn.query_row("SELECT COUNT(*) FROM bookings", [], |row| row.get(0))?)
                })
                .unwrap();
            assert_eq!(count, 0);
        }
    }

    #[tokio::test]
    async fn test_write_lock_timeout() {
        let store = Store::open(":memory:", Duration::from_millis(50)).unwrap();
        let _held = store.writer.lock().await;

        let result = store.write(|_| Ok(())).await;
        assert!(matches!(result, Err(AppError::StoreTimeout)));
    }
}

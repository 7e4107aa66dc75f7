pub mod migrations;
pub mod queries;
pub mod store;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Context;
use rusqlite::{Connection, OpenFlags};

pub use store::Store;

static MEMORY_DB_SEQ: AtomicUsize = AtomicUsize::new(0);

/// Open a connection with the pragmas every handle needs. `busy_timeout`
/// bounds how long SQLite waits on another writer before failing.
pub fn open_connection(path: &str, busy_timeout: Duration) -> anyhow::Result<Connection> {
    let flags = OpenFlags::default() | OpenFlags::SQLITE_OPEN_URI;
    let conn = Connection::open_with_flags(path, flags)
        .with_context(|| format!("failed to open database: {path}"))?;

    conn.busy_timeout(busy_timeout)
        .context("failed to set busy timeout")?;
    conn.execute_batch(
        "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;",
    )
    .context("failed to set database pragmas")?;

    Ok(conn)
}

/// `:memory:` gives every connection its own private database, so the writer
/// and reader handles share a named in-memory database instead.
pub(crate) fn resolve_path(path: &str) -> String {
    if path == ":memory:" {
        let seq = MEMORY_DB_SEQ.fetch_add(1, Ordering::Relaxed);
        format!(
            "file:slotbook-mem-{}-{seq}?mode=memory&cache=shared",
            std::process::id()
        )
    } else {
        path.to_string()
    }
}

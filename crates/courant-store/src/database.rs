//! Cache database handle.
//!
//! [`Database`] owns the `rusqlite::Connection` and applies pragmas and
//! schema migrations before handing it to anyone. The cache is plain
//! SQLite; nothing lands in it beyond what the UI already shows.

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::error::Result;
use crate::migrations;

pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the cache file at an explicit path, creating parent
    /// directories as needed. The caller picks the location (per-profile
    /// app directory, a tempdir in tests).
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        tracing::info!(path = %path.display(), "opening cache database");
        Self::prepare(Connection::open(path)?)
    }

    /// In-memory cache for tests and ephemeral sessions.
    pub fn open_in_memory() -> Result<Self> {
        Self::prepare(Connection::open_in_memory()?)
    }

    fn prepare(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        migrations::run(&conn)?;
        Ok(Self { conn })
    }

    /// Direct access for ad-hoc queries; the typed helpers in `cache.rs`
    /// cover the normal paths.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Filesystem location of the open database, `None` when in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}

//! Schema migrations.
//!
//! Every open runs the pending migrations in order, guarded by the
//! `user_version` pragma so each applies exactly once. Adding a schema
//! change means appending one `(version, up)` pair to the table below.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Migration = (u32, fn(&Connection) -> rusqlite::Result<()>);

const MIGRATIONS: &[Migration] = &[(1, v001_initial::up)];

/// Apply every migration above the connection's current `user_version`.
pub fn run(conn: &Connection) -> Result<()> {
    let current: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    for (version, up) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        tracing::info!(version, "applying cache migration");
        up(conn).map_err(|e| StoreError::Migration(format!("v{version}: {e}")))?;
        conn.pragma_update(None, "user_version", *version)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as u32);
    }
}

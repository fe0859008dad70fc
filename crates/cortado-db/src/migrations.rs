//! Database migration system.
//!
//! Schema version stored in `PRAGMA user_version`. Migrations are forward-only;
//! rollback requires rebuilding the mirror from on-chain state.

use rusqlite::Connection;

use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// Run all pending migrations.
pub fn run(conn: &Connection) -> Result<()> {
    let current_version: u32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(DbError::Sqlite)?;

    if current_version == 0 {
        // Fresh database — apply initial schema
        tracing::info!("Initializing database schema v{SCHEMA_VERSION}");
        conn.execute_batch(schema::SCHEMA_V1)
            .map_err(DbError::Sqlite)?;

        insert_default_settings(conn)?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(DbError::Sqlite)?;
    } else if current_version < SCHEMA_VERSION {
        for version in (current_version + 1)..=SCHEMA_VERSION {
            tracing::info!("Running migration to v{version}");
            run_migration(conn, version)?;
            conn.pragma_update(None, "user_version", version)
                .map_err(DbError::Sqlite)?;
        }
    } else if current_version > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "Database version {current_version} is newer than supported {SCHEMA_VERSION}"
        )));
    }

    Ok(())
}

/// Insert default settings.
fn insert_default_settings(conn: &Connection) -> Result<()> {
    let defaults = [
        ("reward_threshold", "8"),
        ("stamps_per_purchase", "1"),
        ("bootstrap_complete", "false"),
    ];

    let mut stmt = conn
        .prepare("INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)")
        .map_err(DbError::Sqlite)?;

    for (key, value) in &defaults {
        stmt.execute(rusqlite::params![key, value])
            .map_err(DbError::Sqlite)?;
    }

    Ok(())
}

/// Run a specific migration.
fn run_migration(conn: &Connection, version: u32) -> Result<()> {
    let _ = conn;
    match version {
        // Future migrations go here:
        // 2 => migration_v2(conn),
        _ => Err(DbError::Migration(format!(
            "Unknown migration version: {version}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_migration() {
        let conn = Connection::open_in_memory().expect("open");
        run(&conn).expect("migrate");

        let version: u32 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .expect("version");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_idempotent_migration() {
        let conn = Connection::open_in_memory().expect("open");
        run(&conn).expect("first run");
        run(&conn).expect("second run should be no-op");
    }

    #[test]
    fn test_default_settings() {
        let conn = Connection::open_in_memory().expect("open");
        run(&conn).expect("migrate");

        let threshold: String = conn
            .query_row(
                "SELECT value FROM settings WHERE key = 'reward_threshold'",
                [],
                |row| row.get(0),
            )
            .expect("query");
        assert_eq!(threshold, "8");
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().expect("open");
        run(&conn).expect("migrate");

        let expected_tables = ["customers", "purchase_history", "reward_history", "settings"];

        for table in &expected_tables {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .expect("table existence query");
            assert_eq!(count, 1, "Table '{table}' should exist");
        }
    }
}

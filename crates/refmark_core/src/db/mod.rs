use std::path::Path;

use rusqlite::Connection;

use crate::error::AppError;

/// Schema migrations in apply order, tracked by name in `_migrations`.
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_init.sql",
    include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../migrations/0001_init.sql"
    )),
)];

fn db_err(code: &str, message: &str, e: impl ToString) -> AppError {
    AppError::new(code, message).with_details(e.to_string())
}

pub fn open(path: &Path) -> Result<Connection, AppError> {
    Connection::open(path)
        .map_err(|e| db_err("DB_OPEN_FAILED", "Failed to open SQLite database", e))
}

pub fn open_in_memory() -> Result<Connection, AppError> {
    Connection::open_in_memory().map_err(|e| {
        db_err(
            "DB_OPEN_FAILED",
            "Failed to open in-memory SQLite database",
            e,
        )
    })
}

/// Apply every pending migration, each in its own transaction.
pub fn migrate(conn: &mut Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         CREATE TABLE IF NOT EXISTS _migrations (
           name TEXT PRIMARY KEY NOT NULL,
           applied_at TEXT NOT NULL
         );",
    )
    .map_err(|e| {
        db_err(
            "DB_MIGRATIONS_TABLE_FAILED",
            "Failed to ensure migrations table exists",
            e,
        )
    })?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM _migrations WHERE name = ?1)",
                [name],
                |row| row.get(0),
            )
            .map_err(|e| {
                db_err(
                    "DB_MIGRATIONS_QUERY_FAILED",
                    "Failed to query applied migrations",
                    e,
                )
            })?;
        if already_applied {
            continue;
        }

        let tx = conn.transaction().map_err(|e| {
            db_err("DB_TX_FAILED", "Failed to start migration transaction", e)
        })?;
        tx.execute_batch(sql).map_err(|e| {
            db_err(
                "DB_MIGRATION_FAILED",
                &format!("Migration {name} failed"),
                e,
            )
        })?;
        tx.execute(
            "INSERT INTO _migrations(name, applied_at) \
             VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ','now'))",
            [name],
        )
        .map_err(|e| {
            db_err(
                "DB_MIGRATION_FAILED",
                &format!("Failed to record migration {name}"),
                e,
            )
        })?;
        tx.commit().map_err(|e| {
            db_err("DB_TX_FAILED", "Failed to commit migration transaction", e)
        })?;
    }

    Ok(())
}

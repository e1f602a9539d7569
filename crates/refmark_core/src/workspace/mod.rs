use std::path::Path;

use rusqlite::Connection;

use crate::error::AppError;

/// Metadata returned when a highlight workspace database is opened or
/// created.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct WorkspaceMetadata {
    pub db_path: String,
    pub is_empty: bool,
}

fn invalid_path(message: &str, path: &Path) -> AppError {
    AppError::new("WORKSPACE_INVALID_PATH", message).with_details(path.display().to_string())
}

fn validate_db_path(path: &Path) -> Result<(), AppError> {
    if path.as_os_str().is_empty() {
        return Err(AppError::new(
            "WORKSPACE_INVALID_PATH",
            "Workspace DB path is empty",
        ));
    }
    if path.is_dir() {
        return Err(invalid_path(
            "Workspace DB path must be a file (not a directory)",
            path,
        ));
    }
    Ok(())
}

/// Open the connection and run migrations, remapping the low-level db
/// errors to a workspace-level failure code.
fn open_migrated(db_path: &Path, open_code: &str) -> Result<Connection, AppError> {
    let remap = |code: &str, message: &str| {
        let code = code.to_string();
        let message = message.to_string();
        move |e: AppError| {
            let details = e.details.unwrap_or(e.message);
            AppError::new(code, message).with_details(details)
        }
    };

    let mut conn = crate::db::open(db_path)
        .map_err(remap(open_code, "Failed to open workspace database"))?;
    crate::db::migrate(&mut conn).map_err(remap(
        "WORKSPACE_MIGRATION_FAILED",
        "Failed to migrate workspace database",
    ))?;
    Ok(conn)
}

fn is_empty_conn(conn: &Connection) -> Result<bool, AppError> {
    let sets: i64 = conn
        .query_row("SELECT COUNT(*) FROM highlight_sets", [], |row| row.get(0))
        .map_err(|e| {
            AppError::new(
                "DB_QUERY_FAILED",
                "Failed to count highlight sets for workspace emptiness check",
            )
            .with_details(e.to_string())
        })?;
    Ok(sets == 0)
}

pub fn open_workspace_connection(db_path: &Path) -> Result<Connection, AppError> {
    validate_db_path(db_path)?;
    if !db_path.exists() {
        return Err(
            AppError::new("WORKSPACE_DB_NOT_FOUND", "Workspace database file not found")
                .with_details(db_path.display().to_string()),
        );
    }
    if !db_path.is_file() {
        return Err(invalid_path("Workspace DB path must point to a file", db_path));
    }
    open_migrated(db_path, "WORKSPACE_OPEN_FAILED")
}

pub fn create_workspace_connection(db_path: &Path) -> Result<Connection, AppError> {
    validate_db_path(db_path)?;
    if db_path.exists() {
        return Err(
            AppError::new("WORKSPACE_CREATE_FAILED", "Workspace DB file already exists")
                .with_details(db_path.display().to_string()),
        );
    }

    let parent = db_path.parent().ok_or_else(|| {
        invalid_path("Workspace DB path must have a parent directory", db_path)
    })?;
    std::fs::create_dir_all(parent).map_err(|e| {
        AppError::new(
            "WORKSPACE_CREATE_FAILED",
            "Failed to create workspace directory",
        )
        .with_details(format!("path={}; err={}", parent.display(), e))
    })?;

    // Opening a non-existent SQLite path creates the file.
    open_migrated(db_path, "WORKSPACE_CREATE_FAILED")
}

fn metadata(db_path: &Path, conn: &Connection) -> Result<WorkspaceMetadata, AppError> {
    Ok(WorkspaceMetadata {
        db_path: db_path.to_string_lossy().to_string(),
        is_empty: is_empty_conn(conn)?,
    })
}

pub fn open_workspace(db_path: &Path) -> Result<WorkspaceMetadata, AppError> {
    let conn = open_workspace_connection(db_path)?;
    metadata(db_path, &conn)
}

pub fn create_workspace(db_path: &Path) -> Result<WorkspaceMetadata, AppError> {
    let conn = create_workspace_connection(db_path)?;
    metadata(db_path, &conn)
}

pub fn db_is_empty(db_path: &Path) -> Result<bool, AppError> {
    let conn = open_workspace_connection(db_path)?;
    is_empty_conn(&conn)
}

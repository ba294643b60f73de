// ABOUTME: SQLite bootstrap shared by the broadcast ledger and subscriber registry
// ABOUTME: Opens the database, creates the schema, and hands out the shared connection

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub type SharedConnection = Arc<Mutex<Connection>>;

/// Open (or create) the broadcast database and ensure the schema exists.
pub fn open_database<P: AsRef<Path>>(path: P) -> Result<SharedConnection> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }
    }

    let conn = Connection::open(path).context("Failed to open SQLite database")?;
    initialize_schema(&conn)?;

    tracing::info!(db = %path.display(), "Broadcast database initialized");
    Ok(Arc::new(Mutex::new(conn)))
}

/// In-memory database for tests.
pub fn open_in_memory() -> Result<SharedConnection> {
    let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
    initialize_schema(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS broadcasts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            message TEXT NOT NULL,
            source_language TEXT NOT NULL,
            location TEXT,
            radius INTEGER,
            emergency INTEGER NOT NULL DEFAULT 0,
            timestamp TEXT NOT NULL,
            delivered_count INTEGER NOT NULL DEFAULT 0,
            translations TEXT NOT NULL DEFAULT '{}'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subscribers (
            id INTEGER PRIMARY KEY,
            username TEXT,
            display_name TEXT,
            language TEXT NOT NULL,
            subscribed_at TEXT NOT NULL,
            last_seen TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

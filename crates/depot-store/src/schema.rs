use crate::catalog::StoreError;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::fmt;

pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Current catalog shape. `name` is deliberately not unique and
/// AUTOINCREMENT keeps deleted ids retired forever.
pub const SCHEMA_V2: &str = r#"
CREATE TABLE IF NOT EXISTS packages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    version TEXT NOT NULL,
    image_url TEXT,
    archive_path TEXT NOT NULL,
    executable_path TEXT,
    crc INTEGER NOT NULL,
    has_installer INTEGER NOT NULL,
    add_to_path INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Legacy catalog shape, as shipped by the original init scripts.
pub const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS packages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    version TEXT NOT NULL,
    image_url TEXT,
    archive_name TEXT NOT NULL,
    crc INTEGER NOT NULL,
    has_installer INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

pub const META_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SchemaVersion {
    V1,
    V2,
}

impl SchemaVersion {
    pub fn number(self) -> u32 {
        match self {
            SchemaVersion::V1 => 1,
            SchemaVersion::V2 => 2,
        }
    }

    pub fn from_number(number: u32) -> Option<SchemaVersion> {
        match number {
            1 => Some(SchemaVersion::V1),
            2 => Some(SchemaVersion::V2),
            _ => None,
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

pub(crate) fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Reads the stored schema marker, falling back to a column probe for
/// databases written before the marker existed.
pub(crate) fn version_of(conn: &Connection) -> Result<SchemaVersion, StoreError> {
    if table_exists(conn, "meta")? {
        let marker: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![SCHEMA_VERSION_KEY],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(value) = marker {
            return value
                .parse::<u32>()
                .ok()
                .and_then(SchemaVersion::from_number)
                .ok_or_else(|| {
                    StoreError::Migration(format!("unknown schema version marker {value:?}"))
                });
        }
    }
    probe_version(conn)
}

fn probe_version(conn: &Connection) -> Result<SchemaVersion, StoreError> {
    let mut stmt = conn.prepare("PRAGMA table_info(packages)")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut columns = HashSet::new();
    for row in rows {
        columns.insert(row?);
    }
    if columns.contains("archive_path") {
        Ok(SchemaVersion::V2)
    } else if columns.contains("archive_name") {
        Ok(SchemaVersion::V1)
    } else {
        Err(StoreError::Migration(
            "packages table has neither archive_path nor archive_name".to_string(),
        ))
    }
}

pub(crate) fn stamp_version(conn: &Connection, version: SchemaVersion) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        params![SCHEMA_VERSION_KEY, version.number().to_string()],
    )?;
    Ok(())
}

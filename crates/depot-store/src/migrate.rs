use crate::catalog::{Catalog, StoreError};
use crate::schema::{self, SchemaVersion};
use rusqlite::{params, OptionalExtension, Transaction};

const CREATE_NEXT_V2: &str = r#"
CREATE TABLE packages_next (
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
"#;

const CREATE_NEXT_V1: &str = r#"
CREATE TABLE packages_next (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    version TEXT NOT NULL,
    image_url TEXT,
    archive_name TEXT NOT NULL,
    crc INTEGER NOT NULL,
    has_installer INTEGER NOT NULL
);
"#;

impl Catalog {
    /// One-time atomic schema transition. `from` must match the persisted
    /// version; `from == to` is a no-op. Holds the catalog's exclusive
    /// gate for the duration, so every concurrent operation gets
    /// [`StoreError::Busy`] instead of a half-migrated shape. Either every
    /// record is transformed and the marker committed, or nothing changes.
    pub fn migrate(&self, from: SchemaVersion, to: SchemaVersion) -> Result<(), StoreError> {
        let _exclusive = self.migration_gate();
        let mut conn = self.writer();
        let current = schema::version_of(&conn)?;
        if current != from {
            return Err(StoreError::Migration(format!(
                "catalog is at schema {current}, not {from}"
            )));
        }
        if from == to {
            return Ok(());
        }
        let tx = conn.transaction()?;
        match (from, to) {
            (SchemaVersion::V1, SchemaVersion::V2) => upgrade(&tx)?,
            (SchemaVersion::V2, SchemaVersion::V1) => downgrade(&tx)?,
            _ => unreachable!("equal versions handled above"),
        }
        schema::stamp_version(&tx, to)?;
        tx.commit()?;
        Ok(())
    }
}

/// V1 -> V2: archive_name becomes archive_path, executable_path starts
/// null, add_to_path starts false, the name-unique constraint is dropped.
fn upgrade(tx: &Transaction) -> Result<(), StoreError> {
    let retired = highest_retired_id(tx)?;
    tx.execute_batch(CREATE_NEXT_V2)?;
    tx.execute(
        "INSERT INTO packages_next (id, name, description, version, image_url, archive_path, executable_path, crc, has_installer, add_to_path) \
         SELECT id, name, description, version, image_url, archive_name, NULL, crc, has_installer, 0 FROM packages",
        [],
    )?;
    swap_in_next(tx, retired)
}

/// V2 -> V1 is permitted only when lossless: duplicate names, a stored
/// executable_path, or add_to_path all block it.
fn downgrade(tx: &Transaction) -> Result<(), StoreError> {
    let duplicates: i64 = tx.query_row(
        "SELECT COUNT(*) FROM (SELECT name FROM packages GROUP BY name HAVING COUNT(*) > 1)",
        [],
        |row| row.get(0),
    )?;
    if duplicates > 0 {
        return Err(StoreError::Migration(format!(
            "{duplicates} duplicate package names block the downgrade to the unique-name schema"
        )));
    }
    let lossy: i64 = tx.query_row(
        "SELECT COUNT(*) FROM packages WHERE executable_path IS NOT NULL OR add_to_path != 0",
        [],
        |row| row.get(0),
    )?;
    if lossy > 0 {
        return Err(StoreError::Migration(format!(
            "{lossy} packages carry executable_path or add_to_path, which the legacy schema cannot hold"
        )));
    }
    let retired = highest_retired_id(tx)?;
    tx.execute_batch(CREATE_NEXT_V1)?;
    tx.execute(
        "INSERT INTO packages_next (id, name, description, version, image_url, archive_name, crc, has_installer) \
         SELECT id, name, description, version, image_url, archive_path, crc, has_installer FROM packages",
        [],
    )?;
    swap_in_next(tx, retired)
}

/// Sequence high-water mark of the table being replaced. Carrying it over
/// keeps ids of deleted records retired across the rebuild.
fn highest_retired_id(tx: &Transaction) -> Result<Option<i64>, StoreError> {
    if !schema::table_exists(tx, "sqlite_sequence")? {
        return Ok(None);
    }
    let seq: Option<i64> = tx
        .query_row(
            "SELECT seq FROM sqlite_sequence WHERE name = 'packages'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(seq)
}

fn swap_in_next(tx: &Transaction, retired: Option<i64>) -> Result<(), StoreError> {
    tx.execute("DROP TABLE packages", [])?;
    tx.execute("ALTER TABLE packages_next RENAME TO packages", [])?;
    if let Some(retired) = retired {
        let updated = tx.execute(
            "UPDATE sqlite_sequence SET seq = MAX(seq, ?1) WHERE name = 'packages'",
            params![retired],
        )?;
        if updated == 0 {
            tx.execute(
                "INSERT INTO sqlite_sequence (name, seq) VALUES ('packages', ?1)",
                params![retired],
            )?;
        }
    }
    Ok(())
}

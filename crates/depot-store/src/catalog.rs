use crate::schema::{self, SchemaVersion};
use depot_core::checksum::{self, ChecksumMismatch};
use depot_core::package::{NewPackage, PackagePatch, PackageRecord, ValidationError};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid package record: {0}")]
    Validation(#[from] ValidationError),
    #[error("a package named {0} already exists")]
    Conflict(String),
    #[error("{count} packages named {name}; look the package up by id instead")]
    AmbiguousName { name: String, count: usize },
    #[error("no package with id {0}")]
    NotFound(i64),
    #[error("no package named {0}")]
    NotFoundByName(String),
    #[error(transparent)]
    CorruptArtifact(#[from] ChecksumMismatch),
    #[error("migration failed: {0}")]
    Migration(String),
    #[error("catalog is locked by an in-progress migration, retry shortly")]
    Busy,
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogOptions {
    /// Upper bound on any single wait at the SQLite boundary.
    pub busy_timeout: Duration,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        CatalogOptions {
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListSort {
    /// Insertion order (ascending id).
    #[default]
    Insertion,
    Name,
}

#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Exact name filter.
    pub name: Option<String>,
    /// Substring name filter.
    pub name_contains: Option<String>,
    pub sort: ListSort,
}

/// Handle to one catalog database.
///
/// Mutations go through a single writer connection and commit before
/// returning. Reads open a short-lived read-only connection, so under WAL
/// they see a consistent snapshot without blocking the writer. The gate
/// serializes everything against [`Catalog::migrate`]: while a migration
/// holds the write side, every other operation fails fast with
/// [`StoreError::Busy`].
pub struct Catalog {
    path: PathBuf,
    writer: Mutex<Connection>,
    gate: RwLock<()>,
    busy_timeout: Duration,
}

impl Catalog {
    /// Opens a catalog, creating a fresh current-shape database if the
    /// file does not exist yet. Older databases are recognized by their
    /// marker or, failing that, by probing the packages table, and are
    /// stamped with an explicit marker for next time.
    pub fn open(path: impl AsRef<Path>) -> Result<Catalog, StoreError> {
        Catalog::open_with(path, CatalogOptions::default())
    }

    pub fn open_with(
        path: impl AsRef<Path>,
        options: CatalogOptions,
    ) -> Result<Catalog, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        conn.busy_timeout(options.busy_timeout)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        // success must imply the write reached stable storage
        conn.pragma_update(None, "synchronous", "FULL")?;
        if schema::table_exists(&conn, "packages")? {
            let version = schema::version_of(&conn)?;
            conn.execute_batch(schema::META_SCHEMA)?;
            schema::stamp_version(&conn, version)?;
        } else {
            conn.execute_batch(schema::SCHEMA_V2)?;
            schema::stamp_version(&conn, SchemaVersion::V2)?;
        }
        Ok(Catalog {
            path,
            writer: Mutex::new(conn),
            gate: RwLock::new(()),
            busy_timeout: options.busy_timeout,
        })
    }

    /// Creates a catalog already at the legacy shape. Only useful for
    /// exercising migration; new catalogs should use [`Catalog::open`].
    pub fn create_legacy(path: impl AsRef<Path>) -> Result<Catalog, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.execute_batch(schema::SCHEMA_V1)?;
        schema::stamp_version(&conn, SchemaVersion::V1)?;
        drop(conn);
        Catalog::open(path)
    }

    pub fn schema_version(&self) -> Result<SchemaVersion, StoreError> {
        let _claim = self.claim()?;
        let conn = self.reader()?;
        schema::version_of(&conn)
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let _claim = self.claim()?;
        let conn = self.reader()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM packages", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Validates and persists a new record, returning its assigned id.
    /// Ids increase monotonically and are never handed out twice.
    pub fn insert(&self, pkg: &NewPackage) -> Result<i64, StoreError> {
        let _claim = self.claim()?;
        let conn = self.writer();
        match schema::version_of(&conn)? {
            SchemaVersion::V1 => {
                pkg.validate_for_legacy()?;
                conn.execute(
                    "INSERT INTO packages (name, description, version, image_url, archive_name, crc, has_installer) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        pkg.name,
                        pkg.description,
                        pkg.version,
                        pkg.image_url,
                        pkg.archive_path,
                        pkg.crc,
                        pkg.has_installer,
                    ],
                )
                .map_err(|err| conflict_on_unique(err, &pkg.name))?;
            }
            SchemaVersion::V2 => {
                pkg.validate()?;
                conn.execute(
                    "INSERT INTO packages (name, description, version, image_url, archive_path, executable_path, crc, has_installer, add_to_path) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        pkg.name,
                        pkg.description,
                        pkg.version,
                        pkg.image_url,
                        pkg.archive_path,
                        pkg.executable_path,
                        pkg.crc,
                        pkg.has_installer,
                        pkg.add_to_path,
                    ],
                )?;
            }
        }
        Ok(conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> Result<PackageRecord, StoreError> {
        let _claim = self.claim()?;
        let conn = self.reader()?;
        let version = schema::version_of(&conn)?;
        let record = conn
            .query_row(
                &format!("{} WHERE id = ?1", select_sql(version)),
                params![id],
                |row| record_from_row(version, row),
            )
            .optional()?;
        record.ok_or(StoreError::NotFound(id))
    }

    /// Exact-name lookup. Under the current schema names may repeat, in
    /// which case this surfaces the ambiguity instead of picking a row.
    pub fn find_by_name(&self, name: &str) -> Result<PackageRecord, StoreError> {
        let _claim = self.claim()?;
        let conn = self.reader()?;
        let version = schema::version_of(&conn)?;
        let mut stmt =
            conn.prepare(&format!("{} WHERE name = ?1 ORDER BY id", select_sql(version)))?;
        let rows = stmt.query_map(params![name], |row| record_from_row(version, row))?;
        let mut matches = Vec::new();
        for row in rows {
            matches.push(row?);
        }
        match matches.len() {
            0 => Err(StoreError::NotFoundByName(name.to_string())),
            1 => Ok(matches.remove(0)),
            count => Err(StoreError::AmbiguousName {
                name: name.to_string(),
                count,
            }),
        }
    }

    /// Partial update. The merged record is re-validated as a whole, so a
    /// patch can never leave a required field empty. `id` is immutable.
    pub fn update(&self, id: i64, patch: &PackagePatch) -> Result<(), StoreError> {
        let _claim = self.claim()?;
        let mut conn = self.writer();
        let version = schema::version_of(&conn)?;
        let tx = conn.transaction()?;
        let record = tx
            .query_row(
                &format!("{} WHERE id = ?1", select_sql(version)),
                params![id],
                |row| record_from_row(version, row),
            )
            .optional()?;
        let mut record = record.ok_or(StoreError::NotFound(id))?;
        record.apply(patch);
        match version {
            SchemaVersion::V1 => {
                record.validate_for_legacy()?;
                tx.execute(
                    "UPDATE packages SET name = ?1, description = ?2, version = ?3, image_url = ?4, \
                     archive_name = ?5, crc = ?6, has_installer = ?7 WHERE id = ?8",
                    params![
                        record.name,
                        record.description,
                        record.version,
                        record.image_url,
                        record.archive_path,
                        record.crc,
                        record.has_installer,
                        id,
                    ],
                )
                .map_err(|err| conflict_on_unique(err, &record.name))?;
            }
            SchemaVersion::V2 => {
                record.validate()?;
                tx.execute(
                    "UPDATE packages SET name = ?1, description = ?2, version = ?3, image_url = ?4, \
                     archive_path = ?5, executable_path = ?6, crc = ?7, has_installer = ?8, add_to_path = ?9 \
                     WHERE id = ?10",
                    params![
                        record.name,
                        record.description,
                        record.version,
                        record.image_url,
                        record.archive_path,
                        record.executable_path,
                        record.crc,
                        record.has_installer,
                        record.add_to_path,
                        id,
                    ],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Permanent removal. The id stays retired; later inserts will never
    /// return it again.
    pub fn delete(&self, id: i64) -> Result<(), StoreError> {
        let _claim = self.claim()?;
        let conn = self.writer();
        let deleted = conn.execute("DELETE FROM packages WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Snapshot listing. Each call re-queries, so it is restartable and
    /// consistent at call time; default order is insertion order.
    pub fn list(&self, query: &ListQuery) -> Result<Vec<PackageRecord>, StoreError> {
        let _claim = self.claim()?;
        let conn = self.reader()?;
        let version = schema::version_of(&conn)?;
        let order = match query.sort {
            ListSort::Insertion => "ORDER BY id",
            ListSort::Name => "ORDER BY name, id",
        };
        let sql = format!(
            "{} WHERE (?1 IS NULL OR name = ?1) AND (?2 IS NULL OR instr(name, ?2) > 0) {}",
            select_sql(version),
            order
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![query.name, query.name_contains], |row| {
            record_from_row(version, row)
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Recomputes the CRC-32 of `bytes` and compares it to the stored
    /// checksum of package `id`.
    pub fn verify_archive(&self, id: i64, bytes: &[u8]) -> Result<(), StoreError> {
        let record = self.get(id)?;
        checksum::verify_archive(&record, bytes)?;
        Ok(())
    }

    fn claim(&self) -> Result<RwLockReadGuard<'_, ()>, StoreError> {
        self.gate.try_read().map_err(|_| StoreError::Busy)
    }

    pub(crate) fn writer(&self) -> MutexGuard<'_, Connection> {
        self.writer.lock().unwrap_or_else(|err| err.into_inner())
    }

    pub(crate) fn migration_gate(&self) -> std::sync::RwLockWriteGuard<'_, ()> {
        self.gate.write().unwrap_or_else(|err| err.into_inner())
    }

    fn reader(&self) -> Result<Connection, StoreError> {
        let conn =
            Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }
}

fn select_sql(version: SchemaVersion) -> &'static str {
    match version {
        SchemaVersion::V1 => {
            "SELECT id, name, description, version, image_url, archive_name, crc, has_installer \
             FROM packages"
        }
        SchemaVersion::V2 => {
            "SELECT id, name, description, version, image_url, archive_path, executable_path, crc, \
             has_installer, add_to_path FROM packages"
        }
    }
}

fn record_from_row(version: SchemaVersion, row: &Row) -> rusqlite::Result<PackageRecord> {
    match version {
        SchemaVersion::V1 => Ok(PackageRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            version: row.get(3)?,
            image_url: row.get(4)?,
            archive_path: row.get(5)?,
            executable_path: None,
            crc: row.get(6)?,
            has_installer: row.get(7)?,
            add_to_path: false,
        }),
        SchemaVersion::V2 => Ok(PackageRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            version: row.get(3)?,
            image_url: row.get(4)?,
            archive_path: row.get(5)?,
            executable_path: row.get(6)?,
            crc: row.get(7)?,
            has_installer: row.get(8)?,
            add_to_path: row.get(9)?,
        }),
    }
}

fn conflict_on_unique(err: rusqlite::Error, name: &str) -> StoreError {
    if let rusqlite::Error::SqliteFailure(inner, _) = &err {
        if inner.code == rusqlite::ErrorCode::ConstraintViolation {
            return StoreError::Conflict(name.to_string());
        }
    }
    StoreError::Db(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str) -> NewPackage {
        NewPackage {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            archive_path: format!("{name}.tar.gz"),
            crc: 1,
            has_installer: false,
            ..NewPackage::default()
        }
    }

    #[test]
    fn operations_fail_fast_while_migration_gate_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("catalog.sqlite")).unwrap();
        let id = catalog.insert(&draft("editor")).unwrap();

        let _exclusive = catalog.migration_gate();
        assert!(matches!(catalog.get(id), Err(StoreError::Busy)));
        assert!(matches!(
            catalog.insert(&draft("other")),
            Err(StoreError::Busy)
        ));
        assert!(matches!(
            catalog.list(&ListQuery::default()),
            Err(StoreError::Busy)
        ));
        assert!(matches!(catalog.delete(id), Err(StoreError::Busy)));
    }

    #[test]
    fn gate_release_restores_service() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::open(dir.path().join("catalog.sqlite")).unwrap();
        {
            let _exclusive = catalog.migration_gate();
            assert!(matches!(
                catalog.count(),
                Err(StoreError::Busy)
            ));
        }
        assert_eq!(catalog.count().unwrap(), 0);
    }
}

//! SQLite-backed catalog store.

use super::models::*;
use super::schema::LIBRARY_SCHEMA;
use super::trait_def::CatalogStore;
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{anyhow, bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

const SELECT_COLUMNS: &str = "id, filepath, library, filename, extension, title_id, app_id, \
                              type, version, size, identification_type";

#[derive(Clone)]
pub struct SqliteCatalogStore {
    conn: Arc<Mutex<Connection>>,
}

/// Create the schema on an empty database, otherwise check that the existing one
/// is the version and shape this build expects.
fn ensure_schema(conn: &Connection) -> Result<()> {
    let table_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
            [],
            |r| r.get(0),
        )
        .unwrap_or(0);

    if table_count == 0 {
        info!("Creating library db schema at version {}", LIBRARY_SCHEMA.version);
        return LIBRARY_SCHEMA.create(conn);
    }

    let db_version: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    let expected = (BASE_DB_VERSION + LIBRARY_SCHEMA.version) as i64;
    if db_version != expected {
        bail!(
            "Library database has user_version {}, expected {}; refusing to open it",
            db_version,
            expected
        );
    }
    LIBRARY_SCHEMA.validate(conn)
}

/// Paths are stored as text; anything that is not UTF-8 could never be matched
/// again, so it is rejected instead of stored lossily.
fn path_to_sql(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow!("Path is not valid UTF-8: {:?}", path))
}

fn row_to_entry(row: &Row) -> rusqlite::Result<CatalogEntry> {
    let title_id: Option<String> = row.get(5)?;
    let app_id: Option<String> = row.get(6)?;
    let kind: Option<String> = row.get(7)?;
    let version: Option<i64> = row.get(8)?;

    let identity = match (title_id, app_id, kind.as_deref().and_then(ContentKind::from_str)) {
        (Some(title_id), Some(app_id), Some(kind)) => Some(TitleIdentity {
            title_id,
            app_id,
            kind,
            version: version.unwrap_or(0).max(0) as u64,
        }),
        _ => None,
    };

    let identification: String = row.get(10)?;

    Ok(CatalogEntry {
        id: row.get(0)?,
        filepath: PathBuf::from(row.get::<_, String>(1)?),
        library: PathBuf::from(row.get::<_, String>(2)?),
        filename: row.get(3)?,
        extension: row.get(4)?,
        identity,
        size: row.get::<_, i64>(9)?.max(0) as u64,
        identification: IdentificationMode::from_str(&identification)
            .unwrap_or(IdentificationMode::Filename),
    })
}

impl SqliteCatalogStore {
    /// Open (or create) the library database at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open library database {:?}", db_path))?;
        ensure_schema(&conn)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))
            .unwrap_or(0);
        info!("Opened library catalog at {:?}: {} files", db_path, count);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Library database connection lock poisoned"))
    }

    fn query_entries<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<CatalogEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let entries = stmt
            .query_map(params, row_to_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

impl CatalogStore for SqliteCatalogStore {
    fn list_all(&self) -> Result<Vec<CatalogEntry>> {
        self.query_entries(
            &format!("SELECT {} FROM files ORDER BY id", SELECT_COLUMNS),
            [],
        )
    }

    fn list_by_library(&self, library: &Path) -> Result<Vec<CatalogEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM files WHERE library = ?1 ORDER BY id",
                SELECT_COLUMNS
            ),
            params![path_to_sql(library)?],
        )
    }

    fn get_by_path(&self, filepath: &Path) -> Result<Option<CatalogEntry>> {
        let conn = self.conn()?;
        let entry = conn
            .query_row(
                &format!("SELECT {} FROM files WHERE filepath = ?1", SELECT_COLUMNS),
                params![path_to_sql(filepath)?],
                row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn list_by_app_id(&self, app_id: &str) -> Result<Vec<CatalogEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM files WHERE app_id = ?1 COLLATE NOCASE ORDER BY id",
                SELECT_COLUMNS
            ),
            params![app_id],
        )
    }

    fn list_by_title_id(&self, title_id: &str) -> Result<Vec<CatalogEntry>> {
        self.query_entries(
            &format!(
                "SELECT {} FROM files WHERE title_id = ?1 COLLATE NOCASE ORDER BY id",
                SELECT_COLUMNS
            ),
            params![title_id],
        )
    }

    fn identified_paths(&self, mode: IdentificationMode) -> Result<Vec<PathBuf>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT filepath FROM files WHERE identification_type = ?1 AND type IS NOT NULL",
        )?;
        let paths = stmt
            .query_map(params![mode.as_str()], |row| row.get::<_, String>(0))?
            .map(|r| r.map(PathBuf::from))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(paths)
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    fn upsert(&self, entry: &NewCatalogEntry) -> Result<i64> {
        let conn = self.conn()?;
        let id = conn.query_row(
            "INSERT INTO files (filepath, library, filename, extension, title_id, app_id, type, \
                                version, size, identification_type) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(filepath) DO UPDATE SET \
                library = excluded.library, \
                title_id = excluded.title_id, \
                app_id = excluded.app_id, \
                type = excluded.type, \
                version = excluded.version, \
                size = excluded.size, \
                identification_type = excluded.identification_type \
             RETURNING id",
            params![
                path_to_sql(&entry.filepath)?,
                path_to_sql(&entry.library)?,
                entry.filename(),
                entry.extension(),
                entry.identity.title_id,
                entry.identity.app_id,
                entry.identity.kind.as_str(),
                entry.identity.version as i64,
                entry.size as i64,
                entry.identification.as_str(),
            ],
            |r| r.get(0),
        )?;
        debug!("Catalogued {:?} as #{}", entry.filepath, id);
        Ok(id)
    }

    fn update_path(&self, old_path: &Path, new_path: &Path, library: &Path) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE files SET filepath = ?1, filename = ?2, extension = ?3, library = ?4 \
             WHERE filepath = ?5",
            params![
                path_to_sql(new_path)?,
                file_name_of(new_path),
                extension_of(new_path),
                path_to_sql(library)?,
                path_to_sql(old_path)?,
            ],
        )?;
        Ok(updated > 0)
    }

    fn delete_by_path(&self, filepath: &Path) -> Result<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM files WHERE filepath = ?1",
            params![path_to_sql(filepath)?],
        )?;
        Ok(deleted > 0)
    }

    fn remove_missing_files(&self) -> Result<Vec<PathBuf>> {
        let mut conn = self.conn()?;
        let all_paths: Vec<String> = {
            let mut stmt = conn.prepare("SELECT filepath FROM files ORDER BY id")?;
            let paths = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            paths
        };

        let missing: Vec<String> = all_paths
            .into_iter()
            .filter(|p| !Path::new(p).exists())
            .collect();
        if missing.is_empty() {
            return Ok(Vec::new());
        }

        let tx = conn.transaction()?;
        for path in &missing {
            tx.execute("DELETE FROM files WHERE filepath = ?1", params![path])?;
        }
        tx.commit()?;

        warn!("Removed {} missing files from the catalog", missing.len());
        Ok(missing.into_iter().map(PathBuf::from).collect())
    }
}

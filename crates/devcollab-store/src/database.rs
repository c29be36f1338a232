use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::info;

use crate::error::StoreError;
use crate::schema::{self, Schema};

/// Thread-safe SQLite connection wrapper.
/// Uses parking_lot::Mutex for synchronous access (rusqlite is not Send).
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    schema: Schema,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &Path, schema: Schema) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("create dir: {e}")))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        initialize(&conn, &schema)?;

        info!(path = %path.display(), schema = schema.name, "database opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_owned(),
            schema,
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory(schema: Schema) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Database(e.to_string()))?;
        initialize(&conn, &schema)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
            schema,
        })
    }

    /// Execute a closure with the database connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Execute a closure inside a transaction; rolled back on error.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, StoreError>,
    {
        self.transaction(f)
    }

    /// [`with_tx`](Self::with_tx) for closures failing with a caller's
    /// error type, e.g. a domain rule checked between reads and writes.
    pub fn transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(StoreError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema_name(&self) -> &'static str {
        self.schema.name
    }

    /// Cheap liveness probe for health checks.
    pub fn ping(&self) -> bool {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(StoreError::from)
        })
        .is_ok()
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            path: self.path.clone(),
            schema: self.schema,
        }
    }
}

fn initialize(conn: &Connection, schema: &Schema) -> Result<(), StoreError> {
    conn.execute_batch(schema::PRAGMAS)
        .map_err(|e| StoreError::Database(format!("pragmas: {e}")))?;

    for batch in schema.tables {
        conn.execute_batch(batch)
            .map_err(|e| StoreError::Database(format!("schema: {e}")))?;
    }

    let version: Option<u32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .ok();

    match version {
        None => {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                [schema.version],
            )
            .map_err(|e| StoreError::Database(format!("schema version: {e}")))?;
        }
        Some(found) if found > schema.version => {
            return Err(StoreError::Conflict(format!(
                "{} database is at schema version {found}, this build supports {}",
                schema.name, schema.version
            )));
        }
        Some(_) => {}
    }
    Ok(())
}

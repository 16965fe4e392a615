//! Model persistence backends.
//!
//! A store holds exactly one blob, "the model". Every `save` replaces it
//! atomically: readers see either the previous artifact or the new one, never
//! a partial write.

use crate::error::StoreError;
use log::{debug, trace};
use rusqlite::{Connection, OptionalExtension};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Logical name of the persisted artifact.
pub const MODEL_KEY: &str = "model";

pub trait ModelStore: Send + Sync {
    /// Previously saved bytes, or `None` when nothing was ever saved.
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the stored artifact.
    fn save(&self, bytes: &[u8]) -> Result<(), StoreError>;

    /// Human-readable location, for log messages.
    fn describe(&self) -> String;
}

/// One file on disk, replaced through a sibling temp file and a rename.
#[derive(Debug, Clone)]
pub struct FileModelStore {
    path: PathBuf,
}

impl FileModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModelStore for FileModelStore {
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path)?;

        debug!("Wrote {} bytes to {}", bytes.len(), self.path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A row in an `artifact` table keyed by name.
///
/// A connection is opened per call; `rusqlite::Connection` is not `Sync`.
#[derive(Debug, Clone)]
pub struct SqliteModelStore {
    db_path: PathBuf,
    name: String,
}

impl SqliteModelStore {
    /// Open (creating if needed) the database and its `artifact` table.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            db_path: db_path.into(),
            name: MODEL_KEY.to_string(),
        };
        let conn = store.connect()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS artifact (
                name       TEXT    PRIMARY KEY,
                bytes      BLOB    NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            (),
        )?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(Connection::open(&self.db_path)?)
    }
}

impl ModelStore for SqliteModelStore {
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.connect()?;
        let bytes = conn
            .query_row(
                "SELECT bytes FROM artifact WHERE name = ?1",
                [&self.name],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        trace!("Loaded artifact `{}`: present = {}", self.name, bytes.is_some());
        Ok(bytes)
    }

    fn save(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO artifact (name, bytes, updated_at)
             VALUES (?1, ?2, strftime('%s', 'now'))
             ON CONFLICT(name) DO UPDATE SET bytes = excluded.bytes, updated_at = excluded.updated_at",
            (&self.name, bytes),
        )?;
        tx.commit()?;
        debug!("Stored {} bytes as `{}` in {}", bytes.len(), self.name, self.db_path.display());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{}#{}", self.db_path.display(), self.name)
    }
}

/// Process-local store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryModelStore {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemoryModelStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Mutex::new(Some(bytes)),
        }
    }
}

impl ModelStore for MemoryModelStore {
    fn load(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.bytes.lock().map(|guard| guard.clone()).unwrap_or_default())
    }

    fn save(&self, bytes: &[u8]) -> Result<(), StoreError> {
        if let Ok(mut guard) = self.bytes.lock() {
            *guard = Some(bytes.to_vec());
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

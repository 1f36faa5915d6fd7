//! Record store abstraction: the document/table store that ingestion reads from.
//!
//! A store is addressed by database and collection name and returns JSON
//! documents. The caller builds the store and injects it into the pipeline;
//! the pipeline connects it (with a timeout) before ingestion and closes it
//! afterwards. `DataIngestion` only receives a shared, connected handle.

use crate::error::MlError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// One document: column name to scalar value.
pub type Record = Map<String, Value>;

/// Trait for the source-of-truth record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Open the underlying connection. Calling twice is a no-op.
    async fn connect(&self) -> Result<(), MlError>;

    /// Cheap round trip proving the store is reachable.
    async fn is_healthy(&self) -> bool;

    /// Release the connection.
    async fn close(&self) -> Result<(), MlError>;

    /// Fetch every document of `database.collection`.
    async fn fetch(&self, database: &str, collection: &str) -> Result<Vec<Record>, MlError>;

    /// Insert documents, returning the number inserted.
    async fn insert_many(
        &self,
        database: &str,
        collection: &str,
        records: Vec<Record>,
    ) -> Result<usize, MlError>;

    /// Human-readable location for logs.
    fn location(&self) -> String;
}

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

/// Document store on a single SQLite file. Each `database.collection` pair is a
/// table `<database>__<collection>` of JSON documents.
pub struct SqliteStore {
    pub db_path: PathBuf,
    connected: AtomicBool,
}

impl SqliteStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            connected: AtomicBool::new(false),
        }
    }

    fn ensure_connected(&self) -> Result<(), MlError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(MlError::store(format!(
                "store at {} is not connected",
                self.db_path.display()
            )))
        }
    }
}

/// Table name for a collection; only identifier characters survive.
fn table_name(database: &str, collection: &str) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    };
    format!("{}__{}", clean(database), clean(collection))
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn connect(&self) -> Result<(), MlError> {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), MlError> {
            if let Some(parent) = db_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let conn = rusqlite::Connection::open(&db_path)?;
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
        .map_err(|e| MlError::store(format!("SQLite task join error: {e}")))??;
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(path = %self.db_path.display(), "Record store connected");
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            rusqlite::Connection::open_with_flags(
                &db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
            )
            .and_then(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)))
            .is_ok()
        })
        .await
        .unwrap_or(false)
    }

    async fn close(&self) -> Result<(), MlError> {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::info!(path = %self.db_path.display(), "Record store closed");
        }
        Ok(())
    }

    async fn fetch(&self, database: &str, collection: &str) -> Result<Vec<Record>, MlError> {
        self.ensure_connected()?;
        let db_path = self.db_path.clone();
        let table = table_name(database, collection);

        // Run blocking SQLite operations on a blocking thread
        tokio::task::spawn_blocking(move || -> Result<Vec<Record>, MlError> {
            let conn = rusqlite::Connection::open_with_flags(
                &db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
            )?;
            let exists: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [&table],
                |row| row.get(0),
            )?;
            if exists == 0 {
                return Err(MlError::store(format!("collection '{table}' does not exist")));
            }
            let mut stmt = conn.prepare(&format!("SELECT doc FROM \"{table}\" ORDER BY id"))?;
            let mut rows = stmt.query([])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                let doc: String = row.get(0)?;
                match serde_json::from_str::<Value>(&doc)? {
                    Value::Object(map) => records.push(map),
                    other => {
                        return Err(MlError::store(format!(
                            "document in '{table}' is not an object: {other}"
                        )));
                    }
                }
            }
            Ok(records)
        })
        .await
        .map_err(|e| MlError::store(format!("SQLite task join error: {e}")))?
    }

    async fn insert_many(
        &self,
        database: &str,
        collection: &str,
        records: Vec<Record>,
    ) -> Result<usize, MlError> {
        self.ensure_connected()?;
        let db_path = self.db_path.clone();
        let table = table_name(database, collection);

        tokio::task::spawn_blocking(move || -> Result<usize, MlError> {
            let mut conn = rusqlite::Connection::open(&db_path)?;
            let tx = conn.transaction()?;
            tx.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS \"{table}\" (id INTEGER PRIMARY KEY AUTOINCREMENT, doc TEXT NOT NULL)"
                ),
                [],
            )?;
            let mut inserted = 0;
            {
                let mut stmt = tx.prepare(&format!("INSERT INTO \"{table}\" (doc) VALUES (?1)"))?;
                for record in &records {
                    stmt.execute([serde_json::to_string(record)?])?;
                    inserted += 1;
                }
            }
            tx.commit()?;
            Ok(inserted)
        })
        .await
        .map_err(|e| MlError::store(format!("SQLite task join error: {e}")))?
    }

    fn location(&self) -> String {
        format!("sqlite://{}", self.db_path.display())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process store for tests and demos.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<(String, String), Vec<Record>>>,
    connected: AtomicBool,
    /// When set, `connect` fails as an unreachable store would.
    pub unreachable: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    /// Seed a collection without going through `insert_many`.
    pub fn with_collection(self, database: &str, collection: &str, records: Vec<Record>) -> Self {
        if let Ok(mut map) = self.collections.lock() {
            map.insert((database.to_string(), collection.to_string()), records);
        }
        self
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn connect(&self) -> Result<(), MlError> {
        if self.unreachable {
            return Err(MlError::store("memory store configured as unreachable"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), MlError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch(&self, database: &str, collection: &str) -> Result<Vec<Record>, MlError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(MlError::store("memory store is not connected"));
        }
        let map = self
            .collections
            .lock()
            .map_err(|_| MlError::store("memory store lock poisoned"))?;
        map.get(&(database.to_string(), collection.to_string()))
            .cloned()
            .ok_or_else(|| MlError::store(format!("collection '{database}.{collection}' does not exist")))
    }

    async fn insert_many(
        &self,
        database: &str,
        collection: &str,
        records: Vec<Record>,
    ) -> Result<usize, MlError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(MlError::store("memory store is not connected"));
        }
        let count = records.len();
        let mut map = self
            .collections
            .lock()
            .map_err(|_| MlError::store("memory store lock poisoned"))?;
        map.entry((database.to_string(), collection.to_string()))
            .or_default()
            .extend(records);
        Ok(count)
    }

    fn location(&self) -> String {
        "memory://".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(json: &str) -> Record {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_table_name_sanitized() {
        assert_eq!(table_name("Anderson AI", "Net-Data"), "Anderson_AI__Net_Data");
    }

    #[tokio::test]
    async fn test_sqlite_store_roundtrip_preserves_order() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("db").join("records.db"));
        store.connect().await.unwrap();
        assert!(store.is_healthy().await);

        let inserted = store
            .insert_many(
                "db",
                "col",
                vec![record(r#"{"b": 1, "a": 2}"#), record(r#"{"b": 3, "a": "na"}"#)],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let fetched = store.fetch("db", "col").await.unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].keys().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(fetched[1]["a"], serde_json::json!("na"));

        store.close().await.unwrap();
        assert!(!store.is_healthy().await);
    }

    #[tokio::test]
    async fn test_sqlite_fetch_requires_connection() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("records.db"));
        let err = store.fetch("db", "col").await.unwrap_err();
        assert!(matches!(err, MlError::Store(_)));
    }

    #[tokio::test]
    async fn test_sqlite_missing_collection_is_error() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("records.db"));
        store.connect().await.unwrap();
        assert!(store.fetch("db", "absent").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_store_unreachable() {
        let store = MemoryStore::unreachable();
        assert!(store.connect().await.is_err());
        assert!(!store.is_healthy().await);
        assert!(store.fetch("db", "col").await.is_err());
    }
}

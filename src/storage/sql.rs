//! SQLite-backed key-value table

use crate::common::{Error, Result};
use crate::storage::{migrations, Backend};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const PUT_SQL: &str = "INSERT INTO keyvalue (key, value) VALUES (?1, ?2)
     ON CONFLICT(key) DO UPDATE SET value = excluded.value";
const GET_SQL: &str = "SELECT value FROM keyvalue WHERE key = ?1";

/// SQLite store for the `keyvalue` table.
///
/// The connection sits behind a mutex and every statement runs on the
/// blocking pool, so the async runtime never waits on disk I/O. `None` once
/// the backend has been closed.
#[derive(Clone, Debug)]
pub struct SqlBackend {
    conn: Arc<Mutex<Option<Connection>>>,
    path: Option<PathBuf>,
}

impl SqlBackend {
    /// Open or create a database file and bring its schema up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Connection::open(&path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        Self::init(&mut conn)?;

        tracing::info!(path = %path.display(), "opened sqlite backend");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: Some(path),
        })
    }

    /// Ephemeral database that lives as long as the backend.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        Self::init(&mut conn)?;

        tracing::info!("opened in-memory sqlite backend");
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: None,
        })
    }

    /// File path, `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init(conn: &mut Connection) -> Result<()> {
        let applied = migrations::run(conn)?;
        tracing::debug!(
            applied,
            version = migrations::latest_version(),
            "schema up to date"
        );
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| Error::Internal("sqlite connection lock poisoned".into()))?;
            match guard.as_ref() {
                Some(conn) => f(conn),
                None => Err(Error::BackendClosed),
            }
        })
        .await
        .map_err(|e| Error::Internal(format!("storage task failed: {}", e)))?
    }
}

#[tonic::async_trait]
impl Backend for SqlBackend {
    async fn put(&self, key: i64, value: &str) -> Result<()> {
        let value = value.to_owned();
        self.with_conn(move |conn| {
            conn.prepare_cached(PUT_SQL)?
                .execute(params![key, value])?;
            Ok(())
        })
        .await
    }

    async fn get(&self, key: i64) -> Result<String> {
        self.with_conn(move |conn| {
            conn.prepare_cached(GET_SQL)?
                .query_row(params![key], |row| row.get(0))
                .optional()?
                .ok_or(Error::NotFound(key))
        })
        .await
    }

    async fn close(&self) -> Result<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| Error::Internal("sqlite connection lock poisoned".into()))?;
            match guard.take() {
                Some(conn) => conn.close().map_err(|(_, e)| Error::Storage(e)),
                None => Ok(()),
            }
        })
        .await
        .map_err(|e| Error::Internal(format!("storage task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_put_get() {
        let backend = SqlBackend::open_in_memory().unwrap();
        assert_ok!(backend.put(1, "value").await);
        assert_eq!(backend.get(1).await.unwrap(), "value");
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let backend = SqlBackend::open_in_memory().unwrap();
        let err = assert_err!(backend.get(999).await);
        assert!(matches!(err, Error::NotFound(999)));
    }

    #[tokio::test]
    async fn test_put_overwrites_existing_value() {
        let backend = SqlBackend::open_in_memory().unwrap();
        assert_ok!(backend.put(42, "first").await);
        assert_ok!(backend.put(42, "second").await);
        assert_eq!(backend.get(42).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn test_empty_value_is_a_real_value() {
        let backend = SqlBackend::open_in_memory().unwrap();
        assert_ok!(backend.put(3, "").await);
        assert_eq!(backend.get(3).await.unwrap(), "");
        assert!(backend.get(4).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_extreme_keys() {
        let backend = SqlBackend::open_in_memory().unwrap();
        assert_ok!(backend.put(i64::MIN, "min").await);
        assert_ok!(backend.put(i64::MAX, "max").await);
        assert_eq!(backend.get(i64::MIN).await.unwrap(), "min");
        assert_eq!(backend.get(i64::MAX).await.unwrap(), "max");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let backend = SqlBackend::open_in_memory().unwrap();
        assert_ok!(backend.close().await);
        assert_ok!(backend.close().await);
        assert!(matches!(
            backend.get(1).await.unwrap_err(),
            Error::BackendClosed
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers() {
        let backend = SqlBackend::open_in_memory().unwrap();
        let mut handles = Vec::new();
        for i in 0..32i64 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                backend.put(i, &format!("value_{}", i)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        for i in 0..32i64 {
            assert_eq!(backend.get(i).await.unwrap(), format!("value_{}", i));
        }
    }
}

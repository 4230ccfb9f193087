//! Persistence tests for the SQLite backend

use kvfront::storage::migrations;
use kvfront::{Backend, Error, SqlBackend};
use tempfile::TempDir;

#[tokio::test]
async fn test_backend_persistence() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("kv.db");

    // Write data
    {
        let backend = SqlBackend::open(&db_path).unwrap();
        backend.put(1, "value1").await.unwrap();
        backend.put(2, "value2").await.unwrap();
        backend.close().await.unwrap();
    }

    // Reopen and verify
    {
        let backend = SqlBackend::open(&db_path).unwrap();
        assert_eq!(backend.get(1).await.unwrap(), "value1");
        assert_eq!(backend.get(2).await.unwrap(), "value2");
        assert!(matches!(backend.get(3).await, Err(Error::NotFound(3))));
        backend.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_reopen_skips_applied_migrations() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("kv.db");

    for _ in 0..3 {
        let backend = SqlBackend::open(&db_path).unwrap();
        backend.close().await.unwrap();
    }

    let conn = rusqlite::Connection::open(&db_path).unwrap();
    assert_eq!(
        migrations::current_version(&conn).unwrap(),
        migrations::latest_version()
    );
}

#[test]
fn test_open_creates_parent_directories() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("data").join("kv.db");

    let backend = SqlBackend::open(&db_path).unwrap();
    assert_eq!(backend.path(), Some(db_path.as_path()));
    assert!(db_path.exists());
}

#[test]
fn test_open_refuses_newer_schema() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("kv.db");

    {
        let conn = rusqlite::Connection::open(&db_path).unwrap();
        conn.pragma_update(None, "user_version", migrations::latest_version() + 1)
            .unwrap();
    }

    let err = SqlBackend::open(&db_path).unwrap_err();
    assert!(matches!(err, Error::Migration(_)));
}

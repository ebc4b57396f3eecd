//! Integration tests for opening backends from settings.

#![cfg(feature = "sqlite")]

use centralmig_backends::{connect, DatabaseBackendType, Value};
use centralmig_core::settings::DatabaseSettings;
use centralmig_core::MigrationError;

#[tokio::test]
async fn test_connect_sqlite_memory() {
    let settings = DatabaseSettings {
        name: ":memory:".into(),
        ..DatabaseSettings::default()
    };
    let backend = connect(&settings).unwrap();
    assert_eq!(backend.vendor(), "sqlite");
    assert_eq!(backend.backend_type(), DatabaseBackendType::SQLite);

    backend
        .execute("CREATE TABLE t (name TEXT)", &[])
        .await
        .unwrap();
    backend
        .execute("INSERT INTO t (name) VALUES (?)", &[Value::from("billing")])
        .await
        .unwrap();
    let row = backend.query_one("SELECT name FROM t", &[]).await.unwrap();
    assert_eq!(row.get::<String>("name").unwrap(), "billing");
}

#[tokio::test]
async fn test_connect_sqlite_file_persists() {
    let dir = tempfile::tempdir().unwrap();
    let settings = DatabaseSettings {
        name: dir.path().join("db.sqlite3").to_string_lossy().into_owned(),
        ..DatabaseSettings::default()
    };

    {
        let backend = connect(&settings).unwrap();
        backend
            .execute("CREATE TABLE ledger (id INTEGER PRIMARY KEY)", &[])
            .await
            .unwrap();
    }

    let backend = connect(&settings).unwrap();
    assert!(backend.has_table("ledger").await.unwrap());
}

#[test]
fn test_connect_unknown_engine() {
    let settings = DatabaseSettings {
        engine: "mssql".into(),
        ..DatabaseSettings::default()
    };
    let err = connect(&settings).err().unwrap();
    assert!(matches!(err, MigrationError::ConfigurationError(_)));
}

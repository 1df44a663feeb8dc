//! SQLite object storage implementation
//!
//! Stores every object as a row of a single key/value table in a local
//! SQLite database file.

use super::object_store::{ObjectStore, StorageError, validate_key};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteConnectOptions};
use std::str::FromStr;

/// SQLite-based object storage implementation
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance with the given database path
    pub async fn new(database_path: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(database_path)
            .map_err(|e| StorageError::Backend(format!("Invalid database path: {}", e)))?
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to connect to SQLite: {}", e)))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create SQLite storage from environment variable
    ///
    /// Expects DATABASE_URL environment variable with SQLite connection string
    /// Example: sqlite:./data/vellum.db
    pub async fn from_env() -> Result<Self, StorageError> {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:./data/vellum.db".to_string());

        Self::new(&database_url).await
    }

    /// Initialize database schema
    async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS objects (
                key TEXT PRIMARY KEY,
                data BLOB NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("Failed to create objects table: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for SqliteStorage {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), StorageError> {
        validate_key(key)?;
        sqlx::query(
            r#"
            INSERT INTO objects (key, data) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET data = excluded.data
        "#,
        )
        .bind(key)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("Failed to store {}: {}", key, e)))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let row = sqlx::query("SELECT data FROM objects WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to read {}: {}", key, e)))?;

        match row {
            Some(row) => Ok(row.get::<Vec<u8>, _>("data")),
            None => Err(StorageError::NotFound(key.to_string())),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let row = sqlx::query("SELECT 1 FROM objects WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to query {}: {}", key, e)))?;

        Ok(row.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM objects WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to delete {}: {}", key, e)))?;

        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT key FROM objects
            WHERE substr(key, 1, length(?)) = ?
            ORDER BY key ASC
        "#,
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("Failed to list {}: {}", prefix, e)))?;

        Ok(rows.iter().map(|row| row.get::<String, _>("key")).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_sqlite_storage_workflow() {
        let temp_dir = tempdir().unwrap();
        let db_path = format!("sqlite:{}/test.db", temp_dir.path().display());
        let storage = SqliteStorage::new(&db_path).await.unwrap();

        storage.put("projects/a.json", b"one".to_vec()).await.unwrap();
        storage.put("projects/a.json", b"two".to_vec()).await.unwrap();
        storage.put("projects/b.json", b"three".to_vec()).await.unwrap();
        storage.put("blobs/x", b"four".to_vec()).await.unwrap();

        assert_eq!(storage.get("projects/a.json").await.unwrap(), b"two".to_vec());
        assert_eq!(
            storage.list_keys("projects/").await.unwrap(),
            vec!["projects/a.json".to_string(), "projects/b.json".to_string()]
        );

        storage.delete("projects/a.json").await.unwrap();
        assert!(!storage.exists("projects/a.json").await.unwrap());
        assert!(matches!(
            storage.get("projects/a.json").await,
            Err(StorageError::NotFound(_))
        ));
    }
}

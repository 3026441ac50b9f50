use std::path::Path;

use async_trait::async_trait;
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::error::StoreError;

use super::{Record, RecordStore};

/// SQLite-backed store. Records are kept as JSON bodies keyed by
/// `(collection, id)`, so one database file serves every record type.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

fn sqlite_error(context: &'static str) -> impl FnOnce(tokio_rusqlite::Error) -> StoreError {
    move |source| StoreError::Sqlite { context, source }
}

impl SqliteStore {
    /// Opens (creating when needed) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be opened or the schema cannot be
    /// created.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .await
            .map_err(sqlite_error("open sqlite store"))?;
        Self::with_connection(conn).await
    }

    /// # Errors
    ///
    /// Returns an error when the schema cannot be created.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(sqlite_error("open sqlite store"))?;
        Self::with_connection(conn).await
    }

    async fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS records (
                    collection TEXT NOT NULL,
                    id TEXT NOT NULL,
                    body TEXT NOT NULL,
                    PRIMARY KEY (collection, id)
                );",
            )?;
            Ok(())
        })
        .await
        .map_err(sqlite_error("initialize sqlite store"))?;
        Ok(Self { conn })
    }
}

fn encode<R: Record>(record: &R) -> Result<String, StoreError> {
    serde_json::to_string(record).map_err(|source| StoreError::Encode {
        collection: R::COLLECTION,
        source,
    })
}

fn decode<R: Record>(id: &str, body: &str) -> Result<R, StoreError> {
    serde_json::from_str(body).map_err(|source| StoreError::Decode {
        collection: R::COLLECTION,
        id: id.to_owned(),
        source,
    })
}

#[async_trait]
impl<R: Record> RecordStore<R> for SqliteStore {
    async fn insert(&self, record: &R) -> Result<(), StoreError> {
        let id = record.record_id().to_owned();
        let body = encode(record)?;
        let key = id.clone();
        let inserted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "INSERT OR IGNORE INTO records (collection, id, body) VALUES (?1, ?2, ?3)",
                    rusqlite::params![R::COLLECTION, key, body],
                )?;
                Ok(changed)
            })
            .await
            .map_err(sqlite_error("insert record"))?;
        if inserted == 0 {
            return Err(StoreError::Duplicate {
                collection: R::COLLECTION,
                id,
            });
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<R>, StoreError> {
        let key = id.to_owned();
        let body = self
            .conn
            .call(move |conn| {
                let body = conn
                    .query_row(
                        "SELECT body FROM records WHERE collection = ?1 AND id = ?2",
                        rusqlite::params![R::COLLECTION, key],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(body)
            })
            .await
            .map_err(sqlite_error("find record"))?;
        body.map(|body| decode(id, &body)).transpose()
    }

    async fn update(&self, record: &R) -> Result<(), StoreError> {
        let id = record.record_id().to_owned();
        let body = encode(record)?;
        let key = id.clone();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE records SET body = ?3 WHERE collection = ?1 AND id = ?2",
                    rusqlite::params![R::COLLECTION, key, body],
                )?;
                Ok(changed)
            })
            .await
            .map_err(sqlite_error("update record"))?;
        if changed == 0 {
            return Err(StoreError::Missing {
                collection: R::COLLECTION,
                id,
            });
        }
        Ok(())
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool, StoreError> {
        let key = id.to_owned();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "DELETE FROM records WHERE collection = ?1 AND id = ?2",
                    rusqlite::params![R::COLLECTION, key],
                )?;
                Ok(changed)
            })
            .await
            .map_err(sqlite_error("delete record"))?;
        Ok(changed > 0)
    }

    async fn list(&self) -> Result<Vec<R>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, body FROM records WHERE collection = ?1 ORDER BY id",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![R::COLLECTION], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(sqlite_error("list records"))?;
        rows.iter().map(|(id, body)| decode(id, body)).collect()
    }
}

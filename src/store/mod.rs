//! Record persistence shared by runs and agents.
//!
//! Every operation touches exactly one record and is atomic on its own; there
//! are no multi-record transactions.
mod locks;
mod memory;
mod sqlite;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{AgentRecord, RunRecord};
use crate::error::StoreError;

pub use locks::{KeyGuard, KeyedLocks};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A persisted record with a stable string id inside a named collection.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: &'static str;

    fn record_id(&self) -> &str;
}

impl Record for RunRecord {
    const COLLECTION: &'static str = "runs";

    fn record_id(&self) -> &str {
        self.id.as_str()
    }
}

impl Record for AgentRecord {
    const COLLECTION: &'static str = "agents";

    fn record_id(&self) -> &str {
        self.id.as_str()
    }
}

#[async_trait]
pub trait RecordStore<R: Record>: Send + Sync {
    /// Stores a new record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] when the id is already present.
    async fn insert(&self, record: &R) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// Returns an error when the backend fails or the stored record cannot be
    /// decoded.
    async fn find_by_id(&self, id: &str) -> Result<Option<R>, StoreError>;

    /// Replaces an existing record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Missing`] when no record with this id exists.
    async fn update(&self, record: &R) -> Result<(), StoreError>;

    /// Returns whether a record was removed.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend fails.
    async fn delete_by_id(&self, id: &str) -> Result<bool, StoreError>;

    /// All records in id order.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend fails or a record cannot be decoded.
    async fn list(&self) -> Result<Vec<R>, StoreError>;
}

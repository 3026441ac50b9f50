use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::StoreError;

use super::{Record, RecordStore};

/// Process-local store; contents are lost on exit.
#[derive(Debug)]
pub struct MemoryStore<R> {
    records: Mutex<BTreeMap<String, R>>,
}

impl<R> Default for MemoryStore<R> {
    fn default() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<R> MemoryStore<R> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_records<T>(&self, f: impl FnOnce(&mut BTreeMap<String, R>) -> T) -> T {
        let mut guard = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

#[async_trait]
impl<R: Record> RecordStore<R> for MemoryStore<R> {
    async fn insert(&self, record: &R) -> Result<(), StoreError> {
        self.with_records(|records| {
            let id = record.record_id();
            if records.contains_key(id) {
                return Err(StoreError::Duplicate {
                    collection: R::COLLECTION,
                    id: id.to_owned(),
                });
            }
            records.insert(id.to_owned(), record.clone());
            Ok(())
        })
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<R>, StoreError> {
        Ok(self.with_records(|records| records.get(id).cloned()))
    }

    async fn update(&self, record: &R) -> Result<(), StoreError> {
        self.with_records(|records| match records.get_mut(record.record_id()) {
            Some(slot) => {
                *slot = record.clone();
                Ok(())
            }
            None => Err(StoreError::Missing {
                collection: R::COLLECTION,
                id: record.record_id().to_owned(),
            }),
        })
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.with_records(|records| records.remove(id).is_some()))
    }

    async fn list(&self) -> Result<Vec<R>, StoreError> {
        Ok(self.with_records(|records| records.values().cloned().collect()))
    }
}

use bytes::Bytes;
use dashmap::DashMap;
use ffs_core::datastore::{Datastore, DatastoreError, DatastoreResult, Entry, QueryStream};
use ffs_core::Key;
use futures::stream;
use std::sync::atomic::{AtomicBool, Ordering};

/// Volatile datastore, mostly useful for tests and dry runs.
#[derive(Debug)]
pub struct MemoryDatastore {
    entries: DashMap<Key, Bytes>,
    closed: AtomicBool,
}

impl MemoryDatastore {
    /// Creates a new, empty `MemoryDatastore`.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn ensure_open(&self) -> DatastoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DatastoreError::Closed);
        }
        Ok(())
    }
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Datastore for MemoryDatastore {
    async fn get(&self, key: &Key) -> DatastoreResult<Bytes> {
        self.ensure_open()?;
        self.entries
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or(DatastoreError::NotFound)
    }

    async fn has(&self, key: &Key) -> DatastoreResult<bool> {
        self.ensure_open()?;
        Ok(self.entries.contains_key(key))
    }

    async fn put(&self, key: &Key, value: Bytes) -> DatastoreResult<()> {
        self.ensure_open()?;
        self.entries.insert(key.clone(), value);
        Ok(())
    }

    async fn delete(&self, key: &Key) -> DatastoreResult<()> {
        self.ensure_open()?;
        self.entries.remove(key);
        Ok(())
    }

    /// Snapshots the matching entries; writes made while the stream is
    /// consumed are not observed.
    async fn query(&self, prefix: &Key) -> DatastoreResult<QueryStream> {
        self.ensure_open()?;
        let mut entries: Vec<Entry> = self
            .entries
            .iter()
            .filter(|entry| entry.key().is_descendant_of(prefix))
            .map(|entry| Entry {
                key: entry.key().clone(),
                value: entry.value().clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(Box::new(stream::iter(entries.into_iter().map(Ok))))
    }

    async fn close(&self) -> DatastoreResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

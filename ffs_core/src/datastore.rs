use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::sync::Arc;

use crate::key::Key;

pub type DatastoreResult<T, E = DatastoreError> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum DatastoreError {
    #[error("key not found")]
    NotFound,
    #[error("datastore is closed")]
    Closed,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl DatastoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DatastoreError::NotFound)
    }
}

/// A key/value pair yielded by [`Datastore::query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Key,
    pub value: Bytes,
}

pub type QueryStream =
    Box<dyn Stream<Item = DatastoreResult<Entry>> + Send + Unpin + 'static>;

/// Persistent mapping from [`Key`]s to byte values.
///
/// # Semantics
///
/// - `get` of an absent key fails with [`DatastoreError::NotFound`].
/// - `delete` of an absent key succeeds.
/// - `query(prefix)` yields every strict descendant of `prefix` in
///   ascending key order. The root key selects everything.
/// - After `close`, every call fails with [`DatastoreError::Closed`].
///
/// Any call may block on I/O.
#[async_trait]
pub trait Datastore: std::fmt::Debug + Send + Sync + 'static {
    async fn get(&self, key: &Key) -> DatastoreResult<Bytes>;

    async fn has(&self, key: &Key) -> DatastoreResult<bool> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(DatastoreError::NotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn put(&self, key: &Key, value: Bytes) -> DatastoreResult<()>;

    async fn delete(&self, key: &Key) -> DatastoreResult<()>;

    async fn query(&self, prefix: &Key) -> DatastoreResult<QueryStream>;

    async fn close(&self) -> DatastoreResult<()>;
}

#[async_trait]
impl<T: Datastore + ?Sized> Datastore for Arc<T> {
    async fn get(&self, key: &Key) -> DatastoreResult<Bytes> {
        (**self).get(key).await
    }

    async fn has(&self, key: &Key) -> DatastoreResult<bool> {
        (**self).has(key).await
    }

    async fn put(&self, key: &Key, value: Bytes) -> DatastoreResult<()> {
        (**self).put(key, value).await
    }

    async fn delete(&self, key: &Key) -> DatastoreResult<()> {
        (**self).delete(key).await
    }

    async fn query(&self, prefix: &Key) -> DatastoreResult<QueryStream> {
        (**self).query(prefix).await
    }

    async fn close(&self) -> DatastoreResult<()> {
        (**self).close().await
    }
}

/// A view of a shared datastore rooted at a fixed key prefix.
///
/// Keys passed in are relative to the prefix, and keys returned by
/// `query` are re-rooted the same way. This lets several components share
/// one backing store while each owns a disjoint namespace.
#[derive(Debug, Clone)]
pub struct NamespacedDatastore {
    inner: Arc<dyn Datastore>,
    prefix: Key,
}

impl NamespacedDatastore {
    pub fn new(inner: Arc<dyn Datastore>, prefix: impl Into<Key>) -> Self {
        Self {
            inner,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Key {
        &self.prefix
    }

    fn full_key(&self, key: &Key) -> Key {
        self.prefix.join(key)
    }
}

#[async_trait]
impl Datastore for NamespacedDatastore {
    async fn get(&self, key: &Key) -> DatastoreResult<Bytes> {
        self.inner.get(&self.full_key(key)).await
    }

    async fn has(&self, key: &Key) -> DatastoreResult<bool> {
        self.inner.has(&self.full_key(key)).await
    }

    async fn put(&self, key: &Key, value: Bytes) -> DatastoreResult<()> {
        self.inner.put(&self.full_key(key), value).await
    }

    async fn delete(&self, key: &Key) -> DatastoreResult<()> {
        self.inner.delete(&self.full_key(key)).await
    }

    async fn query(&self, prefix: &Key) -> DatastoreResult<QueryStream> {
        let ns = self.prefix.clone();
        let stream = self.inner.query(&self.full_key(prefix)).await?;
        let stream = stream.map(move |item| -> DatastoreResult<Entry> {
            let entry = item?;
            let key = entry.key.strip_prefix(&ns).ok_or_else(|| {
                anyhow::anyhow!("query returned {} outside namespace {}", entry.key, ns)
            })?;
            Ok(Entry {
                key,
                value: entry.value,
            })
        });
        Ok(Box::new(stream))
    }

    async fn close(&self) -> DatastoreResult<()> {
        // The shared store is closed by its owner.
        Ok(())
    }
}

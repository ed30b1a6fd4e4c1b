//! RedbDatastore - A durable datastore backed by redb.

use bytes::Bytes;
use ffs_core::datastore::{Datastore, DatastoreError, DatastoreResult, Entry, QueryStream};
use ffs_core::Key;
use redb::{Database, ReadableDatabase, TableDefinition};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// File created inside the datastore directory.
pub const DB_FILE: &str = "datastore.redb";

const TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("datastore");

/// `Datastore` implementation backed by a single Redb database file.
///
/// Every operation runs in its own transaction on the blocking pool, so a
/// successful `put` or `delete` is durable once it returns.
pub struct RedbDatastore {
    path: PathBuf,
    db: RwLock<Option<Arc<Database>>>,
}

impl RedbDatastore {
    /// Opens (or creates) the datastore stored in directory `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(DB_FILE);
        let db = Database::create(&path)?;

        // Create the table up front so a first read on a fresh file
        // doesn't fail with a missing table.
        {
            let write_txn = db.begin_write()?;
            {
                let _ = write_txn.open_table(TABLE)?;
            }
            write_txn.commit()?;
        }
        debug!(path = %path.display(), "opened redb datastore");

        Ok(Self {
            path,
            db: RwLock::new(Some(Arc::new(db))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn db(&self) -> DatastoreResult<Arc<Database>> {
        self.db
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(DatastoreError::Closed)
    }

    async fn blocking<T, F>(&self, op: &'static str, f: F) -> DatastoreResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db()?;
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| anyhow::anyhow!("redb {op} task failed: {e}"))?
            .map_err(DatastoreError::from)
    }
}

impl std::fmt::Debug for RedbDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbDatastore")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait::async_trait]
impl Datastore for RedbDatastore {
    async fn get(&self, key: &Key) -> DatastoreResult<Bytes> {
        let key = key.clone();
        let value = self
            .blocking("read", move |db| -> anyhow::Result<Option<Bytes>> {
                let read_txn = db.begin_read()?;
                let table = read_txn.open_table(TABLE)?;
                Ok(table
                    .get(key.as_str())?
                    .map(|guard| Bytes::copy_from_slice(guard.value())))
            })
            .await?;
        value.ok_or(DatastoreError::NotFound)
    }

    async fn put(&self, key: &Key, value: Bytes) -> DatastoreResult<()> {
        let key = key.clone();
        self.blocking("write", move |db| {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(TABLE)?;
                table.insert(key.as_str(), value.as_ref())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &Key) -> DatastoreResult<()> {
        let key = key.clone();
        self.blocking("delete", move |db| {
            let write_txn = db.begin_write()?;
            {
                let mut table = write_txn.open_table(TABLE)?;
                table.remove(key.as_str())?;
            }
            write_txn.commit()?;
            Ok(())
        })
        .await
    }

    async fn query(&self, prefix: &Key) -> DatastoreResult<QueryStream> {
        let prefix = prefix.clone();
        let entries = self
            .blocking("query", move |db| -> anyhow::Result<Vec<Entry>> {
                let read_txn = db.begin_read()?;
                let table = read_txn.open_table(TABLE)?;

                let start = if prefix.is_root() {
                    "/".to_owned()
                } else {
                    format!("{prefix}/")
                };

                let mut entries = Vec::new();
                for item in table.range(start.as_str()..)? {
                    let (key, value) = item?;
                    let key = key.value();
                    if !key.starts_with(&start) {
                        break;
                    }
                    let key = Key::new(key);
                    if key.is_descendant_of(&prefix) {
                        entries.push(Entry {
                            key,
                            value: Bytes::copy_from_slice(value.value()),
                        });
                    }
                }
                Ok(entries)
            })
            .await?;
        Ok(Box::new(futures::stream::iter(entries.into_iter().map(Ok))))
    }

    async fn close(&self) -> DatastoreResult<()> {
        let db = self.db.write().unwrap_or_else(PoisonError::into_inner).take();
        if db.is_some() {
            debug!(path = %self.path.display(), "closed redb datastore");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ffs_core::testutil::DatastoreTests;

    #[tokio::test]
    async fn test_redb_datastore() {
        let temp_dir = tempfile::tempdir().unwrap();
        let ds = RedbDatastore::open(temp_dir.path()).unwrap();
        let tests = DatastoreTests::new(&ds);
        tests.run_all().await.unwrap();
        tests.test_close().await.unwrap();
    }

    #[tokio::test]
    async fn creates_the_database_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("repo");
        let ds = RedbDatastore::open(&dir).unwrap();
        assert_eq!(ds.path(), dir.join(DB_FILE));
        assert!(dir.join(DB_FILE).exists());
    }
}

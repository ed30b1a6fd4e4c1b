use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use ffs_core::datastore::{DatastoreResult, QueryStream};
use ffs_core::{Cid, Datastore, DatastoreError, Key, NamespacedDatastore, StorageConfig};
use ffs_ds_memory::MemoryDatastore;
use ffs_ds_redb::RedbDatastore;
use ffs_scheduler::{TrackStore, TrackStoreError};

fn cid(n: u32) -> Cid {
    Cid::raw_blake3(n.to_le_bytes())
}

fn repairable() -> StorageConfig {
    StorageConfig::default()
        .with_hot_enabled(true)
        .with_hot_ipfs_add_timeout(30)
        .with_repairable(true)
}

fn renewable() -> StorageConfig {
    StorageConfig::default()
        .with_hot_enabled(true)
        .with_cold_enabled(true)
        .with_cold_fil_renew(true, 100)
}

fn untracked() -> StorageConfig {
    StorageConfig::default()
        .with_hot_enabled(true)
        .with_cold_enabled(true)
}

fn sorted(mut cids: Vec<Cid>) -> Vec<Cid> {
    cids.sort();
    cids
}

#[tokio::test]
async fn untracking_clears_indices_and_record() -> anyhow::Result<()> {
    let ds = Arc::new(MemoryDatastore::new());
    let store = TrackStore::open(ds.clone()).await?;
    let c = cid(1);

    store.put(&c, &repairable()).await?;
    assert_eq!(store.get_repairables().await, vec![c.clone()]);
    assert_eq!(store.get(&c).await?, repairable());

    store.put(&c, &untracked()).await?;
    assert!(store.get_repairables().await.is_empty());
    assert!(store.get_renewables().await.is_empty());
    let err = store.get(&c).await.unwrap_err();
    assert!(matches!(err, TrackStoreError::NotFound(_)));
    assert!(err.is_not_found());
    assert!(ds.is_empty());
    Ok(())
}

#[tokio::test]
async fn untracked_config_is_never_written() -> anyhow::Result<()> {
    let ds = Arc::new(MemoryDatastore::new());
    let store = TrackStore::open(ds.clone()).await?;

    store.put(&cid(1), &untracked()).await?;
    assert!(ds.is_empty());
    assert!(store.get(&cid(1)).await.unwrap_err().is_not_found());
    Ok(())
}

#[tokio::test]
async fn flags_move_between_indices() -> anyhow::Result<()> {
    let store = TrackStore::open(Arc::new(MemoryDatastore::new())).await?;
    let c = cid(1);

    store.put(&c, &renewable()).await?;
    assert!(store.get_repairables().await.is_empty());
    assert_eq!(store.get_renewables().await, vec![c.clone()]);

    let both = renewable().with_repairable(true);
    store.put(&c, &both).await?;
    assert_eq!(store.get_repairables().await, vec![c.clone()]);
    assert_eq!(store.get_renewables().await, vec![c.clone()]);
    assert_eq!(store.get(&c).await?, both);

    store.put(&c, &repairable()).await?;
    assert_eq!(store.get_repairables().await, vec![c.clone()]);
    assert!(store.get_renewables().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn remove_prunes_indices() -> anyhow::Result<()> {
    let ds = Arc::new(MemoryDatastore::new());
    let store = TrackStore::open(ds.clone()).await?;

    store.put(&cid(1), &repairable()).await?;
    store.put(&cid(2), &renewable()).await?;
    store.remove(&cid(1)).await?;
    store.remove(&cid(2)).await?;
    // removing an untracked cid is fine
    store.remove(&cid(3)).await?;

    assert!(store.get_repairables().await.is_empty());
    assert!(store.get_renewables().await.is_empty());
    assert!(ds.is_empty());
    Ok(())
}

#[tokio::test]
async fn reopen_rebuilds_indices() -> anyhow::Result<()> {
    let temp_dir = tempfile::tempdir()?;

    {
        let ds = Arc::new(RedbDatastore::open(temp_dir.path())?);
        let scoped = Arc::new(NamespacedDatastore::new(ds.clone(), "/ffs/scheduler/tstore"));
        let store = TrackStore::open(scoped).await?;
        for n in 0..6 {
            let sc = match n % 3 {
                0 => repairable(),
                1 => renewable(),
                _ => renewable().with_repairable(true),
            };
            store.put(&cid(n), &sc).await?;
        }
        store.put(&cid(5), &untracked()).await?;
        // unrelated data in the shared store stays invisible
        ds.put(&Key::new("/pins/x"), Bytes::from_static(b"{}"))
            .await?;
        ds.close().await?;
    }

    let ds = Arc::new(RedbDatastore::open(temp_dir.path())?);
    let scoped = Arc::new(NamespacedDatastore::new(ds, "/ffs/scheduler/tstore"));
    let store = TrackStore::open(scoped).await?;

    assert_eq!(
        sorted(store.get_repairables().await),
        sorted(vec![cid(0), cid(2), cid(3)])
    );
    assert_eq!(
        sorted(store.get_renewables().await),
        sorted(vec![cid(1), cid(2), cid(4)])
    );
    assert_eq!(store.get(&cid(4)).await?, renewable());
    Ok(())
}

#[tokio::test]
async fn malformed_record_aborts_open() {
    let ds = Arc::new(MemoryDatastore::new());
    let c = cid(1);
    ds.put(&Key::root().child(c.to_string()), Bytes::from_static(b"[1, 2"))
        .await
        .unwrap();
    assert!(matches!(
        TrackStore::open(ds).await,
        Err(TrackStoreError::Decode { .. })
    ));

    let ds = Arc::new(MemoryDatastore::new());
    ds.put(&Key::new("/not-a-cid"), Bytes::from_static(b"{}"))
        .await
        .unwrap();
    assert!(matches!(
        TrackStore::open(ds).await,
        Err(TrackStoreError::InvalidKey { .. })
    ));
}

#[tokio::test]
async fn untracked_put_deletes_unindexed_record() -> anyhow::Result<()> {
    let ds = Arc::new(MemoryDatastore::new());
    let c = cid(1);
    let plain = StorageConfig::default().with_hot_enabled(true);
    ds.put(
        &Key::root().child(c.to_string()),
        serde_json::to_vec(&plain)?.into(),
    )
    .await?;

    let store = TrackStore::open(ds.clone()).await?;
    assert!(store.get_repairables().await.is_empty());
    assert_eq!(store.get(&c).await?, plain);

    store.put(&c, &untracked()).await?;
    assert!(store.get(&c).await.unwrap_err().is_not_found());
    assert!(ds.is_empty());
    Ok(())
}

/// Memory datastore whose writes can be switched off.
#[derive(Debug, Default)]
struct FlakyDatastore {
    inner: MemoryDatastore,
    fail_writes: AtomicBool,
}

impl FlakyDatastore {
    fn check_writable(&self) -> DatastoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("disk on fire").into());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Datastore for FlakyDatastore {
    async fn get(&self, key: &Key) -> DatastoreResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &Key, value: Bytes) -> DatastoreResult<()> {
        self.check_writable()?;
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &Key) -> DatastoreResult<()> {
        self.check_writable()?;
        self.inner.delete(key).await
    }

    async fn query(&self, prefix: &Key) -> DatastoreResult<QueryStream> {
        self.inner.query(prefix).await
    }

    async fn close(&self) -> DatastoreResult<()> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn failed_writes_leave_store_untouched() -> anyhow::Result<()> {
    let ds = Arc::new(FlakyDatastore::default());
    let store = TrackStore::open(ds.clone()).await?;
    let (tracked, other) = (cid(1), cid(2));
    store.put(&tracked, &repairable()).await?;

    ds.fail_writes.store(true, Ordering::SeqCst);

    let err = store.put(&tracked, &renewable()).await.unwrap_err();
    assert!(matches!(
        err,
        TrackStoreError::Datastore {
            source: DatastoreError::Backend(_),
            ..
        }
    ));
    assert!(store.put(&other, &renewable()).await.is_err());
    assert!(store.put(&tracked, &untracked()).await.is_err());
    assert!(store.remove(&tracked).await.is_err());

    assert_eq!(store.get_repairables().await, vec![tracked.clone()]);
    assert!(store.get_renewables().await.is_empty());
    assert_eq!(store.get(&tracked).await?, repairable());
    assert!(store.get(&other).await.unwrap_err().is_not_found());
    assert_eq!(ds.inner.len(), 1);

    ds.fail_writes.store(false, Ordering::SeqCst);
    let reopened = TrackStore::open(ds.clone()).await?;
    assert_eq!(reopened.get_repairables().await, vec![tracked]);
    assert!(reopened.get_renewables().await.is_empty());
    Ok(())
}

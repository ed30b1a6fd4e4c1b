use std::sync::Arc;

use bytes::Bytes;
use ffs_cfg::{
    TransformError, apply_transform, apply_transform_with, bump_add_timeout,
    clamp_unlimited_price,
};
use ffs_core::datastore::{DatastoreResult, QueryStream};
use ffs_core::{ApiId, Cid, Datastore, DatastoreError, Key, StorageConfig};
use ffs_ds_memory::MemoryDatastore;
use ffs_ds_redb::RedbDatastore;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

const TENANTS: [&str; 3] = [
    "274cb2c5-a0da-49fa-91a8-97b9d387d4fa",
    "0b9d6a0e-6c8d-4d57-9f5e-2f3a1f8b7c11",
    "c5e7f2d4-1a3b-4c6d-8e9f-0a1b2c3d4e5f",
];

fn config_key(tenant: &str, cid: &Cid) -> Key {
    Key::new(format!(
        "/ffs/manager/api/{tenant}/istore/cidstorageconfig/{cid}"
    ))
}

/// Writes `count` matching storage configs with add timeouts below 12345,
/// plus records the transformer must leave alone.
async fn seed_corpus(ds: &dyn Datastore, count: u32) -> Vec<Key> {
    let mut keys = Vec::new();
    for n in 0..count {
        let tenant = TENANTS[n as usize % TENANTS.len()];
        let key = config_key(tenant, &Cid::raw_blake3(n.to_le_bytes()));
        let cfg = StorageConfig::default()
            .with_hot_enabled(true)
            .with_hot_ipfs_add_timeout(30 + i64::from(n % 300))
            .with_repairable(n % 2 == 0);
        ds.put(&key, serde_json::to_vec(&cfg).unwrap().into())
            .await
            .unwrap();
        keys.push(key);
    }

    let low = serde_json::to_vec(&StorageConfig::default().with_hot_ipfs_add_timeout(1)).unwrap();
    for other in [
        format!("/ffs/manager/api/{}/istore/cidinfo/Qm1", TENANTS[0]),
        format!("/ffs/manager/api/{}/config", TENANTS[0]),
        "/ffs/scheduler/tstore/Qm1".to_owned(),
        "/pins/Qm1".to_owned(),
    ] {
        ds.put(&Key::new(other), Bytes::from(low.clone()))
            .await
            .unwrap();
    }
    keys
}

async fn add_timeout(ds: &dyn Datastore, key: &Key) -> i64 {
    let buf = ds.get(key).await.unwrap();
    let cfg: StorageConfig = serde_json::from_slice(&buf).unwrap();
    cfg.hot.ipfs.add_timeout
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bumps_every_matching_record() {
    let ds = Arc::new(MemoryDatastore::new());
    let keys = seed_corpus(ds.as_ref(), 678).await;

    let modified = apply_transform(
        ds.clone(),
        false,
        bump_add_timeout(12345),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(modified, 678);

    for key in &keys {
        assert_eq!(add_timeout(ds.as_ref(), key).await, 12345);
    }
    let untouched = Key::new("/ffs/scheduler/tstore/Qm1");
    assert_eq!(add_timeout(ds.as_ref(), &untouched).await, 1);

    // running it again finds nothing to do
    let modified = apply_transform(
        ds.clone(),
        false,
        bump_add_timeout(12345),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(modified, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dry_run_counts_without_writing() {
    let ds = Arc::new(MemoryDatastore::new());
    let keys = seed_corpus(ds.as_ref(), 678).await;
    let mut before = Vec::new();
    for key in &keys {
        before.push(ds.get(key).await.unwrap());
    }

    let modified = apply_transform(
        ds.clone(),
        true,
        bump_add_timeout(12345),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(modified, 678);

    for (key, value) in keys.iter().zip(before) {
        assert_eq!(ds.get(key).await.unwrap(), value);
    }
}

#[tokio::test]
async fn works_on_a_redb_repo() {
    let temp_dir = tempfile::tempdir().unwrap();
    let keys = {
        let ds = RedbDatastore::open(temp_dir.path()).unwrap();
        let keys = seed_corpus(&ds, 40).await;
        ds.close().await.unwrap();
        keys
    };

    let ds: Arc<dyn Datastore> = Arc::new(RedbDatastore::open(temp_dir.path()).unwrap());
    let modified = apply_transform_with(
        ds.clone(),
        false,
        bump_add_timeout(12345),
        CancellationToken::new(),
        8,
    )
    .await
    .unwrap();
    assert_eq!(modified, 40);
    assert_eq!(add_timeout(ds.as_ref(), &keys[17]).await, 12345);
}

#[tokio::test]
async fn unknown_fields_survive() {
    let ds = Arc::new(MemoryDatastore::new());
    let key = config_key(TENANTS[0], &Cid::raw_blake3(b"extra"));
    let raw = serde_json::json!({
        "Hot": {"Enabled": true, "Ipfs": {"AddTimeout": 10, "Gateway": "local"}},
        "Cold": {"Enabled": false, "Filecoin": {"MaxPrice": 0, "Notes": [1, 2]}},
        "Repairable": false,
        "Legacy": {"Flag": true},
    });
    ds.put(&key, serde_json::to_vec(&raw).unwrap().into())
        .await
        .unwrap();

    let modified = apply_transform(
        ds.clone(),
        false,
        clamp_unlimited_price(100),
        CancellationToken::new(),
    )
    .await
    .unwrap();
    assert_eq!(modified, 1);

    let stored: serde_json::Value = serde_json::from_slice(&ds.get(&key).await.unwrap()).unwrap();
    assert_eq!(stored["Cold"]["Filecoin"]["MaxPrice"], 100);
    assert_eq!(stored["Cold"]["Filecoin"]["Notes"], serde_json::json!([1, 2]));
    assert_eq!(stored["Hot"]["Ipfs"]["Gateway"], "local");
    assert_eq!(stored["Hot"]["Ipfs"]["AddTimeout"], 10);
    assert_eq!(stored["Legacy"], serde_json::json!({"Flag": true}));
}

#[tokio::test]
async fn task_errors_are_collected() {
    let ds = Arc::new(MemoryDatastore::new());
    seed_corpus(ds.as_ref(), 20).await;
    for n in 0..3u32 {
        let key = config_key(&ApiId::new().to_string(), &Cid::raw_blake3(format!("bad{n}")));
        ds.put(&key, Bytes::from_static(b"{\"Hot\": 3"))
            .await
            .unwrap();
    }

    let err = apply_transform_with(
        ds.clone(),
        false,
        bump_add_timeout(12345),
        CancellationToken::new(),
        4,
    )
    .await
    .unwrap_err();
    match err {
        TransformError::Tasks(errors) => {
            assert_eq!(errors.len(), 3);
            assert!(errors.iter().all(|e| e.contains("unmarshaling storage config")));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        format!("{}", TransformError::Tasks(vec![String::new(); 3])),
        "finished with 3 errors"
    );
}

#[tokio::test]
async fn transform_failures_are_task_errors() {
    let ds = Arc::new(MemoryDatastore::new());
    seed_corpus(ds.as_ref(), 10).await;

    let picky: ffs_cfg::Transform = Arc::new(|cfg: &mut StorageConfig| -> anyhow::Result<bool> {
        anyhow::ensure!(!cfg.repairable, "refusing repairable config");
        Ok(false)
    });
    let err = apply_transform(ds, false, picky, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TransformError::Tasks(ref errors) if errors.len() == 5));
}

#[tokio::test]
async fn cancelled_run_schedules_nothing_more() {
    let ds = Arc::new(MemoryDatastore::new());
    let keys = seed_corpus(ds.as_ref(), 50).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = apply_transform(ds.clone(), false, bump_add_timeout(12345), cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, TransformError::Cancelled { modified: 0 }));
    for key in &keys {
        assert_ne!(add_timeout(ds.as_ref(), key).await, 12345);
    }
}

/// Datastore whose queries fail after yielding the real entries.
#[derive(Debug, Default)]
struct BrokenQuery {
    inner: MemoryDatastore,
}

#[async_trait::async_trait]
impl Datastore for BrokenQuery {
    async fn get(&self, key: &Key) -> DatastoreResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &Key, value: Bytes) -> DatastoreResult<()> {
        self.inner.put(key, value).await
    }

    async fn delete(&self, key: &Key) -> DatastoreResult<()> {
        self.inner.delete(key).await
    }

    async fn query(&self, prefix: &Key) -> DatastoreResult<QueryStream> {
        let entries = self.inner.query(prefix).await?;
        let failure = futures::stream::iter([Err(DatastoreError::Backend(anyhow::anyhow!(
            "cursor lost"
        )))]);
        Ok(Box::new(entries.chain(failure)))
    }

    async fn close(&self) -> DatastoreResult<()> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn query_failure_stops_the_run() {
    let ds = Arc::new(BrokenQuery::default());
    seed_corpus(&ds.inner, 5).await;

    let err = apply_transform(ds, false, bump_add_timeout(12345), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TransformError::Query(DatastoreError::Backend(_))));
}

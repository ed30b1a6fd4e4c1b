use std::collections::HashSet;
use std::sync::Arc;

use ffs_core::cid::CidError;
use ffs_core::datastore::{Datastore, DatastoreError};
use ffs_core::{Cid, Key, StorageConfig};
use futures::TryStreamExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(thiserror::Error, Debug)]
pub enum TrackStoreError {
    #[error("{0} isn't tracked")]
    NotFound(Cid),
    #[error("{op}: {source}")]
    Datastore {
        op: &'static str,
        #[source]
        source: DatastoreError,
    },
    #[error("marshaling storage config: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("unmarshaling storage config at {key}: {source}")]
    Decode {
        key: Key,
        #[source]
        source: serde_json::Error,
    },
    #[error("decoding cid from key {key}: {source}")]
    InvalidKey {
        key: Key,
        #[source]
        source: CidError,
    },
}

impl TrackStoreError {
    fn datastore(op: &'static str) -> impl FnOnce(DatastoreError) -> Self {
        move |source| Self::Datastore { op, source }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Datastore { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

pub type Result<T, E = TrackStoreError> = std::result::Result<T, E>;

#[derive(Debug, Default)]
struct Indices {
    repairables: HashSet<Cid>,
    renewables: HashSet<Cid>,
}

impl Indices {
    fn classify(&mut self, cid: &Cid, sc: &StorageConfig) {
        set_membership(&mut self.repairables, cid, sc.is_repairable());
        set_membership(&mut self.renewables, cid, sc.is_renewable());
    }

    fn contains(&self, cid: &Cid) -> bool {
        self.repairables.contains(cid) || self.renewables.contains(cid)
    }

    fn evict(&mut self, cid: &Cid) {
        self.repairables.remove(cid);
        self.renewables.remove(cid);
    }
}

fn set_membership(set: &mut HashSet<Cid>, cid: &Cid, member: bool) {
    if member {
        set.insert(cid.clone());
    } else {
        set.remove(cid);
    }
}

/// Latest storage config of every Cid that is repairable or renewable.
///
/// Each tracked Cid has one record, `/<cid>` holding the config as JSON.
/// Two in-memory indices answer the "which Cids need repair / renewal"
/// questions without scanning the datastore; they are rebuilt on
/// [`TrackStore::open`] and kept in step with every write.
#[derive(Debug)]
pub struct TrackStore {
    ds: Arc<dyn Datastore>,
    indices: Mutex<Indices>,
}

impl TrackStore {
    pub async fn open(ds: Arc<dyn Datastore>) -> Result<Self> {
        let mut indices = Indices::default();
        let mut entries = ds
            .query(&Key::root())
            .await
            .map_err(TrackStoreError::datastore("querying tracked configs"))?;
        while let Some(entry) = entries
            .try_next()
            .await
            .map_err(TrackStoreError::datastore("reading tracked configs"))?
        {
            let sc: StorageConfig =
                serde_json::from_slice(&entry.value).map_err(|source| TrackStoreError::Decode {
                    key: entry.key.clone(),
                    source,
                })?;
            let cid = Cid::parse(entry.key.name()).map_err(|source| TrackStoreError::InvalidKey {
                key: entry.key.clone(),
                source,
            })?;
            indices.classify(&cid, &sc);
        }

        info!(
            repairables = indices.repairables.len(),
            renewables = indices.renewables.len(),
            "loaded trackstore"
        );
        Ok(Self {
            ds,
            indices: Mutex::new(indices),
        })
    }

    /// Records `sc` as the latest config of `cid`.
    ///
    /// A config that is neither repairable nor renewable stops tracking
    /// `cid` altogether.
    pub async fn put(&self, cid: &Cid, sc: &StorageConfig) -> Result<()> {
        let mut indices = self.indices.lock().await;
        let key = make_key(cid);

        if !sc.is_tracked() {
            // A persisted record without either flag isn't indexed.
            self.ds
                .delete(&key)
                .await
                .map_err(TrackStoreError::datastore("deleting untracked config"))?;
            if indices.contains(cid) {
                debug!(%cid, "stopped tracking");
            }
            indices.evict(cid);
            return Ok(());
        }

        let buf = serde_json::to_vec(sc).map_err(TrackStoreError::Encode)?;
        self.ds
            .put(&key, buf.into())
            .await
            .map_err(TrackStoreError::datastore("putting tracked config"))?;
        indices.classify(cid, sc);
        Ok(())
    }

    /// Latest tracked config of `cid`.
    pub async fn get(&self, cid: &Cid) -> Result<StorageConfig> {
        let key = make_key(cid);
        let buf = match self.ds.get(&key).await {
            Ok(buf) => buf,
            Err(DatastoreError::NotFound) => return Err(TrackStoreError::NotFound(cid.clone())),
            Err(err) => return Err(TrackStoreError::datastore("getting tracked config")(err)),
        };
        serde_json::from_slice(&buf).map_err(|source| TrackStoreError::Decode { key, source })
    }

    /// Stops tracking `cid`. Removing an untracked Cid is a no-op.
    pub async fn remove(&self, cid: &Cid) -> Result<()> {
        let mut indices = self.indices.lock().await;
        self.ds
            .delete(&make_key(cid))
            .await
            .map_err(TrackStoreError::datastore("deleting tracked config"))?;
        indices.evict(cid);
        Ok(())
    }

    pub async fn get_repairables(&self) -> Vec<Cid> {
        self.indices.lock().await.repairables.iter().cloned().collect()
    }

    pub async fn get_renewables(&self) -> Vec<Cid> {
        self.indices.lock().await.renewables.iter().cloned().collect()
    }
}

fn make_key(cid: &Cid) -> Key {
    Key::root().child(cid.to_string())
}

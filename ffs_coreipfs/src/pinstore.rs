//! Reference-counted pin registry.
//!
//! [`PinStore`] records which API instances want a Cid kept in the hot
//! layer. A pin is either a *stage-pin*, a soft pin that garbage
//! collection may reclaim, or a *full-pin* that must survive it.
//!
//! Every record lives under `/pins/<cid>` as JSON and is mirrored in
//! memory. All operations run under a single store-wide lock that is held
//! across the durable write, and the mirror is only touched once the
//! durable write succeeded. A failed operation therefore leaves both the
//! mirror and the datastore as they were.

use std::collections::HashMap;
use std::sync::Arc;

use ffs_core::datastore::{Datastore, DatastoreError};
use ffs_core::{ApiId, Cid, Key};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const PIN_BASE: &str = "/pins";

/// A pin of a Cid held by one API instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Pin {
    #[serde(rename = "APIID")]
    pub api_id: ApiId,
    /// Stage-pins may be reclaimed by garbage collection.
    pub staged: bool,
    /// Unix seconds of the last pin or refresh.
    pub created_at: i64,
}

/// All pins held on a Cid. Holds at most one pin per API instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PinnedCid {
    pub cid: Cid,
    pub pins: Vec<Pin>,
}

impl PinnedCid {
    fn new(cid: Cid) -> Self {
        Self {
            cid,
            pins: Vec::new(),
        }
    }

    fn pin_mut(&mut self, api_id: &ApiId) -> Option<&mut Pin> {
        self.pins.iter_mut().find(|p| p.api_id == *api_id)
    }

    pub fn all_staged(&self) -> bool {
        self.pins.iter().all(|p| p.staged)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PinStoreError {
    #[error("{0} isn't pinned")]
    NotPinned(Cid),
    #[error("all pins of {0} should be stage type")]
    NotAllStaged(Cid),
    #[error("{op}: {source}")]
    Datastore {
        op: &'static str,
        #[source]
        source: DatastoreError,
    },
    #[error("encoding pinned cid: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("decoding {key}: {source}")]
    Decode {
        key: Key,
        #[source]
        source: serde_json::Error,
    },
}

impl PinStoreError {
    fn datastore(op: &'static str) -> impl FnOnce(DatastoreError) -> Self {
        move |source| Self::Datastore { op, source }
    }

    /// True for an unknown Cid, whether reported by the store or by the
    /// underlying datastore.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotPinned(_) => true,
            Self::Datastore { source, .. } => source.is_not_found(),
            _ => false,
        }
    }
}

pub type Result<T, E = PinStoreError> = std::result::Result<T, E>;

/// Pinset shared by every API instance of a node.
#[derive(Debug)]
pub struct PinStore {
    ds: Arc<dyn Datastore>,
    cache: Mutex<HashMap<Cid, PinnedCid>>,
}

impl PinStore {
    /// Loads every persisted record into memory.
    ///
    /// A record that fails to decode aborts the load.
    pub async fn open(ds: Arc<dyn Datastore>) -> Result<Self> {
        let cache = populate_cache(ds.as_ref()).await?;
        info!(cids = cache.len(), "loaded pinstore");
        Ok(Self {
            ds,
            cache: Mutex::new(cache),
        })
    }

    /// Stage-pins `cid` for `api_id`.
    ///
    /// An existing stage-pin gets its timestamp refreshed. An existing
    /// full-pin is kept as is, since the Cid is no longer collectable.
    pub async fn add_staged(&self, api_id: &ApiId, cid: &Cid) -> Result<()> {
        let mut cache = self.cache.lock().await;
        let mut record = cache
            .get(cid)
            .cloned()
            .unwrap_or_else(|| PinnedCid::new(cid.clone()));

        let now = now();
        match record.pin_mut(api_id) {
            Some(pin) if !pin.staged => {
                debug!(%api_id, %cid, "already fully pinned, keeping full pin");
                return Ok(());
            }
            Some(pin) => pin.created_at = pin.created_at.max(now),
            None => record.pins.push(Pin {
                api_id: api_id.clone(),
                staged: true,
                created_at: now,
            }),
        }

        self.persist(&mut cache, record).await
    }

    /// Fully pins `cid` for `api_id`, upgrading a stage-pin if present.
    pub async fn add(&self, api_id: &ApiId, cid: &Cid) -> Result<()> {
        let mut cache = self.cache.lock().await;
        let mut record = cache
            .get(cid)
            .cloned()
            .unwrap_or_else(|| PinnedCid::new(cid.clone()));

        let now = now();
        match record.pin_mut(api_id) {
            Some(pin) => {
                if !pin.staged {
                    warn!(%api_id, %cid, "re-pinning already pinned cid");
                }
                pin.staged = false;
                pin.created_at = pin.created_at.max(now);
            }
            None => record.pins.push(Pin {
                api_id: api_id.clone(),
                staged: false,
                created_at: now,
            }),
        }

        self.persist(&mut cache, record).await
    }

    /// Drops the pin `api_id` holds on `cid`, whatever its type.
    ///
    /// Removing a pin that doesn't exist is a no-op.
    pub async fn remove(&self, api_id: &ApiId, cid: &Cid) -> Result<()> {
        let mut cache = self.cache.lock().await;
        let Some(record) = cache.get(cid) else {
            warn!(%api_id, %cid, "removing globally unpinned cid");
            return Ok(());
        };
        let Some(idx) = record.pins.iter().position(|p| p.api_id == *api_id) else {
            warn!(%api_id, %cid, "removing unpinned cid");
            return Ok(());
        };

        let mut record = record.clone();
        record.pins.swap_remove(idx);
        self.persist(&mut cache, record).await
    }

    /// Deletes `cid` if every pin on it is a stage-pin.
    ///
    /// This is the only removal garbage collection should use.
    pub async fn remove_staged(&self, cid: &Cid) -> Result<()> {
        let mut cache = self.cache.lock().await;
        let record = cache
            .get(cid)
            .ok_or_else(|| PinStoreError::NotPinned(cid.clone()))?;
        if !record.all_staged() {
            return Err(PinStoreError::NotAllStaged(cid.clone()));
        }

        self.ds
            .delete(&make_key(cid))
            .await
            .map_err(PinStoreError::datastore("deleting from datastore"))?;
        cache.remove(cid);
        Ok(())
    }

    /// Returns `(total, staged)` pin counts; `total >= staged`.
    pub async fn ref_count(&self, cid: &Cid) -> (usize, usize) {
        let cache = self.cache.lock().await;
        match cache.get(cid) {
            Some(record) => (
                record.pins.len(),
                record.pins.iter().filter(|p| p.staged).count(),
            ),
            None => (0, 0),
        }
    }

    /// True if `api_id` holds any kind of pin on `cid`.
    pub async fn is_pinned_by(&self, api_id: &ApiId, cid: &Cid) -> bool {
        let cache = self.cache.lock().await;
        cache
            .get(cid)
            .is_some_and(|r| r.pins.iter().any(|p| p.api_id == *api_id))
    }

    /// True if at least one API instance pins `cid`.
    pub async fn is_pinned(&self, cid: &Cid) -> bool {
        self.cache.lock().await.contains_key(cid)
    }

    /// Snapshot of every record, in no particular order.
    pub async fn get_all(&self) -> Vec<PinnedCid> {
        self.cache.lock().await.values().cloned().collect()
    }

    /// Snapshot of the records whose pins are all stage-pins.
    pub async fn get_all_only_staged(&self) -> Vec<PinnedCid> {
        self.cache
            .lock()
            .await
            .values()
            .filter(|r| r.all_staged())
            .cloned()
            .collect()
    }

    /// Writes `record` through to the datastore, then to the mirror.
    /// A record without pins is deleted instead.
    async fn persist(&self, cache: &mut HashMap<Cid, PinnedCid>, record: PinnedCid) -> Result<()> {
        let key = make_key(&record.cid);
        if record.pins.is_empty() {
            self.ds
                .delete(&key)
                .await
                .map_err(PinStoreError::datastore("deleting from datastore"))?;
            cache.remove(&record.cid);
            return Ok(());
        }

        let buf = serde_json::to_vec(&record).map_err(PinStoreError::Encode)?;
        self.ds
            .put(&key, buf.into())
            .await
            .map_err(PinStoreError::datastore("putting to datastore"))?;
        cache.insert(record.cid.clone(), record);
        Ok(())
    }
}

fn make_key(cid: &Cid) -> Key {
    Key::new(PIN_BASE).child(cid.to_string())
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

async fn populate_cache(ds: &dyn Datastore) -> Result<HashMap<Cid, PinnedCid>> {
    let mut entries = ds
        .query(&Key::new(PIN_BASE))
        .await
        .map_err(PinStoreError::datastore("querying pins"))?;

    let mut cache = HashMap::new();
    while let Some(entry) = entries
        .try_next()
        .await
        .map_err(PinStoreError::datastore("reading pins query"))?
    {
        let record: PinnedCid =
            serde_json::from_slice(&entry.value).map_err(|source| PinStoreError::Decode {
                key: entry.key.clone(),
                source,
            })?;
        cache.insert(record.cid.clone(), record);
    }
    Ok(cache)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_layout() {
        let cid: Cid = "QmWATWQ7fVPP2EFGu71UkfnqhYXDYH566qy47CnJDgvs8u"
            .parse()
            .unwrap();
        let record = PinnedCid {
            cid: cid.clone(),
            pins: vec![Pin {
                api_id: ApiId::from("ad2ec0ec-6ab5-4d3b-a6df-3b2a2b4fe4ad"),
                staged: true,
                created_at: 1600000000,
            }],
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "Cid": {"/": "QmWATWQ7fVPP2EFGu71UkfnqhYXDYH566qy47CnJDgvs8u"},
                "Pins": [{
                    "APIID": "ad2ec0ec-6ab5-4d3b-a6df-3b2a2b4fe4ad",
                    "Staged": true,
                    "CreatedAt": 1600000000
                }]
            })
        );
        let back: PinnedCid = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);

        assert_eq!(
            make_key(&cid).as_str(),
            "/pins/QmWATWQ7fVPP2EFGu71UkfnqhYXDYH566qy47CnJDgvs8u"
        );
    }

    #[test]
    fn not_found_kind() {
        let cid = Cid::raw_blake3(b"x");
        assert!(PinStoreError::NotPinned(cid.clone()).is_not_found());
        assert!(!PinStoreError::NotAllStaged(cid).is_not_found());
        let err = PinStoreError::datastore("reading")(DatastoreError::NotFound);
        assert!(err.is_not_found());
    }
}

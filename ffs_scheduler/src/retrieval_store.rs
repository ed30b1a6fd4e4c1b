use std::sync::Arc;

use chrono::{DateTime, Utc};
use ffs_core::datastore::{Datastore, DatastoreError};
use ffs_core::{Cid, Key, RetrievalId};
use serde::{Deserialize, Serialize};

/// Outcome of an executed retrieval from the cold layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RetrievalInfo {
    #[serde(rename = "ID")]
    pub id: RetrievalId,
    pub data_cid: Cid,
    /// attoFIL paid to the miner.
    pub total_paid: u64,
    pub miner_addr: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(thiserror::Error, Debug)]
pub enum RetrievalStoreError {
    #[error("retrieval id can't be empty")]
    InvalidArgument,
    #[error("retrieval info not found")]
    NotFound,
    #[error("{op}: {source}")]
    Datastore {
        op: &'static str,
        #[source]
        source: DatastoreError,
    },
    #[error("marshaling retrieval info: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("unmarshaling retrieval info: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Retrieval outcomes keyed by `/<retrieval-id>`.
#[derive(Debug, Clone)]
pub struct RetrievalInfoStore {
    ds: Arc<dyn Datastore>,
}

impl RetrievalInfoStore {
    pub fn new(ds: Arc<dyn Datastore>) -> Self {
        Self { ds }
    }

    pub async fn get(&self, id: &RetrievalId) -> Result<RetrievalInfo, RetrievalStoreError> {
        let buf = match self.ds.get(&make_key(id)).await {
            Ok(buf) => buf,
            Err(DatastoreError::NotFound) => return Err(RetrievalStoreError::NotFound),
            Err(source) => {
                return Err(RetrievalStoreError::Datastore {
                    op: "getting retrieval info from datastore",
                    source,
                });
            }
        };
        serde_json::from_slice(&buf).map_err(RetrievalStoreError::Decode)
    }

    pub async fn put(&self, info: &RetrievalInfo) -> Result<(), RetrievalStoreError> {
        if info.id.is_empty() {
            return Err(RetrievalStoreError::InvalidArgument);
        }
        let buf = serde_json::to_vec(info).map_err(RetrievalStoreError::Encode)?;
        self.ds
            .put(&make_key(&info.id), buf.into())
            .await
            .map_err(|source| RetrievalStoreError::Datastore {
                op: "putting retrieval info in datastore",
                source,
            })
    }
}

fn make_key(id: &RetrievalId) -> Key {
    Key::root().child(id.as_str())
}

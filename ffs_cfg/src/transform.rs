use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Context;
use ffs_core::datastore::{Datastore, DatastoreError, Entry};
use ffs_core::{Key, Limiter, LimiterError, StorageConfig};
use futures::TryStreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Maximum number of records transformed concurrently.
pub const DEFAULT_CONCURRENCY: usize = 1000;

/// Root of the per-instance stores of the API manager.
pub const API_PREFIX: &str = "/ffs/manager/api";

/// Edits a storage config in place.
///
/// Returns `true` if the config changed. A transform that returns `false`
/// must leave the config untouched. Transforms run concurrently on many
/// records and must be deterministic.
pub type Transform = Arc<dyn Fn(&mut StorageConfig) -> anyhow::Result<bool> + Send + Sync>;

#[derive(thiserror::Error, Debug)]
pub enum TransformError {
    #[error("running query: {0}")]
    Query(#[source] DatastoreError),
    #[error("creating rate limiter: {0}")]
    Limiter(#[from] LimiterError),
    #[error("finished with {} errors", .0.len())]
    Tasks(Vec<String>),
    #[error("cancelled after modifying {modified} storage configs")]
    Cancelled { modified: usize },
}

/// Raises `Hot.Ipfs.AddTimeout` to at least `min` seconds.
pub fn bump_add_timeout(min: i64) -> Transform {
    Arc::new(move |cfg: &mut StorageConfig| -> anyhow::Result<bool> {
        if cfg.hot.ipfs.add_timeout >= min {
            return Ok(false);
        }
        cfg.hot.ipfs.add_timeout = min;
        Ok(true)
    })
}

/// Replaces an unlimited (zero) `Cold.Filecoin.MaxPrice` with `max`.
pub fn clamp_unlimited_price(max: u64) -> Transform {
    Arc::new(move |cfg: &mut StorageConfig| -> anyhow::Result<bool> {
        if cfg.cold.filecoin.max_price > 0 {
            return Ok(false);
        }
        cfg.cold.filecoin.max_price = max;
        Ok(true)
    })
}

/// Runs [`apply_transform_with`] at [`DEFAULT_CONCURRENCY`].
pub async fn apply_transform(
    ds: Arc<dyn Datastore>,
    dry_run: bool,
    transform: Transform,
    cancel: CancellationToken,
) -> Result<usize, TransformError> {
    apply_transform_with(ds, dry_run, transform, cancel, DEFAULT_CONCURRENCY).await
}

/// Applies `transform` to every persisted storage config and returns how
/// many it modified.
///
/// Records are transformed on at most `concurrency` tasks. With `dry_run`
/// the modified records are counted but not written back. A failing
/// record doesn't stop the run; its error is logged and the run fails
/// with [`TransformError::Tasks`] once every record was tried.
///
/// Cancelling `cancel` stops scheduling new records. Records already in
/// flight finish, so some of them may have been written.
pub async fn apply_transform_with(
    ds: Arc<dyn Datastore>,
    dry_run: bool,
    transform: Transform,
    cancel: CancellationToken,
    concurrency: usize,
) -> Result<usize, TransformError> {
    let mut limiter = Limiter::new(concurrency)?;
    let mut entries = ds
        .query(&Key::new(API_PREFIX))
        .await
        .map_err(TransformError::Query)?;

    let modified = Arc::new(Mutex::new(0usize));
    let mut interrupted = None;
    let mut scheduled = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                interrupted = Some(Interrupt::Cancelled);
                break;
            }
            next = entries.try_next() => next,
        };
        let entry = match next {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) => {
                interrupted = Some(Interrupt::Query(err));
                break;
            }
        };
        if !is_storage_config_key(&entry.key) {
            continue;
        }

        let task = transform_record(
            ds.clone(),
            entry,
            transform.clone(),
            dry_run,
            modified.clone(),
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                interrupted = Some(Interrupt::Cancelled);
                break;
            }
            _ = limiter.submit(task) => scheduled += 1,
        }
    }

    let errors = limiter.drain().await;
    let modified = *modified.lock().unwrap_or_else(PoisonError::into_inner);
    debug!(scheduled, modified, "transform drained");

    for err in &errors {
        error!("{err}");
    }

    match interrupted {
        Some(Interrupt::Cancelled) => {
            info!(modified, "transform cancelled");
            Err(TransformError::Cancelled { modified })
        }
        Some(Interrupt::Query(err)) => Err(TransformError::Query(err)),
        None if !errors.is_empty() => Err(TransformError::Tasks(errors)),
        None => Ok(modified),
    }
}

enum Interrupt {
    Cancelled,
    Query(DatastoreError),
}

/// Matches `/ffs/manager/api/<instance>/istore/cidstorageconfig/<cid>`.
fn is_storage_config_key(key: &Key) -> bool {
    let parts = key.namespaces();
    parts.len() >= 6 && parts[4] == "istore" && parts[5] == "cidstorageconfig"
}

async fn transform_record(
    ds: Arc<dyn Datastore>,
    entry: Entry,
    transform: Transform,
    dry_run: bool,
    modified: Arc<Mutex<usize>>,
) -> anyhow::Result<()> {
    let mut cfg: StorageConfig = serde_json::from_slice(&entry.value)
        .with_context(|| format!("unmarshaling storage config {}", entry.key))?;

    let changed =
        transform(&mut cfg).with_context(|| format!("applying transform to {}", entry.key))?;
    if !changed {
        return Ok(());
    }

    *modified.lock().unwrap_or_else(PoisonError::into_inner) += 1;
    if dry_run {
        return Ok(());
    }

    let buf = serde_json::to_vec(&cfg).context("marshaling storage config")?;
    ds.put(&entry.key, buf.into())
        .await
        .with_context(|| format!("put in datastore {}", entry.key))?;
    Ok(())
}

//! Bounded work limiter.
//!
//! Runs at most `limit` tasks concurrently on the tokio runtime and keeps
//! the string form of every task error for a final report.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum LimiterError {
    #[error("limit should be greater than zero, got {0}")]
    InvalidLimit(usize),
}

/// At-most-N concurrent task runner with a drain barrier.
///
/// ```no_run
/// # async fn demo() -> Result<(), ffs_core::LimiterError> {
/// let mut limiter = ffs_core::Limiter::new(8)?;
/// for i in 0..100 {
///     limiter
///         .submit(async move {
///             anyhow::ensure!(i % 10 != 0, "task {i} failed");
///             Ok(())
///         })
///         .await;
/// }
/// let errors = limiter.drain().await;
/// assert_eq!(errors.len(), 10);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Limiter {
    limit: usize,
    permits: Arc<Semaphore>,
    tasks: JoinSet<()>,
    errors: Arc<Mutex<Vec<String>>>,
}

impl Limiter {
    pub fn new(limit: usize) -> Result<Self, LimiterError> {
        if limit == 0 {
            return Err(LimiterError::InvalidLimit(limit));
        }
        Ok(Self {
            limit,
            permits: Arc::new(Semaphore::new(limit)),
            tasks: JoinSet::new(),
            errors: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of tasks currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.limit - self.permits.available_permits()
    }

    /// Waits for a free slot, then spawns `task`.
    ///
    /// If `task` resolves to an error, its string form is recorded and
    /// returned later by [`Limiter::drain`].
    pub async fn submit<F>(&mut self, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(err) => {
                self.record(format!("acquiring limiter slot: {err}"));
                return;
            }
        };

        // Reap finished tasks so the join set doesn't grow with the input.
        while let Some(res) = self.tasks.try_join_next() {
            self.record_join(res);
        }

        let errors = self.errors.clone();
        self.tasks.spawn(async move {
            let _permit = permit;
            if let Err(err) = task.await {
                errors
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(format!("{err:#}"));
            }
        });
    }

    /// Waits until every submitted task finished and returns the
    /// collected errors.
    pub async fn drain(mut self) -> Vec<String> {
        while let Some(res) = self.tasks.join_next().await {
            self.record_join(res);
        }
        std::mem::take(&mut *self.errors.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn record_join(&self, res: Result<(), JoinError>) {
        if let Err(err) = res {
            self.record(format!("task failed to complete: {err}"));
        }
    }

    fn record(&self, msg: String) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(msg);
    }
}

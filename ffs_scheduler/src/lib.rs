//! Scheduler-side stores.
//!
//! - [`TrackStore`] indexes the Cids whose storage config asks for
//!   automatic repair or deal renewal, for the background loops that act
//!   on them.
//! - [`RetrievalInfoStore`] keeps the outcome of executed retrievals.

pub mod retrieval_store;
pub mod trackstore;

pub use retrieval_store::{RetrievalInfo, RetrievalInfoStore, RetrievalStoreError};
pub use trackstore::{TrackStore, TrackStoreError};

//! Hot-layer bookkeeping for FFS.
//!
//! The [`PinStore`] is the source of truth for which API instances want a
//! Cid kept in the hot layer and whether that wish survives garbage
//! collection.

pub mod pinstore;

pub use pinstore::{Pin, PinStore, PinStoreError, PinnedCid};

//! Core FFS types and traits.
//!
//! This crate defines the shared types used by the storage-configuration
//! orchestration crates (`ffs_coreipfs`, `ffs_scheduler`, `ffs_cfg`).
//!
//! ## Persisted types (format-stable)
//!
//! The following types are written to datastores as JSON and must keep
//! their encoding; changing them requires a migration transform:
//!
//! - Content identifiers (`cid::Cid`), encoded as `{"/": "<cid>"}`
//! - Tenant and job identifiers (`ids::ApiId`, `ids::JobId`, ...)
//! - Storage configurations (`config::StorageConfig`), which keep any
//!   fields they don't model through a round trip
//!
//! ## Building blocks (non-persisted)
//!
//! - Datastore abstraction (`Datastore`, `Key`, `NamespacedDatastore`)
//! - Bounded work limiter (`limiter::Limiter`)
//! - Fan-out signaler (`signaler::Signaler`)
//! - Location resolver capability (`location::LocationResolver`)

pub mod cid;
pub mod config;
pub mod datastore;
pub mod ids;
pub mod key;
pub mod limiter;
pub mod location;
pub mod signaler;

// Test utilities (behind feature flag)
#[cfg(feature = "testutil")]
pub mod testutil;

// --- Core Public Surface ---

pub use cid::Cid;
pub use config::StorageConfig;
pub use ids::{ApiId, JobId, RetrievalId, StorageConfigId};

pub use datastore::{
    Datastore, DatastoreError, DatastoreResult, Entry, NamespacedDatastore, QueryStream,
};
pub use key::Key;

pub use limiter::{Limiter, LimiterError};
pub use location::{Location, LocationResolver, ResolveError, StaticLocationResolver};
pub use signaler::{Listener, Signaler};

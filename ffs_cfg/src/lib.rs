//! Offline migrations of persisted storage configs.
//!
//! [`apply_transform`] walks every storage config stored by the API
//! instances of a node, runs a [`Transform`] on it and writes back the
//! records it changed. The `ffscfg` binary wraps it for operators.

pub mod settings;
pub mod transform;

pub use settings::{Backend, FileSettings, SettingsError};
pub use transform::{
    DEFAULT_CONCURRENCY, Transform, TransformError, apply_transform, apply_transform_with,
    bump_add_timeout, clamp_unlimited_price,
};

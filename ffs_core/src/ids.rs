//! Opaque string identifiers.
//!
//! Every identifier is a UUID string in practice, serialized as a plain
//! JSON string. The empty string is reserved as the "undefined" value.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// The reserved empty value.
            pub const EMPTY: Self = Self(String::new());

            /// Generates a new random identifier.
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }
    };
}

string_id!(
    /// Identifier of an API instance (a tenant).
    ApiId
);
string_id!(
    /// Identifier of a scheduler job.
    JobId
);
string_id!(
    /// Identifier of a cold-storage retrieval.
    RetrievalId
);
string_id!(
    /// Identifier of a stored storage configuration.
    StorageConfigId
);

impl ApiId {
    /// Returns true if the id is a well-formed UUID.
    pub fn is_valid(&self) -> bool {
        uuid::Uuid::parse_str(&self.0).is_ok()
    }
}

//! Datastore selection for `ffscfg`.
//!
//! Settings come from command-line flags, `FFSCFG_*` environment variables
//! and an optional TOML file, in that order of precedence. The first two
//! are handled by clap; [`FileSettings`] covers the file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(thiserror::Error, Debug)]
pub enum SettingsError {
    #[error("reading config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("one of mongouri or badgerrepo must be set")]
    NoBackend,
    #[error("mongouri and badgerrepo are mutually exclusive")]
    ConflictingBackends,
    #[error("mongo database name is empty")]
    EmptyMongoDb,
    #[error("mongo collection name is empty")]
    EmptyMongoCollection,
    #[error("unsupported backend: {0}")]
    Unsupported(&'static str),
}

/// Contents of the optional `--config` file. Every field is optional and
/// only fills in what flags and environment left unset.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileSettings {
    pub mongouri: Option<String>,
    pub mongodb: Option<String>,
    pub mongocollection: Option<String>,
    pub badgerrepo: Option<PathBuf>,
    pub dryrun: Option<bool>,
    pub transform: Option<String>,
    pub value: Option<u64>,
}

impl FileSettings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_owned(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_owned(),
            source,
        })
    }
}

/// The datastore a run operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Mongo {
        uri: String,
        database: String,
        collection: String,
    },
    /// Directory holding the local datastore file.
    Local { repo: PathBuf },
}

impl Backend {
    /// Picks the backend from the merged settings. Exactly one of the
    /// Mongo triple or the local repo must be set; empty strings count
    /// as unset.
    pub fn select(
        mongo_uri: Option<&str>,
        mongo_db: Option<&str>,
        mongo_collection: Option<&str>,
        repo: Option<&Path>,
    ) -> Result<Self, SettingsError> {
        let mongo_uri = mongo_uri.filter(|s| !s.is_empty());
        let repo = repo.filter(|p| !p.as_os_str().is_empty());

        match (mongo_uri, repo) {
            (Some(_), Some(_)) => Err(SettingsError::ConflictingBackends),
            (None, None) => Err(SettingsError::NoBackend),
            (None, Some(repo)) => Ok(Backend::Local {
                repo: repo.to_owned(),
            }),
            (Some(uri), None) => {
                let database = mongo_db
                    .filter(|s| !s.is_empty())
                    .ok_or(SettingsError::EmptyMongoDb)?;
                let collection = mongo_collection
                    .filter(|s| !s.is_empty())
                    .ok_or(SettingsError::EmptyMongoCollection)?;
                Ok(Backend::Mongo {
                    uri: uri.to_owned(),
                    database: database.to_owned(),
                    collection: collection.to_owned(),
                })
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Mongo { .. } => "mongo",
            Backend::Local { .. } => "local",
        }
    }
}

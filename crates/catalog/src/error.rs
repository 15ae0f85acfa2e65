//! Error types for catalog I/O.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("serializing {what}: {source}")]
    Serialize {
        what: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("malformed catalog version {0:?}: expected MAJOR.MINOR.PATCH")]
    MalformedVersion(String),

    #[error("catalog version {0} cannot advance: component is at its maximum")]
    VersionOverflow(String),

    #[error("{path} is not a mapping")]
    NotAMapping { path: PathBuf },

    #[error("catalog at {0} is locked by another process")]
    Locked(PathBuf),
}

impl CatalogError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CatalogError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn yaml(path: impl Into<PathBuf>, source: serde_yaml::Error) -> Self {
        CatalogError::Yaml {
            path: path.into(),
            source,
        }
    }
}

use std::path::PathBuf;
use thiserror::Error;

use crate::downloader::ExitReason;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path:?} is not valid json: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum Error {
    /// The external tool could not be started at all
    #[error("could not start {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("external tool failed: {0}")]
    ToolExit(ExitReason),
    #[error("metadata fetch failed: {0}")]
    MetadataFetch(String),
    #[error("could not parse metadata: {0}")]
    MetadataParse(#[source] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("orchestrator is not running")]
    Closed,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("namespace {project}/{database} not found in tracking store")]
    NamespaceNotFound { project: String, database: String },

    #[error("version {version} is already recorded for {project}/{database}")]
    DuplicateVersion {
        project: String,
        database: String,
        version: String,
    },

    #[error("no tracking record for {project}/{database} version {version}")]
    RecordNotFound {
        project: String,
        database: String,
        version: String,
    },

    #[error("failed to read script {}: {source}", .path.display())]
    ScriptRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("script for version {version} failed: {reason}")]
    ScriptExec { version: String, reason: String },

    #[error("down script for version {version} is missing: {}", .path.display())]
    MissingDownScript { version: String, path: PathBuf },

    #[error("have {available} of {requested} migrations to revert")]
    InsufficientHistory { available: usize, requested: usize },

    #[error("database error: {0}")]
    Database(String),

    #[error("{project}/{database}: completed {completed} of {total} migrations: {source}")]
    BatchAborted {
        project: String,
        database: String,
        completed: usize,
        total: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// The innermost error, looking through `BatchAborted` wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::BatchAborted { source, .. } => source.root(),
            other => other,
        }
    }
}

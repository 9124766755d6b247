use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PdcError {
    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("{url} returned status {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("PDC catalog request failed: {0}")]
    Catalog(String),

    #[error("PDC catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("no free file name left for {name}")]
    #[diagnostic(help("remove old downloads from the output directory and retry"))]
    CollisionExhausted { name: String },

    #[error("checksum mismatch for {file_id}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        file_id: String,
        expected: String,
        actual: String,
    },

    #[error("csv error: {0}")]
    Csv(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("download task panicked: {0}")]
    TaskPanicked(String),

    #[error("{failed} of {total} downloads failed")]
    #[diagnostic(help("see the warnings above for the individual failures"))]
    BatchFailed { failed: usize, total: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Network,
    Filesystem,
    Integrity,
    Other,
}

impl PdcError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PdcError::Network { .. } | PdcError::HttpStatus { .. } => ErrorKind::Network,
            PdcError::Filesystem(_) | PdcError::CollisionExhausted { .. } => ErrorKind::Filesystem,
            PdcError::IntegrityMismatch { .. } => ErrorKind::Integrity,
            _ => ErrorKind::Other,
        }
    }

    pub fn is_network(&self) -> bool {
        self.kind() == ErrorKind::Network
    }
}

impl From<csv::Error> for PdcError {
    fn from(err: csv::Error) -> Self {
        PdcError::Csv(err.to_string())
    }
}

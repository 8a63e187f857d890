use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("no manifest given (use --manifest or set \"manifest\" in catalog-sync.json)")]
    MissingManifest,

    #[error("failed to read manifest at {0}")]
    ManifestRead(PathBuf),

    #[error("failed to parse manifest JSON: {0}")]
    ManifestParse(String),

    #[error("invalid landing page: {0}")]
    InvalidLandingPage(String),

    #[error("dataset {0} has no distribution download URL")]
    MissingDistribution(String),

    #[error("download request failed: {0}")]
    Http(String),

    #[error("download returned status {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("payload is not valid UTF-8: {0}")]
    Decode(String),

    #[error("csv error: {0}")]
    Csv(String),

    #[error("csv payload has no header row")]
    EmptyCsv,

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read ledger: {0}")]
    LedgerRead(String),

    #[error("dataset not found in ledger: {0}")]
    DatasetNotFound(String),
}

impl SyncError {
    /// Errors that abort the whole run instead of a single record.
    pub fn is_fatal_input(&self) -> bool {
        matches!(
            self,
            SyncError::ConfigRead(_)
                | SyncError::ConfigParse(_)
                | SyncError::MissingManifest
                | SyncError::ManifestRead(_)
                | SyncError::ManifestParse(_)
        )
    }
}

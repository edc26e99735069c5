use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SkyError {
    #[error("target name must have at least 3 characters: {0:?}")]
    InvalidTarget(String),

    #[error("invalid instrument: {0}")]
    InvalidInstrument(String),

    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    #[error("invalid batch limit: {0} (must be at least 1)")]
    InvalidBatchLimit(usize),

    #[error("invalid search extent: {0}")]
    InvalidExtent(String),

    #[error("invalid search shape: {0} (expected r or b)")]
    InvalidSearchShape(String),

    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("missing credentials for {0}")]
    MissingCredentials(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("{archive} request failed: {message}")]
    ArchiveHttp { archive: String, message: String },

    #[error("{archive} returned status {status}: {message}")]
    ArchiveStatus {
        archive: String,
        status: u16,
        message: String,
    },

    #[error("{archive} returned a malformed table: {message}")]
    MalformedTable { archive: String, message: String },

    #[error("{archive} does not support {operation}")]
    Unsupported { archive: String, operation: String },

    #[error("name resolver request failed: {0}")]
    ResolverHttp(String),

    #[error("could not resolve target name: {0}")]
    UnresolvedTarget(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("prompt failed: {0}")]
    Prompt(String),

    #[error("transfer cancelled")]
    Cancelled,
}

impl SkyError {
    /// Configuration errors abort the run before any network call. Everything
    /// else is recovered per instrument or per artifact.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SkyError::InvalidTarget(_)
                | SkyError::InvalidInstrument(_)
                | SkyError::InvalidArchive(_)
                | SkyError::InvalidBatchLimit(_)
                | SkyError::InvalidExtent(_)
                | SkyError::InvalidSearchShape(_)
                | SkyError::InvalidCoordinate(_)
                | SkyError::InvalidSetting(_)
                | SkyError::MissingCredentials(_)
                | SkyError::ConfigRead(_)
                | SkyError::ConfigParse(_)
        )
    }
}

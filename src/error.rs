use thiserror::Error;

/// Error type for the scanning pipeline.
///
/// Only `Provider` and `InvalidInput` are meant to reach the user;
/// `Storage` is swallowed at the pipeline boundary and `Export` stays
/// local to the spreadsheet writer.
#[derive(Error, Debug)]
pub enum ScanError {
    /// The extraction provider is unreachable, returned a non-success
    /// status, or returned a payload that cannot be parsed.
    #[error("{0}")]
    Provider(String),

    /// Rejected before any provider call (empty input, bad arguments).
    #[error("{0}")]
    InvalidInput(String),

    /// Cache/history/usage store failure. Never a correctness
    /// dependency; callers log and continue.
    #[error("storage error: {0}")]
    Storage(String),

    /// Spreadsheet export failure.
    #[error("export failed: {0}")]
    Export(String),
}

impl From<rusqlite::Error> for ScanError {
    fn from(e: rusqlite::Error) -> Self {
        ScanError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(e: serde_json::Error) -> Self {
        ScanError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

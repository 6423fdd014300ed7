use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while fetching or locating stored images.
///
/// Every variant is recovered by the orchestrator: the URL is logged and
/// skipped without consuming run budget.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error {status} fetching {url}")]
    HttpStatus { status: u16, url: String },

    #[error("HTTP error fetching {url} (bytes_so_far={bytes_written}): {source}")]
    Http {
        source: reqwest::Error,
        url: String,
        bytes_written: u64,
    },

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),

    #[error("No stored image for fingerprint {0}")]
    NotFound(String),

    #[error("Image directory {path} is in use by another instance")]
    Locked { path: PathBuf },

    #[error("Invalid fingerprint '{0}': expected 64 hex characters")]
    InvalidFingerprint(String),
}

impl StoreError {
    /// Whether the failure came from the remote side rather than the local disk.
    pub fn is_remote(&self) -> bool {
        matches!(self, StoreError::HttpStatus { .. } | StoreError::Http { .. })
    }
}

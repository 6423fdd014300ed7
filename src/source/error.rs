use thiserror::Error;

/// Failure to list an album. The orchestrator logs it and moves on to the
/// next album.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Failed to fetch album page {url}: {source}")]
    Http {
        url: String,
        source: reqwest::Error,
    },

    #[error("Unexpected HTTP status {status} for album page {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to read album page {url}: {source}")]
    Body {
        url: String,
        source: reqwest::Error,
    },
}

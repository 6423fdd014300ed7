use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a sink while resolving its destination or delivering.
///
/// The orchestrator never aborts on these: a delivery failure leaves the
/// image unmarked for that sink, a resolution failure disables the sink for
/// the rest of the run.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("API error (HTTP {code}): {message}")]
    Api { code: u16, message: String },

    #[error("Authorization failed: {0}")]
    Auth(String),

    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("Invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Failed to build message: {0}")]
    Message(String),

    #[error("Failed to read attachment {path}: {source}")]
    Attachment {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Album {0} no longer exists")]
    AlbumNotFound(String),
}

impl SinkError {
    /// Build an `Api` error from a non-success response, consuming its body.
    pub(crate) async fn from_response(response: reqwest::Response) -> Self {
        let code = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Self::Api { code, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let e = SinkError::Api {
            code: 403,
            message: "PERMISSION_DENIED".into(),
        };
        assert_eq!(e.to_string(), "API error (HTTP 403): PERMISSION_DENIED");
    }

    #[test]
    fn test_attachment_error_names_path() {
        let e = SinkError::Attachment {
            path: PathBuf::from("/images/abc.jpg"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(e.to_string().contains("/images/abc.jpg"));
    }
}

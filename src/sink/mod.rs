//! Delivery sinks.
//!
//! A sink takes a stored image and a destination and delivers it somewhere.
//! The orchestrator only sees the [`Sink`] trait and never switches on the
//! concrete type.

pub mod email;
pub mod error;
pub mod photos;
pub mod photos_auth;

use std::fmt;

use async_trait::async_trait;

use crate::store::StoredImage;

pub use email::{EmailSettings, EmailSink};
pub use error::SinkError;
pub use photos::{CloudAlbumSink, PhotosSettings};

/// Sink-specific target locator, such as an album ID or an email address.
///
/// The empty destination is a valid value meaning "deliver to the sink's
/// default location". It is distinct from "not yet resolved", which callers
/// represent as `Option<Destination>::None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Destination(String);

impl Destination {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The default-location destination.
    pub fn default_location() -> Self {
        Self(String::new())
    }

    pub fn is_default(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            f.write_str("<default>")
        } else {
            f.write_str(&self.0)
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sink: Send + Sync {
    /// Stable name, used as the ledger partition key. Must not change
    /// between runs or deliveries will be repeated.
    fn name(&self) -> &str;

    /// Resolve where deliveries go. Safe to call repeatedly; implementations
    /// may cache the result across runs.
    async fn resolve_destination(&self) -> Result<Destination, SinkError>;

    /// Deliver one stored image to `destination`.
    async fn deliver(&self, image: &StoredImage, destination: &Destination)
        -> Result<(), SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_destination_is_default() {
        assert!(Destination::default_location().is_default());
        assert!(Destination::default().is_default());
        assert!(Destination::new("").is_default());
        assert!(!Destination::new("album-1").is_default());
    }

    #[test]
    fn test_resolved_empty_differs_from_unresolved() {
        let unresolved: Option<Destination> = None;
        let resolved = Some(Destination::default_location());
        assert_ne!(unresolved, resolved);
    }

    #[test]
    fn test_display() {
        assert_eq!(Destination::new("AF1Qip").to_string(), "AF1Qip");
        assert_eq!(Destination::default_location().to_string(), "<default>");
    }
}

//! Album sources: where image URLs come from.

pub mod error;
pub mod scraper;

use async_trait::async_trait;

pub use error::ScrapeError;
pub use scraper::AlbumScraper;

/// Produces the image URLs currently in one album.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlbumSource: Send + Sync {
    /// Identifies the album in logs.
    fn label(&self) -> &str;

    /// Image URLs in album order, without duplicates.
    async fn image_urls(&self) -> Result<Vec<String>, ScrapeError>;
}

//! Shared-album page scraper.
//!
//! Public shared albums embed their image URLs in several places: CDN links
//! in the markup, `"url"` fields in inline JSON, lazy-load `data-*`
//! attributes and plain `<img src>`. All four are collected in that order,
//! reduced to absolute http(s) URLs, and de-duplicated keeping the first
//! occurrence.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::Client;

use super::{AlbumSource, ScrapeError};

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

static CDN_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https://[^"'\s]+icloud-content\.com[^"'\s]+"#).expect("valid CDN regex")
});
static JSON_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""url":\s*"([^"]+)""#).expect("valid JSON url regex"));
static DATA_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-(?:src|url)="([^"]+)""#).expect("valid data-attr regex"));
static IMG_SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<img[^>]+src="([^"]+)""#).expect("valid img regex"));

/// Build the HTTP client used for album pages: browser-like headers and a
/// bounded timeout.
pub fn scraper_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));

    Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
}

/// Pull candidate image URLs out of an album page.
pub fn extract_image_urls(html: &str) -> Vec<String> {
    let cdn = CDN_URL.find_iter(html).map(|m| m.as_str());
    let captured = |re: &'static Regex| {
        re.captures_iter(html)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .filter(|url| url.contains("http"))
    };

    let mut seen = HashSet::new();
    cdn.chain(captured(&JSON_URL))
        .chain(captured(&DATA_ATTR))
        .chain(captured(&IMG_SRC))
        .map(str::trim)
        .filter(|url| url.starts_with("http://") || url.starts_with("https://"))
        .filter(|url| seen.insert(*url))
        .map(str::to_string)
        .collect()
}

/// [`AlbumSource`] backed by a public shared-album web page.
pub struct AlbumScraper {
    album_url: String,
    client: Client,
}

impl AlbumScraper {
    pub fn new(album_url: impl Into<String>, client: Client) -> Self {
        Self {
            album_url: album_url.into(),
            client,
        }
    }
}

#[async_trait]
impl AlbumSource for AlbumScraper {
    fn label(&self) -> &str {
        &self.album_url
    }

    async fn image_urls(&self) -> Result<Vec<String>, ScrapeError> {
        let response = self
            .client
            .get(&self.album_url)
            .send()
            .await
            .map_err(|e| ScrapeError::Http {
                url: self.album_url.clone(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(ScrapeError::HttpStatus {
                status: response.status().as_u16(),
                url: self.album_url.clone(),
            });
        }

        let html = response.text().await.map_err(|e| ScrapeError::Body {
            url: self.album_url.clone(),
            source: e,
        })?;

        let urls = extract_image_urls(&html);
        tracing::debug!(album = %self.album_url, count = urls.len(), "Scraped album page");
        Ok(urls)
    }
}

//! Cloud photo-library delivery via the Google Photos Library API.
//!
//! Access tokens come from an OAuth2 refresh-token grant and are cached until
//! shortly before they expire. The target album is found among albums this
//! app created, or created if missing. The resolved album ID is cached on the
//! sink instance, so later runs skip the lookup.
//!
//! A delivery is a raw upload followed by one `mediaItems:batchCreate` call
//! that carries the album ID. The library item and its album placement are
//! created together or not at all.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use super::{Destination, Sink, SinkError};
use crate::store::StoredImage;

pub(crate) const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const API_BASE: &str = "https://photoslibrary.googleapis.com/v1";

/// Refresh this long before the server-reported expiry.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// OAuth client and album configuration.
#[derive(Clone)]
pub struct PhotosSettings {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// Empty means upload to the library without adding to an album.
    pub album_name: String,
}

impl std::fmt::Debug for PhotosSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotosSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("album_name", &self.album_name)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Album {
    id: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlbumList {
    #[serde(default)]
    albums: Vec<Album>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewMediaItem<'a> {
    simple_media_item: SimpleMediaItem<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimpleMediaItem<'a> {
    upload_token: &'a str,
    file_name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchCreateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    album_id: Option<&'a str>,
    new_media_items: Vec<NewMediaItem<'a>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchCreateResponse {
    #[serde(default)]
    new_media_item_results: Vec<MediaItemResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaItemResult {
    #[serde(default)]
    media_item: Option<MediaItem>,
    #[serde(default)]
    status: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
struct MediaItem {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

impl CachedToken {
    fn from_response(response: TokenResponse, now: Instant) -> Self {
        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(3600));
        Self {
            value: response.access_token,
            refresh_at: now + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN),
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        now < self.refresh_at
    }
}

fn find_album<'a>(page: &'a AlbumList, name: &str) -> Option<&'a Album> {
    page.albums.iter().find(|album| album.title == name)
}

/// Extract the created media item ID from a `batchCreate` response.
fn created_item_id(response: BatchCreateResponse) -> Result<String, SinkError> {
    let result = response
        .new_media_item_results
        .into_iter()
        .next()
        .ok_or_else(|| SinkError::Api {
            code: 200,
            message: "no media items created".into(),
        })?;

    if let Some(status) = result.status.as_ref().filter(|s| s.code != 0) {
        return Err(SinkError::Api {
            code: 200,
            message: format!("media item creation failed: {}", status.message),
        });
    }

    result
        .media_item
        .map(|item| item.id)
        .ok_or_else(|| SinkError::Api {
            code: 200,
            message: "media item missing from response".into(),
        })
}

pub struct CloudAlbumSink {
    client: reqwest::Client,
    settings: PhotosSettings,
    token_url: String,
    api_base: String,
    token: Mutex<Option<CachedToken>>,
    /// Resolved destination, kept for the life of the sink. `None` means not
    /// yet resolved.
    album: RwLock<Option<Destination>>,
}

impl CloudAlbumSink {
    pub const NAME: &'static str = "photos";

    pub fn new(settings: PhotosSettings, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            settings,
            token_url: TOKEN_URL.to_string(),
            api_base: API_BASE.to_string(),
            token: Mutex::new(None),
            album: RwLock::new(None),
        })
    }

    /// Point the sink at a local stand-in for the OAuth and Library APIs.
    #[cfg(test)]
    fn with_endpoints(settings: PhotosSettings, base: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .no_proxy()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap(),
            settings,
            token_url: format!("{}/token", base),
            api_base: format!("{}/v1", base),
            token: Mutex::new(None),
            album: RwLock::new(None),
        }
    }

    async fn access_token(&self) -> Result<String, SinkError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Instant::now())) {
            return Ok(token.value.clone());
        }

        tracing::debug!("Refreshing Google Photos access token");
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.settings.client_id.as_str()),
                ("client_secret", self.settings.client_secret.as_str()),
                ("refresh_token", self.settings.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            *cached = None;
            return Err(SinkError::Auth(format!(
                "token refresh failed (HTTP {}): {}",
                status.as_u16(),
                text
            )));
        }

        let body: TokenResponse = response.json().await?;
        let token = CachedToken::from_response(body, Instant::now());
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// Page through app-created albums looking for `name`.
    async fn find_album_id(&self, name: &str) -> Result<Option<String>, SinkError> {
        let token = self.access_token().await?;
        let url = format!("{}/albums", self.api_base);
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .get(&url)
                .bearer_auth(&token)
                .query(&[("excludeNonAppCreatedData", "true")]);
            if let Some(page) = &page_token {
                request = request.query(&[("pageToken", page.as_str())]);
            }

            let response = request.send().await?;
            if !response.status().is_success() {
                return Err(SinkError::from_response(response).await);
            }
            let page: AlbumList = response.json().await?;

            if let Some(album) = find_album(&page, name) {
                return Ok(Some(album.id.clone()));
            }
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => return Ok(None),
            }
        }
    }

    async fn create_album(&self, name: &str) -> Result<String, SinkError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .post(format!("{}/albums", self.api_base))
            .bearer_auth(&token)
            .json(&serde_json::json!({ "album": { "title": name } }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SinkError::from_response(response).await);
        }
        let album: Album = response.json().await?;
        Ok(album.id)
    }

    async fn upload_bytes(&self, token: &str, image: &StoredImage) -> Result<String, SinkError> {
        let bytes = tokio::fs::read(&image.path)
            .await
            .map_err(|e| SinkError::Attachment {
                path: image.path.clone(),
                source: e,
            })?;

        let response = self
            .client
            .post(format!("{}/uploads", self.api_base))
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header("X-Goog-Upload-Content-Type", image.format.mime_type())
            .header("X-Goog-Upload-Protocol", "raw")
            .header("X-Goog-Upload-File-Name", image.file_name())
            .body(bytes)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SinkError::from_response(response).await);
        }
        Ok(response.text().await?)
    }

    /// Turn an upload token into a library item, placed in `album` unless it
    /// is the default location.
    async fn create_media_item(
        &self,
        token: &str,
        upload_token: &str,
        file_name: &str,
        album: &Destination,
    ) -> Result<String, SinkError> {
        let request = BatchCreateRequest {
            album_id: (!album.is_default()).then_some(album.as_str()),
            new_media_items: vec![NewMediaItem {
                simple_media_item: SimpleMediaItem {
                    upload_token,
                    file_name,
                },
            }],
        };
        let response = self
            .client
            .post(format!("{}/mediaItems:batchCreate", self.api_base))
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND && !album.is_default() {
            // Album deleted since it was resolved; look it up again next run.
            self.album.write().await.take();
            return Err(SinkError::AlbumNotFound(album.to_string()));
        }
        if !response.status().is_success() {
            return Err(SinkError::from_response(response).await);
        }
        created_item_id(response.json().await?)
    }
}

#[async_trait]
impl Sink for CloudAlbumSink {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn resolve_destination(&self) -> Result<Destination, SinkError> {
        if self.settings.album_name.is_empty() {
            return Ok(Destination::default_location());
        }
        if let Some(cached) = self.album.read().await.as_ref() {
            return Ok(cached.clone());
        }

        let name = self.settings.album_name.as_str();
        let id = match self.find_album_id(name).await? {
            Some(id) => id,
            None => {
                tracing::info!("Album '{}' not found, creating it", name);
                self.create_album(name).await?
            }
        };

        let destination = Destination::new(id);
        *self.album.write().await = Some(destination.clone());
        Ok(destination)
    }

    async fn deliver(&self, image: &StoredImage, destination: &Destination) -> Result<(), SinkError> {
        let token = self.access_token().await?;
        let upload_token = self.upload_bytes(&token, image).await?;
        let item_id = self
            .create_media_item(&token, &upload_token, &image.file_name(), destination)
            .await?;
        tracing::debug!(media_item = %item_id, destination = %destination, "Created media item");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Fingerprint, ImageFormat};
    use crate::test_http::{Request, Response, TestServer};

    fn settings(album_name: &str) -> PhotosSettings {
        PhotosSettings {
            client_id: "id".into(),
            client_secret: "secret".into(),
            refresh_token: "refresh".into(),
            album_name: album_name.into(),
        }
    }

    #[tokio::test]
    async fn test_empty_album_name_resolves_to_default_without_network() {
        let sink = CloudAlbumSink::new(settings(""), Duration::from_secs(1)).unwrap();
        let dest = sink.resolve_destination().await.unwrap();
        assert!(dest.is_default());
        // Still uncached: nothing was looked up.
        assert!(sink.album.read().await.is_none());
    }

    #[tokio::test]
    async fn test_cached_album_is_reused() {
        let sink = CloudAlbumSink::new(settings("Family"), Duration::from_secs(1)).unwrap();
        *sink.album.write().await = Some(Destination::new("AF1Qip-cached"));
        let dest = sink.resolve_destination().await.unwrap();
        assert_eq!(dest.as_str(), "AF1Qip-cached");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let debug = format!("{:?}", settings("Family"));
        assert!(!debug.contains("secret\""));
        assert!(!debug.contains("refresh\""));
        assert!(debug.contains("Family"));
    }

    #[test]
    fn test_album_list_parsing_and_lookup() {
        let json = r#"{
            "albums": [
                {"id": "a1", "title": "Holidays", "mediaItemsCount": "3"},
                {"id": "a2", "title": "Family"}
            ],
            "nextPageToken": "CkQ"
        }"#;
        let page: AlbumList = serde_json::from_str(json).unwrap();
        assert_eq!(find_album(&page, "Family").map(|a| a.id.as_str()), Some("a2"));
        assert!(find_album(&page, "family").is_none());
        assert_eq!(page.next_page_token.as_deref(), Some("CkQ"));
    }

    #[test]
    fn test_empty_album_list_parses() {
        let page: AlbumList = serde_json::from_str("{}").unwrap();
        assert!(page.albums.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn test_created_item_id_success() {
        let json = r#"{"newMediaItemResults": [
            {"uploadToken": "t", "status": {"message": "Success"}, "mediaItem": {"id": "m1"}}
        ]}"#;
        let response: BatchCreateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(created_item_id(response).unwrap(), "m1");
    }

    #[test]
    fn test_created_item_id_reports_item_status() {
        let json = r#"{"newMediaItemResults": [
            {"status": {"code": 3, "message": "Failed: invalid upload token"}}
        ]}"#;
        let response: BatchCreateResponse = serde_json::from_str(json).unwrap();
        let err = created_item_id(response).unwrap_err();
        assert!(err.to_string().contains("invalid upload token"));
    }

    #[test]
    fn test_created_item_id_empty_results() {
        let response: BatchCreateResponse = serde_json::from_str("{}").unwrap();
        assert!(created_item_id(response).is_err());
    }

    #[test]
    fn test_batch_create_request_shape() {
        let request = BatchCreateRequest {
            album_id: None,
            new_media_items: vec![NewMediaItem {
                simple_media_item: SimpleMediaItem {
                    upload_token: "tok",
                    file_name: "abc.jpg",
                },
            }],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "newMediaItems": [
                    {"simpleMediaItem": {"uploadToken": "tok", "fileName": "abc.jpg"}}
                ]
            })
        );
    }

    #[test]
    fn test_token_refreshes_before_expiry() {
        let now = Instant::now();
        let token = CachedToken::from_response(
            TokenResponse {
                access_token: "ya29".into(),
                expires_in: Some(3599),
            },
            now,
        );
        assert!(token.is_fresh(now));
        assert!(token.is_fresh(now + Duration::from_secs(3000)));
        assert!(!token.is_fresh(now + Duration::from_secs(3540)));
    }

    #[test]
    fn test_short_lived_token_is_never_fresh() {
        let now = Instant::now();
        let token = CachedToken::from_response(
            TokenResponse {
                access_token: "ya29".into(),
                expires_in: Some(30),
            },
            now,
        );
        assert!(!token.is_fresh(now));
    }

    #[test]
    fn test_batch_create_request_carries_album_id() {
        let request = BatchCreateRequest {
            album_id: Some("album-1"),
            new_media_items: vec![NewMediaItem {
                simple_media_item: SimpleMediaItem {
                    upload_token: "tok",
                    file_name: "abc.jpg",
                },
            }],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["albumId"], "album-1");
        assert_eq!(value["newMediaItems"][0]["simpleMediaItem"]["uploadToken"], "tok");
    }

    fn token_or(request: &Request, otherwise: impl FnOnce() -> Response) -> Response {
        if request.is("POST", "/token") {
            Response::json(200, serde_json::json!({"access_token": "ya29", "expires_in": 3600}))
        } else {
            otherwise()
        }
    }

    fn stored_image(dir: &std::path::Path) -> StoredImage {
        let fingerprint = Fingerprint::of(b"jpeg bytes");
        let path = dir.join(format!("{}.jpg", fingerprint));
        std::fs::write(&path, b"jpeg bytes").unwrap();
        StoredImage {
            fingerprint,
            path,
            format: ImageFormat::Jpg,
        }
    }

    #[tokio::test]
    async fn test_album_found_on_later_page_is_cached() {
        let server = TestServer::start(|r| {
            token_or(r, || {
                if r.is("GET", "/v1/albums") && r.query().contains("pageToken=p2") {
                    Response::json(200, serde_json::json!({
                        "albums": [{"id": "a9", "title": "Family"}]
                    }))
                } else if r.is("GET", "/v1/albums") {
                    Response::json(200, serde_json::json!({
                        "albums": [{"id": "a1", "title": "Holidays"}],
                        "nextPageToken": "p2"
                    }))
                } else {
                    Response::text(500, "unexpected")
                }
            })
        })
        .await;
        let sink = CloudAlbumSink::with_endpoints(settings("Family"), server.base());

        let dest = sink.resolve_destination().await.unwrap();
        assert_eq!(dest.as_str(), "a9");
        assert_eq!(server.count("GET", "/v1/albums"), 2);
        assert_eq!(server.count("POST", "/v1/albums"), 0);
        assert!(server
            .requests()
            .iter()
            .filter(|r| r.is("GET", "/v1/albums"))
            .all(|r| r.query().contains("excludeNonAppCreatedData=true")));

        // Second resolution is served from the cache.
        let again = sink.resolve_destination().await.unwrap();
        assert_eq!(again, dest);
        assert_eq!(server.count("GET", "/v1/albums"), 2);
    }

    #[tokio::test]
    async fn test_missing_album_is_created_and_cached() {
        let server = TestServer::start(|r| {
            token_or(r, || {
                if r.is("GET", "/v1/albums") {
                    Response::json(200, serde_json::json!({}))
                } else if r.is("POST", "/v1/albums") {
                    Response::json(200, serde_json::json!({"id": "new-1", "title": "Family"}))
                } else {
                    Response::text(500, "unexpected")
                }
            })
        })
        .await;
        let sink = CloudAlbumSink::with_endpoints(settings("Family"), server.base());

        let dest = sink.resolve_destination().await.unwrap();
        assert_eq!(dest.as_str(), "new-1");
        let creates: Vec<_> = server
            .requests()
            .into_iter()
            .filter(|r| r.is("POST", "/v1/albums"))
            .collect();
        assert_eq!(creates.len(), 1);
        let body: serde_json::Value = serde_json::from_str(&creates[0].body).unwrap();
        assert_eq!(body["album"]["title"], "Family");
        assert_eq!(sink.album.read().await.as_ref(), Some(&dest));
    }

    #[tokio::test]
    async fn test_lookup_failure_propagates_without_creating() {
        let server = TestServer::start(|r| {
            token_or(r, || {
                if r.is("GET", "/v1/albums") {
                    Response::json(503, serde_json::json!({"error": {"message": "backend"}}))
                } else {
                    Response::json(200, serde_json::json!({"id": "should-not-exist"}))
                }
            })
        })
        .await;
        let sink = CloudAlbumSink::with_endpoints(settings("Family"), server.base());

        let err = sink.resolve_destination().await.unwrap_err();
        assert!(matches!(err, SinkError::Api { code: 503, .. }));
        assert_eq!(server.count("POST", "/v1/albums"), 0);
        assert!(sink.album.read().await.is_none());
    }

    #[tokio::test]
    async fn test_token_refresh_failure_is_auth_error() {
        let server = TestServer::start(|_| Response::text(400, "invalid_grant")).await;
        let sink = CloudAlbumSink::with_endpoints(settings("Family"), server.base());

        let err = sink.resolve_destination().await.unwrap_err();
        assert!(matches!(err, SinkError::Auth(ref m) if m.contains("invalid_grant")));
    }

    #[tokio::test]
    async fn test_deliver_places_item_in_album_with_one_call() {
        let server = TestServer::start(|r| {
            token_or(r, || {
                if r.is("POST", "/v1/uploads") {
                    Response::text(200, "upload-token-1")
                } else if r.is("POST", "/v1/mediaItems:batchCreate") {
                    Response::json(200, serde_json::json!({
                        "newMediaItemResults": [{"status": {"message": "Success"}, "mediaItem": {"id": "m1"}}]
                    }))
                } else {
                    Response::text(500, "unexpected")
                }
            })
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let image = stored_image(dir.path());
        let sink = CloudAlbumSink::with_endpoints(settings("Family"), server.base());

        sink.deliver(&image, &Destination::new("a9")).await.unwrap();

        let requests = server.requests();
        let create = requests
            .iter()
            .find(|r| r.is("POST", "/v1/mediaItems:batchCreate"))
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(&create.body).unwrap();
        assert_eq!(body["albumId"], "a9");
        assert_eq!(body["newMediaItems"][0]["simpleMediaItem"]["uploadToken"], "upload-token-1");
        assert_eq!(
            body["newMediaItems"][0]["simpleMediaItem"]["fileName"],
            image.file_name()
        );
        assert!(requests.iter().all(|r| !r.path().contains("batchAddMediaItems")));
    }

    #[tokio::test]
    async fn test_deliver_to_library_omits_album_id() {
        let server = TestServer::start(|r| {
            token_or(r, || {
                if r.is("POST", "/v1/uploads") {
                    Response::text(200, "upload-token-1")
                } else {
                    Response::json(200, serde_json::json!({
                        "newMediaItemResults": [{"mediaItem": {"id": "m1"}}]
                    }))
                }
            })
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let sink = CloudAlbumSink::with_endpoints(settings(""), server.base());

        sink.deliver(&stored_image(dir.path()), &Destination::default_location())
            .await
            .unwrap();

        let create = server
            .requests()
            .into_iter()
            .find(|r| r.is("POST", "/v1/mediaItems:batchCreate"))
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(&create.body).unwrap();
        assert!(body.get("albumId").is_none());
    }

    #[tokio::test]
    async fn test_deleted_album_clears_cache() {
        let server = TestServer::start(|r| {
            token_or(r, || {
                if r.is("POST", "/v1/uploads") {
                    Response::text(200, "upload-token-1")
                } else {
                    Response::json(404, serde_json::json!({"error": {"status": "NOT_FOUND"}}))
                }
            })
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let sink = CloudAlbumSink::with_endpoints(settings("Family"), server.base());
        *sink.album.write().await = Some(Destination::new("gone"));

        let err = sink
            .deliver(&stored_image(dir.path()), &Destination::new("gone"))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::AlbumNotFound(ref id) if id == "gone"));
        assert!(sink.album.read().await.is_none());
    }
}

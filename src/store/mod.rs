//! Content-addressed image store.
//!
//! Each download is streamed through a SHA-256 hasher into a `.part` file
//! under the store root, then renamed to `{fingerprint}.{ext}`. If an image
//! with the same fingerprint is already stored, the new bytes are discarded
//! and the existing file is returned, so identical content served from
//! different URLs is stored exactly once.

pub mod error;
pub mod fingerprint;
pub mod format;
pub mod verify;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use fs4::fs_std::FileExt;
use futures_util::{Stream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub use error::StoreError;
pub use fingerprint::Fingerprint;
pub use format::ImageFormat;

const LOCK_FILE: &str = ".album-fanout.lock";
const PART_PREFIX: &str = "download-";
const PART_SUFFIX: &str = ".part";

/// An image persisted in the store. Created once per fingerprint and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub fingerprint: Fingerprint,
    pub path: PathBuf,
    pub format: ImageFormat,
}

impl StoredImage {
    /// The on-disk file name, `{fingerprint}.{ext}`.
    pub fn file_name(&self) -> String {
        file_name_for(&self.fingerprint, self.format)
    }
}

/// Turns a remote URL into a locally stored, fingerprinted image.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<StoredImage, StoreError>;
}

fn file_name_for(fingerprint: &Fingerprint, format: ImageFormat) -> String {
    format!("{}.{}", fingerprint.to_hex(), format.extension())
}

/// Filesystem-backed [`ImageStore`].
pub struct ContentStore {
    root: PathBuf,
    client: Client,
    /// Held for the store's lifetime; the advisory lock is released when the
    /// file is dropped.
    _lock_file: std::fs::File,
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl ContentStore {
    /// Open the store at `root`, creating the directory if needed and taking
    /// an exclusive lock so only one daemon writes to it.
    pub async fn open(root: &Path, timeout: Duration) -> Result<Self, StoreError> {
        fs::create_dir_all(root).await?;

        let lock_path = root.join(LOCK_FILE);
        let lock_file = tokio::task::spawn_blocking({
            let lock_path = lock_path.clone();
            move || {
                let file = std::fs::File::create(&lock_path)?;
                file.try_lock_exclusive()
                    .map_err(|_| StoreError::Locked { path: lock_path })?;
                Ok::<std::fs::File, StoreError>(file)
            }
        })
        .await
        .map_err(|e| StoreError::Disk(std::io::Error::other(e)))??;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Http {
                source: e,
                url: String::new(),
                bytes_written: 0,
            })?;

        let store = Self {
            root: root.to_path_buf(),
            client,
            _lock_file: lock_file,
        };
        store.remove_stale_parts().await;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic storage path for a fingerprint and format.
    pub fn path_for(&self, fingerprint: &Fingerprint, format: ImageFormat) -> PathBuf {
        self.root.join(file_name_for(fingerprint, format))
    }

    /// Find a stored image by fingerprint alone, probing the allow-listed
    /// extensions in order.
    pub async fn locate(&self, fingerprint: &Fingerprint) -> Result<StoredImage, StoreError> {
        for format in ImageFormat::ALL {
            let path = self.path_for(fingerprint, format);
            if fs::try_exists(&path).await? {
                return Ok(StoredImage {
                    fingerprint: *fingerprint,
                    path,
                    format,
                });
            }
        }
        Err(StoreError::NotFound(fingerprint.to_hex()))
    }

    /// Stream `chunks` to disk while hashing them, then move the result into
    /// its content-addressed location. The `.part` file never survives a
    /// failed write or a duplicate.
    pub(crate) async fn ingest<S, B>(
        &self,
        url: &str,
        content_type: Option<&str>,
        chunks: S,
    ) -> Result<StoredImage, StoreError>
    where
        S: Stream<Item = Result<B, StoreError>>,
        B: AsRef<[u8]>,
    {
        let format = format::detect_format(url, content_type);
        let part_path = self
            .root
            .join(format!("{}{}{}", PART_PREFIX, Uuid::new_v4(), PART_SUFFIX));

        let fingerprint = match write_and_hash(&part_path, chunks).await {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                let _ = fs::remove_file(&part_path).await;
                return Err(e);
            }
        };

        match self.locate(&fingerprint).await {
            Ok(existing) => {
                tracing::debug!(
                    url = %url,
                    fingerprint = %fingerprint,
                    path = %existing.path.display(),
                    "Already stored, discarding duplicate download"
                );
                let _ = fs::remove_file(&part_path).await;
                return Ok(existing);
            }
            Err(StoreError::NotFound(_)) => {}
            Err(e) => {
                let _ = fs::remove_file(&part_path).await;
                return Err(e);
            }
        }

        let final_path = self.path_for(&fingerprint, format);
        if let Err(e) = fs::rename(&part_path, &final_path).await {
            let _ = fs::remove_file(&part_path).await;
            return Err(e.into());
        }

        tracing::debug!(
            url = %url,
            fingerprint = %fingerprint,
            path = %final_path.display(),
            "Stored new image"
        );
        Ok(StoredImage {
            fingerprint,
            path: final_path,
            format,
        })
    }

    /// Remove `.part` files left behind by a crash mid-download.
    async fn remove_stale_parts(&self) {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Could not scan {} for stale downloads: {}", self.root.display(), e);
                return;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(PART_PREFIX) && name.ends_with(PART_SUFFIX) {
                tracing::debug!("Removing stale partial download {}", name);
                let _ = fs::remove_file(entry.path()).await;
            }
        }
    }
}

#[async_trait]
impl ImageStore for ContentStore {
    async fn fetch(&self, url: &str) -> Result<StoredImage, StoreError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StoreError::Http {
                source: e,
                url: url.to_string(),
                bytes_written: 0,
            })?;

        if !response.status().is_success() {
            return Err(StoreError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let mut bytes_written: u64 = 0;
        let chunks = response.bytes_stream().map(move |chunk| match chunk {
            Ok(bytes) => {
                bytes_written += bytes.len() as u64;
                Ok(bytes)
            }
            Err(e) => Err(StoreError::Http {
                source: e,
                url: url.to_string(),
                bytes_written,
            }),
        });

        self.ingest(url, content_type.as_deref(), chunks).await
    }
}

/// Write every chunk to `path`, feeding the same bytes to the hasher.
async fn write_and_hash<S, B>(path: &Path, chunks: S) -> Result<Fingerprint, StoreError>
where
    S: Stream<Item = Result<B, StoreError>>,
    B: AsRef<[u8]>,
{
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .await?;

    let mut hasher = Sha256::new();
    tokio::pin!(chunks);
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        hasher.update(chunk.as_ref());
        file.write_all(chunk.as_ref()).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    Ok(Fingerprint::from_hasher(hasher))
}

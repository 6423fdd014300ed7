use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::cli::SyncArgs;
use crate::sink::{EmailSettings, PhotosSettings};

/// Contents of the album config file.
#[derive(Debug, Default, Deserialize)]
struct AlbumFile {
    #[serde(default)]
    album_urls: Vec<String>,
}

/// Validated daemon configuration.
pub struct Config {
    pub image_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub album_urls: Vec<String>,
    pub email: EmailSettings,
    /// `None` when the cloud photo library is not configured.
    pub photos: Option<PhotosSettings>,
    pub run_interval: Duration,
    pub download_timeout: Duration,
    pub scrape_timeout: Duration,
    pub max_items: usize,
    pub once: bool,
    pub notify_systemd: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("image_dir", &self.image_dir)
            .field("ledger_path", &self.ledger_path)
            .field("album_urls", &self.album_urls)
            .field("email", &self.email)
            .field("photos", &self.photos)
            .field("run_interval", &self.run_interval)
            .field("max_items", &self.max_items)
            .field("once", &self.once)
            .finish_non_exhaustive()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Ledger location: `--ledger-path` if given, else `ledger.db` in the image
/// directory.
pub fn ledger_path(args: &SyncArgs) -> PathBuf {
    args.ledger_path
        .as_deref()
        .map(expand_tilde)
        .unwrap_or_else(|| expand_tilde(&args.image_dir).join("ledger.db"))
}

fn require(value: Option<String>, name: &str) -> anyhow::Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => bail!("{} is required", name),
    }
}

fn load_album_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read album config {}", path.display()))?;
    let file: AlbumFile = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse album config {}", path.display()))?;
    Ok(file.album_urls)
}

/// Trim, drop blanks, and remove repeats keeping the first occurrence.
fn normalize_album_urls(urls: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

impl Config {
    pub fn from_args(args: SyncArgs) -> anyhow::Result<Self> {
        let image_dir = expand_tilde(&args.image_dir);
        let ledger_path = ledger_path(&args);

        let album_urls = if args.albums.is_empty() {
            let path = args
                .album_config
                .as_deref()
                .map(expand_tilde)
                .unwrap_or_else(|| image_dir.join("config.json"));
            let urls = normalize_album_urls(load_album_file(&path)?);
            if urls.is_empty() {
                bail!("No album URLs found in {}", path.display());
            }
            urls
        } else {
            let urls = normalize_album_urls(args.albums);
            if urls.is_empty() {
                bail!("--album was given but contains no URLs");
            }
            urls
        };

        let smtp_username = require(args.smtp_username, "SMTP_USERNAME")?;
        let email = EmailSettings {
            server: require(args.smtp_server, "SMTP_SERVER")?,
            port: args.smtp_port.context("SMTP_PORT is required")?,
            password: require(args.smtp_password, "SMTP_PASSWORD")?,
            from: args.smtp_from.filter(|f| !f.trim().is_empty()),
            destination: require(args.smtp_destination, "SMTP_DESTINATION")?,
            accept_invalid_certs: args.smtp_accept_invalid_certs,
            timeout: Duration::from_secs(args.download_timeout),
            username: smtp_username,
        };

        let photos = match (
            args.photos_client_id,
            args.photos_client_secret,
            args.photos_refresh_token,
        ) {
            (None, None, None) => None,
            (Some(client_id), Some(client_secret), Some(refresh_token)) => Some(PhotosSettings {
                client_id,
                client_secret,
                refresh_token,
                album_name: args.photos_album_name.trim().to_string(),
            }),
            _ => bail!(
                "Google Photos needs all of GOOGLE_PHOTOS_CLIENT_ID, \
                 GOOGLE_PHOTOS_CLIENT_SECRET and GOOGLE_PHOTOS_REFRESH_TOKEN, or none"
            ),
        };

        if args.run_interval == 0 {
            bail!("RUN_INTERVAL must be greater than zero");
        }
        if args.download_timeout == 0 || args.scrape_timeout == 0 {
            bail!("Timeouts must be greater than zero");
        }

        Ok(Self {
            image_dir,
            ledger_path,
            album_urls,
            email,
            photos,
            run_interval: Duration::from_secs(args.run_interval),
            download_timeout: Duration::from_secs(args.download_timeout),
            scrape_timeout: Duration::from_secs(args.scrape_timeout),
            max_items: args.max_items,
            once: args.once,
            notify_systemd: args.notify_systemd,
        })
    }
}

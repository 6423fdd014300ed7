use clap::{Args, Parser, Subcommand};

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "album-fanout",
    version,
    about = "Mirror shared photo albums to email and a cloud photo library"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub sync: SyncArgs,

    /// Log level (RUST_LOG overrides)
    #[arg(long, value_enum, default_value = "info", env = "LOG_LEVEL", global = true)]
    pub log_level: LogLevel,
}

impl Cli {
    /// The subcommand to run; `sync` when none is given.
    pub fn effective_command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Sync)
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the sync daemon (default)
    Sync,

    /// Show per-sink delivery counts and the last run
    Status,

    /// Check the image store for misnamed or corrupted files
    Verify {
        /// Re-hash every stored image and compare with its file name
        #[arg(long)]
        checksums: bool,
    },

    /// Authorize Google Photos in a browser and print a refresh token
    PhotosAuth {
        /// OAuth client ID
        #[arg(long, env = "GOOGLE_PHOTOS_CLIENT_ID")]
        client_id: String,

        /// OAuth client secret
        #[arg(long, env = "GOOGLE_PHOTOS_CLIENT_SECRET", hide_env_values = true)]
        client_secret: String,

        /// Local port for the redirect; http://localhost:<port> must be an
        /// authorized redirect URI of the OAuth client
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Directory holding downloaded images
    #[arg(long, env = "IMAGE_DIR", default_value = "/images")]
    pub image_dir: String,

    /// JSON file listing album URLs [default: <image-dir>/config.json]
    #[arg(long, env = "ALBUM_CONFIG")]
    pub album_config: Option<String>,

    /// Album URL(s) to sync; overrides the album config file
    #[arg(long = "album", env = "ALBUM_URLS", value_delimiter = ',')]
    pub albums: Vec<String>,

    /// Delivery ledger database [default: <image-dir>/ledger.db]
    #[arg(long, env = "LEDGER_PATH")]
    pub ledger_path: Option<String>,

    /// SMTP server host
    #[arg(long, env = "SMTP_SERVER")]
    pub smtp_server: Option<String>,

    /// SMTP server port
    #[arg(long, env = "SMTP_PORT")]
    pub smtp_port: Option<u16>,

    /// SMTP account (also used as the From address)
    #[arg(long, env = "SMTP_USERNAME")]
    pub smtp_username: Option<String>,

    /// SMTP password.
    /// WARNING: passing via --smtp-password is visible in process listings.
    /// Prefer the SMTP_PASSWORD environment variable instead.
    #[arg(long, env = "SMTP_PASSWORD", hide_env_values = true)]
    pub smtp_password: Option<String>,

    /// Reply-To address when it differs from the SMTP account
    #[arg(long, env = "SMTP_FROM")]
    pub smtp_from: Option<String>,

    /// Address that receives each new image
    #[arg(long, env = "SMTP_DESTINATION")]
    pub smtp_destination: Option<String>,

    /// Accept self-signed SMTP certificates (local mail bridges)
    #[arg(long, env = "SMTP_ACCEPT_INVALID_CERTS")]
    pub smtp_accept_invalid_certs: bool,

    /// Google Photos OAuth client ID
    #[arg(long, env = "GOOGLE_PHOTOS_CLIENT_ID")]
    pub photos_client_id: Option<String>,

    /// Google Photos OAuth client secret
    #[arg(long, env = "GOOGLE_PHOTOS_CLIENT_SECRET", hide_env_values = true)]
    pub photos_client_secret: Option<String>,

    /// Google Photos OAuth refresh token
    #[arg(long, env = "GOOGLE_PHOTOS_REFRESH_TOKEN", hide_env_values = true)]
    pub photos_refresh_token: Option<String>,

    /// Google Photos album to add uploads to; empty uploads to the library only
    #[arg(long, env = "GOOGLE_PHOTOS_ALBUM_NAME", default_value = "")]
    pub photos_album_name: String,

    /// Seconds between run starts
    #[arg(long, env = "RUN_INTERVAL", default_value_t = 3600)]
    pub run_interval: u64,

    /// Maximum number of new images handled per run
    #[arg(long, env = "MAX_ITEMS", default_value_t = 5)]
    pub max_items: usize,

    /// Image download timeout in seconds
    #[arg(long, default_value_t = 60)]
    pub download_timeout: u64,

    /// Album page fetch timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub scrape_timeout: u64,

    /// Run a single sync and exit
    #[arg(long, env = "RUN_ONCE")]
    pub once: bool,

    /// Send sd_notify readiness and status messages
    #[arg(long, env = "NOTIFY_SYSTEMD")]
    pub notify_systemd: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["album-fanout"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_no_subcommand_means_sync() {
        let cli = parse(&["--image-dir", "/tmp/images"]);
        assert_eq!(cli.effective_command(), Command::Sync);
        assert_eq!(cli.sync.image_dir, "/tmp/images");
    }

    #[test]
    fn test_album_flag_accepts_comma_list_and_repeats() {
        let cli = parse(&["--album", "https://a,https://b", "--album", "https://c"]);
        assert_eq!(cli.sync.albums, vec!["https://a", "https://b", "https://c"]);
    }

    #[test]
    fn test_verify_checksums_flag() {
        let cli = parse(&["verify", "--checksums"]);
        assert_eq!(cli.effective_command(), Command::Verify { checksums: true });
    }

    #[test]
    fn test_status_with_global_log_level() {
        let cli = parse(&["status", "--log-level", "warn"]);
        assert_eq!(cli.effective_command(), Command::Status);
        assert_eq!(cli.log_level, LogLevel::Warn);
    }

    #[test]
    fn test_smtp_port_must_be_numeric() {
        assert!(Cli::try_parse_from(["album-fanout", "--smtp-port", "twenty-five"]).is_err());
    }

    #[test]
    fn test_photos_auth_defaults_port() {
        let cli = parse(&["photos-auth", "--client-id", "id", "--client-secret", "secret"]);
        assert_eq!(
            cli.effective_command(),
            Command::PhotosAuth {
                client_id: "id".into(),
                client_secret: "secret".into(),
                port: 8080,
            }
        );
    }
}

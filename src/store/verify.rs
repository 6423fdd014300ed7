//! Offline integrity check of the image directory.
//!
//! Stored images are named `{fingerprint}.{ext}`, so a file's name is also
//! its expected digest. Files without an image extension (the ledger, the
//! album config, the lock file) are ignored.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use super::{Fingerprint, ImageFormat, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    /// Image extension, but the stem is not a fingerprint.
    Misnamed(PathBuf),
    /// Content no longer hashes to the fingerprint in the name.
    Corrupted { path: PathBuf, actual: Fingerprint },
    Unreadable { path: PathBuf, error: String },
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Problem::Misnamed(path) => write!(f, "MISNAMED: {}", path.display()),
            Problem::Corrupted { path, actual } => {
                write!(f, "CORRUPTED: {} (content hashes to {})", path.display(), actual)
            }
            Problem::Unreadable { path, error } => {
                write!(f, "ERROR: {} - {}", path.display(), error)
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct VerifyReport {
    /// Well-named images (and, with checksums, matching content).
    pub verified: usize,
    pub problems: Vec<Problem>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Parse a stored file name into its fingerprint. `Ok(None)` means the file
/// is not an image and should be ignored.
fn classify(file_name: &str) -> Result<Option<Fingerprint>, ()> {
    let Some((stem, ext)) = file_name.rsplit_once('.') else {
        return Ok(None);
    };
    if !ImageFormat::ALL.iter().any(|f| f.extension() == ext) {
        return Ok(None);
    }
    stem.parse::<Fingerprint>().map(Some).map_err(|_| ())
}

async fn hash_file(path: &Path) -> Result<Fingerprint, StoreError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok::<Fingerprint, StoreError>(Fingerprint::from_hasher(hasher))
    })
    .await
    .map_err(|e| StoreError::Disk(std::io::Error::other(e)))?
}

/// Check every image file under `root`. With `checksums`, each file is
/// re-hashed and compared with its name.
pub async fn verify_store(root: &Path, checksums: bool) -> Result<VerifyReport, StoreError> {
    let mut report = VerifyReport::default();
    let mut entries = tokio::fs::read_dir(root).await?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();

    for path in files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let expected = match classify(&name) {
            Ok(Some(fp)) => fp,
            Ok(None) => continue,
            Err(()) => {
                report.problems.push(Problem::Misnamed(path));
                continue;
            }
        };

        if !checksums {
            report.verified += 1;
            continue;
        }

        match hash_file(&path).await {
            Ok(actual) if actual == expected => report.verified += 1,
            Ok(actual) => report.problems.push(Problem::Corrupted { path, actual }),
            Err(e) => report.problems.push(Problem::Unreadable {
                path,
                error: e.to_string(),
            }),
        }
    }

    Ok(report)
}

//! On-disk artifact storage.
//!
//! Every file lives directly under one base directory as
//! `{artifact_id}_{display}`. Paths are only ever built from a `StoredName`,
//! never from raw client input.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use audiodrop_core::filename::{output_name, OUTPUT_EXTENSION};
use audiodrop_core::{ArtifactId, NameError, StoredName};

pub use audiodrop_core::ArtifactRole;
use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Malformed artifact identifier")]
    MalformedIdentifier,

    #[error("Artifact not found")]
    NotFound,

    #[error("Storage I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<NameError> for StoreError {
    fn from(err: NameError) -> Self {
        match err {
            NameError::MalformedIdentifier => StoreError::MalformedIdentifier,
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A file found in the storage directory by `scan`.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub name: StoredName,
    pub path: PathBuf,
    pub role: ArtifactRole,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    base_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Creates the storage directory if it does not exist yet.
    pub async fn ensure_base_dir(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| io_error(&self.base_dir, e))
    }

    /// Storage path for one half of a job.
    ///
    /// `sanitized_input` must already have been through `secure_filename`.
    /// Output paths use the derived `{stem}.mp3` name.
    pub fn path_for(&self, id: ArtifactId, role: ArtifactRole, sanitized_input: &str) -> PathBuf {
        let display = match role {
            ArtifactRole::Input => sanitized_input.to_string(),
            ArtifactRole::Output => output_name(sanitized_input),
        };
        self.resolve(&StoredName::new(id, display))
    }

    pub fn resolve(&self, name: &StoredName) -> PathBuf {
        self.base_dir.join(name.file_name())
    }

    /// Checks a client-supplied `{identifier}_{rest}` name.
    ///
    /// Format check only; does not look at the filesystem.
    pub fn validate(&self, requested: &str) -> Result<StoredName, StoreError> {
        Ok(StoredName::parse(requested)?)
    }

    pub async fn exists(&self, path: &Path) -> bool {
        match tokio::fs::metadata(path).await {
            Ok(meta) => meta.is_file(),
            Err(_) => false,
        }
    }

    pub async fn size_of(&self, path: &Path) -> Result<u64, StoreError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) => Err(StoreError::NotFound),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound),
            Err(e) => Err(io_error(path, e)),
        }
    }

    /// Removes a file. Idempotent: a missing file is not an error.
    ///
    /// Returns whether a file was actually removed.
    pub async fn delete(&self, path: &Path) -> Result<bool, StoreError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(path, e)),
        }
    }

    /// Best-effort delete; failures are logged and swallowed.
    pub async fn discard(&self, path: &Path) {
        match self.delete(path).await {
            Ok(true) => tracing::debug!(path = %path.display(), "Removed artifact file"),
            Ok(false) => {}
            Err(e) => tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to remove artifact file"
            ),
        }
    }

    /// Lists the artifact files currently in the storage directory.
    ///
    /// Entries whose names do not parse as stored names are ignored, so a
    /// shared directory such as `/tmp` is safe to use.
    pub async fn scan(&self) -> Result<Vec<StoredEntry>, StoreError> {
        let mut dir = tokio::fs::read_dir(&self.base_dir)
            .await
            .map_err(|e| io_error(&self.base_dir, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| io_error(&self.base_dir, e))?
        {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str().and_then(|n| StoredName::parse(n).ok()) else {
                continue;
            };

            let meta = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };
            let modified = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            let role = if name.display().ends_with(&format!(".{}", OUTPUT_EXTENSION)) {
                ArtifactRole::Output
            } else {
                ArtifactRole::Input
            };

            entries.push(StoredEntry {
                path: entry.path(),
                name,
                role,
                modified,
            });
        }

        Ok(entries)
    }
}

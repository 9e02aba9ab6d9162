//! Serving converted artifacts.

use std::io::ErrorKind;

use audiodrop_core::filename::OUTPUT_EXTENSION;
use audiodrop_core::{has_allowed_extension, StoredName};
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;
use tokio::io::AsyncReadExt;

use crate::store::{ArtifactStore, StoreError};

/// Read size for streaming a file to the client.
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid file identifier")]
    MalformedIdentifier,

    /// Never existed or already expired; the two are not distinguished.
    #[error("File not found or expired")]
    NotFound,

    #[error("File too large: {size} bytes (max: {limit} bytes)")]
    TooLarge { size: u64, limit: u64 },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MalformedIdentifier => GatewayError::MalformedIdentifier,
            StoreError::NotFound => GatewayError::NotFound,
            StoreError::Io { .. } => GatewayError::Storage(err.to_string()),
        }
    }
}

/// An opened artifact ready to be streamed.
#[derive(Debug)]
pub struct Download {
    pub name: StoredName,
    pub size: u64,
    file: tokio::fs::File,
}

pub struct DownloadGateway {
    store: ArtifactStore,
    max_bytes: u64,
}

impl DownloadGateway {
    pub fn new(store: ArtifactStore, max_bytes: u64) -> Self {
        Self { store, max_bytes }
    }

    /// Resolves a requested `{identifier}_{name}` and opens the file.
    ///
    /// The name is format-checked before any filesystem access. Only
    /// converted outputs are served; inputs mid-conversion look absent.
    pub async fn open(&self, requested: &str) -> Result<Download, GatewayError> {
        let name = self.store.validate(requested)?;
        if !has_allowed_extension(name.display(), &[OUTPUT_EXTENSION]) {
            return Err(GatewayError::NotFound);
        }
        let path = self.store.resolve(&name);

        if !self.store.exists(&path).await {
            return Err(GatewayError::NotFound);
        }

        let size = self.store.size_of(&path).await?;
        if size > self.max_bytes {
            return Err(GatewayError::TooLarge {
                size,
                limit: self.max_bytes,
            });
        }

        // The retention timer may have fired since the size check.
        let file = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => GatewayError::NotFound,
            _ => GatewayError::Storage(format!("failed to open {}: {}", path.display(), e)),
        })?;

        Ok(Download { name, size, file })
    }
}

impl IntoResponse for Download {
    fn into_response(self) -> Response {
        let stored_name = self.name.file_name();
        let stream = futures::stream::try_unfold(self.file, |mut file| async move {
            let mut buf = vec![0u8; CHUNK_SIZE];
            let n = file.read(&mut buf).await?;
            if n == 0 {
                return Ok::<_, std::io::Error>(None);
            }
            buf.truncate(n);
            Ok(Some((Bytes::from(buf), file)))
        })
        .inspect_err(move |e| {
            tracing::error!(stored_name = %stored_name, error = %e, "Artifact stream aborted");
        });

        let disposition = HeaderValue::from_str(&format!(
            "attachment; filename=\"{}\"",
            self.name.display()
        ))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, HeaderValue::from_static("audio/mpeg")),
                (header::CONTENT_LENGTH, HeaderValue::from(self.size)),
                (header::CONTENT_DISPOSITION, disposition),
                (
                    header::CACHE_CONTROL,
                    HeaderValue::from_static("no-cache, no-store, must-revalidate"),
                ),
                (header::PRAGMA, HeaderValue::from_static("no-cache")),
                (header::EXPIRES, HeaderValue::from_static("0")),
            ],
            Body::from_stream(stream),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiodrop_core::{IdAllocator, RandomIdAllocator};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_existing_artifact() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let name = StoredName::new(RandomIdAllocator.allocate(), "song.mp3");
        tokio::fs::write(store.resolve(&name), b"0123456789").await.unwrap();

        let gateway = DownloadGateway::new(store, 1024);
        let download = gateway.open(&name.file_name()).await.unwrap();

        assert_eq!(download.size, 10);
        assert_eq!(download.name.display(), "song.mp3");
    }

    #[tokio::test]
    async fn test_open_malformed_name() {
        let dir = TempDir::new().unwrap();
        let gateway = DownloadGateway::new(ArtifactStore::new(dir.path()), 1024);

        let err = gateway.open("../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, GatewayError::MalformedIdentifier));
    }

    #[tokio::test]
    async fn test_open_unknown_id_is_not_found() {
        let dir = TempDir::new().unwrap();
        let gateway = DownloadGateway::new(ArtifactStore::new(dir.path()), 1024);
        let name = StoredName::new(RandomIdAllocator.allocate(), "song.mp3");

        let err = gateway.open(&name.file_name()).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound));
    }

    #[tokio::test]
    async fn test_inputs_are_never_served() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let name = StoredName::new(RandomIdAllocator.allocate(), "song.m4a");
        tokio::fs::write(store.resolve(&name), b"aac").await.unwrap();

        let gateway = DownloadGateway::new(store, 1024);
        let err = gateway.open(&name.file_name()).await.unwrap_err();

        assert!(matches!(err, GatewayError::NotFound));
    }

    #[tokio::test]
    async fn test_open_oversized_artifact() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let name = StoredName::new(RandomIdAllocator.allocate(), "big.mp3");
        tokio::fs::write(store.resolve(&name), vec![0u8; 2048]).await.unwrap();

        let gateway = DownloadGateway::new(store, 1024);
        let err = gateway.open(&name.file_name()).await.unwrap_err();

        assert!(matches!(err, GatewayError::TooLarge { size: 2048, limit: 1024 }));
    }

    #[tokio::test]
    async fn test_response_headers_and_body() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let name = StoredName::new(RandomIdAllocator.allocate(), "song.mp3");
        let content = vec![7u8; CHUNK_SIZE + 10];
        tokio::fs::write(store.resolve(&name), &content).await.unwrap();

        let gateway = DownloadGateway::new(store, u64::MAX);
        let response = gateway.open(&name.file_name()).await.unwrap().into_response();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "audio/mpeg");
        assert_eq!(headers[header::CONTENT_LENGTH], content.len().to_string().as_str());
        assert_eq!(headers[header::CONTENT_DISPOSITION], "attachment; filename=\"song.mp3\"");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-store, must-revalidate");
        assert_eq!(headers[header::PRAGMA], "no-cache");
        assert_eq!(headers[header::EXPIRES], "0");

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), content.as_slice());
    }
}

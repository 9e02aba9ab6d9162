//! Upload -> transcode -> register pipeline.
//!
//! Inputs never outlive their conversion attempt: on success the input is
//! removed once the output is verified, on failure both halves are removed.
//! Outputs are handed to the retention scheduler before the handle is
//! returned to the caller.

use std::path::PathBuf;
use std::sync::Arc;

use audiodrop_core::filename::has_allowed_extension;
use audiodrop_core::{
    secure_filename, ArtifactId, ArtifactRecord, Bitrate, IdAllocator, LifecycleState, StoredName,
};
use axum::body::Bytes;
use chrono::{DateTime, Utc};

use crate::retention::RetentionScheduler;
use crate::store::ArtifactStore;
use crate::transcoder::{TranscodeError, Transcoder};

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Conversion failed: {0}")]
    ConversionFailed(String),

    #[error("Transcoder not available: {0}")]
    ToolUnavailable(String),

    #[error("Conversion timed out")]
    TimedOut,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<TranscodeError> for ConversionError {
    fn from(err: TranscodeError) -> Self {
        match err {
            TranscodeError::ToolUnavailable(tool) => ConversionError::ToolUnavailable(tool),
            TranscodeError::Failed { .. } => ConversionError::ConversionFailed(err.to_string()),
            TranscodeError::TimedOut(_) => ConversionError::TimedOut,
            TranscodeError::Io(e) => ConversionError::Internal(format!("transcoder I/O: {}", e)),
        }
    }
}

/// The file part of an upload.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Filename as sent by the client.
    pub filename: String,
    pub data: Bytes,
}

/// A successfully converted, downloadable artifact.
#[derive(Debug, Clone)]
pub struct ConvertedArtifact {
    pub stored_name: StoredName,
    pub expires_at: DateTime<Utc>,
    pub record: ArtifactRecord,
}

impl ConvertedArtifact {
    /// Name offered to the client, without the identifier prefix.
    pub fn filename(&self) -> &str {
        self.stored_name.display()
    }
}

pub struct ConversionPipeline {
    store: ArtifactStore,
    transcoder: Arc<dyn Transcoder>,
    retention: RetentionScheduler,
    ids: Arc<dyn IdAllocator>,
    allowed_extensions: Vec<String>,
}

impl ConversionPipeline {
    pub fn new(
        store: ArtifactStore,
        transcoder: Arc<dyn Transcoder>,
        retention: RetentionScheduler,
        ids: Arc<dyn IdAllocator>,
        allowed_extensions: Vec<String>,
    ) -> Self {
        Self {
            store,
            transcoder,
            retention,
            ids,
            allowed_extensions,
        }
    }

    fn invalid_format_message(&self) -> String {
        let names: Vec<String> = self
            .allowed_extensions
            .iter()
            .map(|e| e.to_ascii_uppercase())
            .collect();
        format!(
            "Invalid file format. Only {} files are allowed",
            names.join(", ")
        )
    }

    /// Validates the request before anything is written to disk.
    fn check_request(
        &self,
        upload: Option<&Upload>,
        bitrate: Option<&str>,
    ) -> Result<(String, Bitrate), ConversionError> {
        let upload =
            upload.ok_or_else(|| ConversionError::InvalidInput("No file uploaded".to_string()))?;

        if upload.filename.trim().is_empty() {
            return Err(ConversionError::InvalidInput("No file selected".to_string()));
        }

        if !has_allowed_extension(&upload.filename, &self.allowed_extensions) {
            return Err(ConversionError::InvalidInput(self.invalid_format_message()));
        }

        // Sanitizing can strip the extension off names made of unsupported
        // characters, so the result is checked again.
        let sanitized = secure_filename(&upload.filename)
            .filter(|name| has_allowed_extension(name, &self.allowed_extensions))
            .ok_or_else(|| ConversionError::InvalidInput("Invalid filename".to_string()))?;

        let bitrate = Bitrate::parse_or_default(bitrate)
            .map_err(|e| ConversionError::InvalidInput(e.to_string()))?;

        Ok((sanitized, bitrate))
    }

    /// Runs one upload through conversion and registers the output.
    pub async fn convert(
        &self,
        upload: Option<Upload>,
        bitrate: Option<&str>,
    ) -> Result<ConvertedArtifact, ConversionError> {
        let (sanitized, bitrate) = self.check_request(upload.as_ref(), bitrate)?;
        let Some(upload) = upload else {
            return Err(ConversionError::InvalidInput("No file uploaded".to_string()));
        };

        let id = self.ids.allocate();
        let mut record =
            ArtifactRecord::new(id, upload.filename, sanitized.clone(), bitrate, |role| {
                self.store.path_for(id, role, &sanitized)
            });

        tracing::info!(
            artifact_id = %id,
            input = %record.input_name,
            bitrate = %bitrate,
            bytes = upload.data.len(),
            "Upload accepted"
        );

        // Covers the request being dropped mid-conversion, when neither arm
        // below runs.
        let guard = AbandonGuard::new(&self.store, &record);

        match self.run(&mut record, &upload.data).await {
            Ok(converted) => {
                guard.disarm();
                Ok(converted)
            }
            Err(e) => {
                if let Err(transition) = record.advance(LifecycleState::Failed) {
                    tracing::debug!(
                        artifact_id = %id,
                        error = %transition,
                        "Failed transition rejected"
                    );
                }
                self.store.discard(&record.input_path).await;
                self.store.discard(&record.output_path).await;
                guard.disarm();
                tracing::warn!(artifact_id = %id, error = %e, "Conversion failed, inputs purged");
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        record: &mut ArtifactRecord,
        data: &[u8],
    ) -> Result<ConvertedArtifact, ConversionError> {
        tokio::fs::write(&record.input_path, data).await.map_err(|e| {
            ConversionError::Internal(format!(
                "failed to persist upload to {}: {}",
                record.input_path.display(),
                e
            ))
        })?;

        advance(record, LifecycleState::Converting)?;
        self.transcoder
            .transcode(&record.input_path, &record.output_path, record.bitrate)
            .await?;

        match self.store.size_of(&record.output_path).await {
            Ok(size) if size > 0 => {}
            _ => {
                return Err(ConversionError::ConversionFailed(
                    "transcoder produced no output".to_string(),
                ))
            }
        }
        advance(record, LifecycleState::Converted)?;

        self.store.discard(&record.input_path).await;

        let stored_name = record.output_stored_name();
        let expires_at = self.retention.arm(&stored_name);
        advance(record, LifecycleState::Downloadable)?;

        tracing::info!(
            artifact_id = %record.id,
            stored_name = %stored_name,
            expires_at = %expires_at,
            "Artifact downloadable"
        );

        Ok(ConvertedArtifact {
            stored_name,
            expires_at,
            record: record.clone(),
        })
    }
}

/// Removes both halves of a job whose `convert` future was dropped before
/// it finished.
struct AbandonGuard {
    store: ArtifactStore,
    artifact_id: ArtifactId,
    paths: Option<[PathBuf; 2]>,
}

impl AbandonGuard {
    fn new(store: &ArtifactStore, record: &ArtifactRecord) -> Self {
        Self {
            store: store.clone(),
            artifact_id: record.id,
            paths: Some([record.input_path.clone(), record.output_path.clone()]),
        }
    }

    fn disarm(mut self) {
        self.paths = None;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        let Some(paths) = self.paths.take() else {
            return;
        };

        tracing::warn!(artifact_id = %self.artifact_id, "Conversion abandoned, purging files");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let store = self.store.clone();
                runtime.spawn(async move {
                    for path in &paths {
                        store.discard(path).await;
                    }
                });
            }
            Err(_) => {
                for path in &paths {
                    if let Err(e) = std::fs::remove_file(path) {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            tracing::warn!(
                                path = %path.display(),
                                error = %e,
                                "Failed to remove artifact file"
                            );
                        }
                    }
                }
            }
        }
    }
}

fn advance(record: &mut ArtifactRecord, next: LifecycleState) -> Result<(), ConversionError> {
    record
        .advance(next)
        .map_err(|e| ConversionError::Internal(e.to_string()))?;
    tracing::debug!(artifact_id = %record.id, state = %next, "Lifecycle transition");
    Ok(())
}

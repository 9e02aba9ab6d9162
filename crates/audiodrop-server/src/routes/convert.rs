//! Upload and conversion endpoint.

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::{header, HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::config::ServiceConfig;
use crate::error::AppError;
use crate::pipeline::Upload;
use crate::state::AppState;

/// Multipart field carrying the audio file.
const FILE_FIELD: &str = "file";

/// Optional multipart field carrying the target bitrate.
const BITRATE_FIELD: &str = "bitrate";

/// Response for a successful conversion.
#[derive(Debug, Serialize)]
pub struct ConvertResponse {
    pub success: bool,
    /// Absolute URL the converted file can be fetched from.
    pub download_url: String,
    /// Name of the converted file, without the identifier prefix.
    pub filename: String,
    /// When the file will be deleted (RFC 3339).
    pub expires_at: String,
}

/// Creates the convert router.
pub fn router(state: AppState) -> Router {
    let limit = state.config.max_upload_bytes;
    Router::new()
        .route("/convert", post(convert))
        .layer(DefaultBodyLimit::max(limit))
        .with_state(state)
}

/// POST /convert
///
/// Accepts `multipart/form-data` with a `file` part and an optional
/// `bitrate` field (default `192k`). Returns a download link for the MP3.
async fn convert(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ConvertResponse>, AppError> {
    let mut multipart =
        multipart.map_err(|_| AppError::BadRequest("No file uploaded".to_string()))?;

    let mut upload: Option<Upload> = None;
    let mut bitrate: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, &state.config))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(FILE_FIELD) if upload.is_none() => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error(e, &state.config))?;
                upload = Some(Upload { filename, data });
            }
            Some(BITRATE_FIELD) => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| multipart_error(e, &state.config))?;
                bitrate = Some(value);
            }
            _ => {}
        }
    }

    let converted = state.pipeline.convert(upload, bitrate.as_deref()).await?;

    Ok(Json(ConvertResponse {
        success: true,
        download_url: format!(
            "{}/download/{}",
            base_url(&state.config, &headers),
            converted.stored_name
        ),
        filename: converted.filename().to_string(),
        expires_at: converted.expires_at.to_rfc3339(),
    }))
}

fn multipart_error(err: MultipartError, config: &ServiceConfig) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::PayloadTooLarge(format!(
            "File too large. Maximum size is {}",
            config.max_upload_label()
        ));
    }
    AppError::BadRequest(format!("Malformed upload: {}", err.body_text()))
}

/// Scheme and authority for download links.
fn base_url(config: &ServiceConfig, headers: &HeaderMap) -> String {
    if let Some(url) = &config.public_url {
        return url.clone();
    }

    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .filter(|s| *s == "https" || *s == "http")
        .unwrap_or("http");

    format!("{}://{}", scheme, host)
}

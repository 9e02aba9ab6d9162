// HTTP client for the audiodrop service

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use audiodrop_core::secure_filename;
use serde::Deserialize;

use crate::multipart::Form;

/// Successful `/convert` response.
#[derive(Debug, Deserialize)]
pub struct ConvertResponse {
    pub success: bool,
    pub download_url: String,
    pub filename: String,
    pub expires_at: String,
}

/// `/health` response.
#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub pending_deletions: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

pub struct Client {
    base_url: String,
}

impl Client {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Uploads an M4A file and returns the server's download handle.
    pub fn convert(&self, path: &Path, bitrate: &str) -> Result<ConvertResponse> {
        let data = std::fs::read(path)
            .map_err(|e| anyhow!("Failed to read '{}': {}", path.display(), e))?;
        let filename = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| anyhow!("'{}' is not a file", path.display()))?;

        let form = Form::new()
            .text("bitrate", bitrate)
            .file("file", &filename, "audio/mp4", &data);
        let content_type = form.content_type();

        let response = ureq::post(&format!("{}/convert", self.base_url))
            .set("Content-Type", &content_type)
            .send_bytes(&form.finish())
            .map_err(|e| request_error("Conversion", e))?;

        let converted: ConvertResponse = response
            .into_json()
            .context("Server returned an unreadable conversion response")?;
        if !converted.success {
            return Err(anyhow!("Server reported the conversion as unsuccessful"));
        }
        Ok(converted)
    }

    /// Fetches a converted file into `dir` and returns where it was written.
    pub fn download(&self, converted: &ConvertResponse, dir: &Path) -> Result<PathBuf> {
        let response = ureq::get(&converted.download_url)
            .call()
            .map_err(|e| request_error("Download", e))?;

        let name =
            secure_filename(&converted.filename).unwrap_or_else(|| "download.mp3".to_string());
        let target = dir.join(name);
        let mut file = std::fs::File::create(&target)
            .map_err(|e| anyhow!("Failed to create '{}': {}", target.display(), e))?;
        copy_body(response.into_reader(), &mut file)
            .map_err(|e| anyhow!("Failed to write '{}': {}", target.display(), e))?;

        Ok(target)
    }

    pub fn health(&self) -> Result<HealthResponse> {
        ureq::get(&format!("{}/health", self.base_url))
            .call()
            .map_err(|e| request_error("Health check", e))?
            .into_json()
            .context("Server returned an unreadable health response")
    }
}

fn copy_body(mut reader: impl Read, writer: &mut impl Write) -> std::io::Result<u64> {
    let written = std::io::copy(&mut reader, writer)?;
    writer.flush()?;
    Ok(written)
}

/// Surfaces the server's `{"error": ...}` message when there is one.
fn request_error(action: &str, err: ureq::Error) -> anyhow::Error {
    match err {
        ureq::Error::Status(code, response) => {
            let message = response
                .into_json::<ErrorBody>()
                .map(|body| body.error)
                .unwrap_or_else(|_| "no details".to_string());
            anyhow!("{} failed ({}): {}", action, code, message)
        }
        ureq::Error::Transport(t) => anyhow!("{} failed: {}", action, t),
    }
}

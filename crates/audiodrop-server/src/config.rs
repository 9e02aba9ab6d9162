//! Service configuration.
//!
//! One `ServiceConfig` is built at startup and handed to every component.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default upload ceiling (16 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Default download ceiling (50 MiB).
pub const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 50 * 1024 * 1024;

/// Default time a converted file stays downloadable.
pub const DEFAULT_RETENTION_SECS: u64 = 600;

/// Default bound on a single transcoder run.
pub const DEFAULT_TRANSCODE_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}'")]
    Invalid { var: &'static str, value: String },
}

/// Runtime configuration for the conversion service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address the HTTP listener binds to.
    pub bind: SocketAddr,
    /// Directory holding uploaded inputs and converted outputs.
    pub storage_dir: PathBuf,
    /// Largest accepted request body for `/convert`.
    pub max_upload_bytes: usize,
    /// Largest artifact `/download` will serve.
    pub max_download_bytes: u64,
    /// How long an output stays downloadable.
    pub retention: Duration,
    /// Accepted upload extensions, lowercase, without the dot.
    pub allowed_extensions: Vec<String>,
    /// Transcoder executable (name on PATH or absolute path).
    pub transcoder: PathBuf,
    /// Upper bound on a single transcoder invocation.
    pub transcode_timeout: Duration,
    /// Externally visible base URL for download links. When unset, links are
    /// built from the request's `Host` header.
    pub public_url: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
            storage_dir: std::env::temp_dir(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
            allowed_extensions: vec!["m4a".to_string()],
            transcoder: PathBuf::from("ffmpeg"),
            transcode_timeout: Duration::from_secs(DEFAULT_TRANSCODE_TIMEOUT_SECS),
            public_url: None,
        }
    }
}

impl ServiceConfig {
    /// Builds a configuration from environment variables.
    ///
    /// Reads (all optional):
    /// - `AUDIODROP_BIND` (default: 0.0.0.0:5000)
    /// - `AUDIODROP_STORAGE_DIR` (default: system temp dir)
    /// - `AUDIODROP_MAX_UPLOAD_BYTES` (default: 16 MiB)
    /// - `AUDIODROP_MAX_DOWNLOAD_BYTES` (default: 50 MiB)
    /// - `AUDIODROP_RETENTION_SECS` (default: 600)
    /// - `AUDIODROP_ALLOWED_EXTENSIONS` (default: m4a, comma separated)
    /// - `AUDIODROP_TRANSCODER` (default: ffmpeg)
    /// - `AUDIODROP_TRANSCODE_TIMEOUT_SECS` (default: 300)
    /// - `AUDIODROP_PUBLIC_URL` (default: unset)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind = parse_var(&lookup, "AUDIODROP_BIND")?.unwrap_or(defaults.bind);
        let storage_dir = lookup("AUDIODROP_STORAGE_DIR")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_dir);
        let max_upload_bytes =
            parse_var(&lookup, "AUDIODROP_MAX_UPLOAD_BYTES")?.unwrap_or(defaults.max_upload_bytes);
        let max_download_bytes = parse_var(&lookup, "AUDIODROP_MAX_DOWNLOAD_BYTES")?
            .unwrap_or(defaults.max_download_bytes);
        let retention = parse_var(&lookup, "AUDIODROP_RETENTION_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.retention);
        let transcode_timeout = parse_var(&lookup, "AUDIODROP_TRANSCODE_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.transcode_timeout);
        let transcoder = lookup("AUDIODROP_TRANSCODER")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.transcoder);
        let public_url = lookup("AUDIODROP_PUBLIC_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty());

        let allowed_extensions = match lookup("AUDIODROP_ALLOWED_EXTENSIONS") {
            Some(raw) => {
                let exts = parse_extensions(&raw);
                if exts.is_empty() {
                    return Err(ConfigError::Invalid {
                        var: "AUDIODROP_ALLOWED_EXTENSIONS",
                        value: raw,
                    });
                }
                exts
            }
            None => defaults.allowed_extensions,
        };

        Ok(Self {
            bind,
            storage_dir,
            max_upload_bytes,
            max_download_bytes,
            retention,
            allowed_extensions,
            transcoder,
            transcode_timeout,
            public_url,
        })
    }

    /// Human-readable upload ceiling, e.g. `16MB`.
    pub fn max_upload_label(&self) -> String {
        format!("{}MB", self.max_upload_bytes / (1024 * 1024))
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}

fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

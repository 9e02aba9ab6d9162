//! External transcoder invocation.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use audiodrop_core::Bitrate;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    /// The transcoder binary could not be found.
    #[error("Transcoder '{0}' is not installed")]
    ToolUnavailable(String),

    /// The transcoder ran and exited unsuccessfully.
    #[error("Transcoder exited with {status}: {detail}")]
    Failed { status: String, detail: String },

    #[error("Transcoder did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("Failed to run transcoder: {0}")]
    Io(#[from] std::io::Error),
}

/// Converts one input file into an MP3 at the requested bitrate.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        bitrate: Bitrate,
    ) -> Result<(), TranscodeError>;
}

/// Runs `ffmpeg` as a child process.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    program: PathBuf,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Argument list for one conversion.
    ///
    /// -nostdin            : never wait on the terminal
    /// -y                  : output path is freshly allocated, overwrite is safe
    /// -vn                 : drop cover art / video streams
    /// -codec:a libmp3lame : LAME MP3 encoder
    /// -b:a <bitrate>      : target bitrate, one argv element
    pub fn args(input: &Path, output: &Path, bitrate: Bitrate) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> =
            ["-nostdin", "-hide_banner", "-loglevel", "error", "-y", "-i"]
                .iter()
                .map(|a| std::ffi::OsString::from(*a))
                .collect();
        args.push(input.as_os_str().to_owned());
        for a in ["-vn", "-codec:a", "libmp3lame", "-b:a"] {
            args.push(a.into());
        }
        args.push(bitrate.as_arg().into());
        args.push(output.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        bitrate: Bitrate,
    ) -> Result<(), TranscodeError> {
        let child = Command::new(&self.program)
            .args(Self::args(input, output, bitrate))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    TranscodeError::ToolUnavailable(self.program.display().to_string())
                }
                _ => TranscodeError::Io(e),
            })?;

        // Dropping the future on timeout kills the child.
        let result = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| TranscodeError::TimedOut(self.timeout))??;

        if result.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&result.stderr);
        Err(TranscodeError::Failed {
            status: result.status.to_string(),
            detail: stderr
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .unwrap_or("no diagnostic output")
                .to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_args_keep_bitrate_as_single_element() {
        let args = FfmpegTranscoder::args(
            Path::new("/tmp/in.m4a"),
            Path::new("/tmp/out.mp3"),
            "128k".parse().unwrap(),
        );
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();

        let pos = args.iter().position(|a| a == "-b:a").unwrap();
        assert_eq!(args[pos + 1], "128k");
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp3"));
        let input_pos = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[input_pos + 1], "/tmp/in.m4a");
    }

    #[tokio::test]
    async fn test_missing_binary_is_tool_unavailable() {
        let dir = TempDir::new().unwrap();
        let transcoder = FfmpegTranscoder::new(
            dir.path().join("definitely-not-ffmpeg"),
            Duration::from_secs(5),
        );

        let err = transcoder
            .transcode(
                &dir.path().join("in.m4a"),
                &dir.path().join("out.mp3"),
                Bitrate::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TranscodeError::ToolUnavailable(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let dir = TempDir::new().unwrap();
        let transcoder = FfmpegTranscoder::new("false", Duration::from_secs(5));

        let err = transcoder
            .transcode(
                &dir.path().join("in.m4a"),
                &dir.path().join("out.mp3"),
                Bitrate::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TranscodeError::Failed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_transcoder_is_killed_at_timeout() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let script = dir.path().join("slow-ffmpeg");
        std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let transcoder = FfmpegTranscoder::new(&script, Duration::from_millis(100));
        let started = std::time::Instant::now();
        let err = transcoder
            .transcode(
                &dir.path().join("in.m4a"),
                &dir.path().join("out.mp3"),
                Bitrate::default(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TranscodeError::TimedOut(d) if d == Duration::from_millis(100)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    #[ignore = "requires ffmpeg on PATH"]
    async fn test_real_ffmpeg_rejects_garbage_input() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.m4a");
        tokio::fs::write(&input, b"not really audio").await.unwrap();

        let transcoder = FfmpegTranscoder::new("ffmpeg", Duration::from_secs(30));
        let err = transcoder
            .transcode(&input, &dir.path().join("out.mp3"), Bitrate::default())
            .await
            .unwrap_err();

        assert!(matches!(err, TranscodeError::Failed { .. }));
    }
}

//! Single-frame thumbnail capture through an external ffmpeg process.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use thiserror::Error;
use tracing::debug;

/// Offset into the segment where the frame is taken.
pub const SEEK_OFFSET: &str = "00:00:01";
/// ffmpeg `-q:v` value (1 best, 31 worst).
pub const JPEG_QUALITY: u8 = 2;
pub const THUMBNAIL_WIDTH: u32 = 200;
pub const THUMBNAIL_HEIGHT: u32 = 150;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("Failed to launch {program}: {reason}")]
    Spawn { program: String, reason: String },
    #[error("Frame capture for {segment_url} exited with {status}: {stderr}")]
    Exit {
        segment_url: String,
        status: String,
        stderr: String,
    },
    #[error("Frame capture for {segment_url} timed out after {timeout_ms}ms")]
    Timeout { segment_url: String, timeout_ms: u128 },
}

/// Produces one thumbnail image for a segment and returns the local time of day it was made.
#[async_trait]
pub trait ThumbnailGenerator: Send + Sync {
    async fn generate(&self, segment_url: &str, dest: &Path) -> Result<String, ThumbnailError>;
}

#[derive(Debug, Clone)]
pub struct FfmpegThumbnailer {
    program: PathBuf,
    timeout: Duration,
}

impl FfmpegThumbnailer {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn from_config(config: &crate::config::WatchConfig) -> Self {
        Self::new(&config.ffmpeg_path, config.thumbnail_timeout)
    }
}

/// Arguments for capturing one scaled frame of `segment_url` into `dest`, overwriting it.
pub fn ffmpeg_args(segment_url: &str, dest: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        segment_url.into(),
        "-ss".into(),
        SEEK_OFFSET.into(),
        "-vframes".into(),
        "1".into(),
        "-q:v".into(),
        JPEG_QUALITY.to_string(),
        "-s".into(),
        format!("{}x{}", THUMBNAIL_WIDTH, THUMBNAIL_HEIGHT),
        "-y".into(),
        dest.to_string_lossy().into_owned(),
    ]
}

#[async_trait]
impl ThumbnailGenerator for FfmpegThumbnailer {
    async fn generate(&self, segment_url: &str, dest: &Path) -> Result<String, ThumbnailError> {
        let args = ffmpeg_args(segment_url, dest);
        debug!(program = %self.program.display(), args = %args.join(" "), "Capturing thumbnail");

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ThumbnailError::Spawn {
                    program: self.program.display().to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ThumbnailError::Timeout {
                    segment_url: segment_url.to_string(),
                    timeout_ms: self.timeout.as_millis(),
                })
            }
        };

        if !output.status.success() {
            return Err(ThumbnailError::Exit {
                segment_url: segment_url.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(Local::now().format("%H:%M:%S").to_string())
    }
}

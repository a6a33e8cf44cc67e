mod http;

pub use http::HttpLoader;

use async_trait::async_trait;
use thiserror::Error;

/// Status reported when the fetch itself failed and no HTTP status exists.
pub const FETCH_FAILED_STATUS: u16 = 0;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Network error fetching {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("Timeout fetching {url}")]
    Timeout { url: String },
    #[error("Failed to read body of {url} (HTTP {status}): {reason}")]
    Body {
        url: String,
        status: u16,
        reason: String,
    },
    #[error("No segment URL found in playlist {url} (HTTP {status})")]
    NoSegment { url: String, status: u16 },
}

impl ResolveError {
    /// HTTP status seen before the failure, or [`FETCH_FAILED_STATUS`].
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Body { status, .. } | Self::NoSegment { status, .. } => *status,
            Self::Network { .. } | Self::Timeout { .. } => FETCH_FAILED_STATUS,
        }
    }
}

/// Raw playlist fetch result. Non-2xx responses are returned, not treated as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistResponse {
    pub status: u16,
    pub body: String,
}

/// Trait for fetching playlist text from a URI.
///
/// Object-safe and Send + Sync so one loader can be shared by every channel task.
#[async_trait]
pub trait PlaylistLoader: Send + Sync {
    async fn load(&self, uri: &str) -> Result<PlaylistResponse, ResolveError>;
}

/// First segment URL of a playlist plus the status it was served with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSegment {
    pub segment_url: String,
    pub status: u16,
}

/// Returns the first line starting with `https://`, trimmed.
pub fn first_segment_url(body: &str) -> Option<&str> {
    body.lines()
        .find(|line| line.starts_with("https://"))
        .map(str::trim)
}

/// Fetches `playlist_url` once and extracts its first absolute segment URL.
pub async fn resolve_segment(
    loader: &dyn PlaylistLoader,
    playlist_url: &str,
) -> Result<ResolvedSegment, ResolveError> {
    let response = loader.load(playlist_url).await?;
    match first_segment_url(&response.body) {
        Some(segment) => Ok(ResolvedSegment {
            segment_url: segment.to_string(),
            status: response.status,
        }),
        None => Err(ResolveError::NoSegment {
            url: playlist_url.to_string(),
            status: response.status,
        }),
    }
}

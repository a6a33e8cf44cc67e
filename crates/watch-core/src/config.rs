use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// URL prefix under which the thumbnail directory is served.
pub const THUMBNAIL_ROUTE: &str = "/thumbnails";

/// Runtime configuration for a channel watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Consecutive stalled observations before the alarm fires (default: 3).
    pub alert_threshold: u32,
    /// Time between sweep starts (default: 10s).
    pub interval: Duration,
    /// Whether alarm transitions send mail and call the exchange endpoint.
    pub notify_enabled: bool,
    /// HTTP request timeout for playlist fetches.
    pub request_timeout: Duration,
    /// Deadline for a single ffmpeg frame capture.
    pub thumbnail_timeout: Duration,
    /// Upper bound on channels polled at once. `None` polls every channel concurrently.
    pub max_concurrent_channels: Option<usize>,
    /// Directory receiving one `<name>.jpg` per channel.
    pub thumbnail_dir: PathBuf,
    pub ffmpeg_path: String,
    /// Treat a failed resolve or thumbnail step as a stalled observation.
    pub count_failures_as_stall: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            alert_threshold: 3,
            interval: Duration::from_secs(10),
            notify_enabled: false,
            request_timeout: Duration::from_secs(10),
            thumbnail_timeout: Duration::from_secs(20),
            max_concurrent_channels: None,
            thumbnail_dir: PathBuf::from("thumbnails"),
            ffmpeg_path: "ffmpeg".to_string(),
            count_failures_as_stall: false,
        }
    }
}

impl WatchConfig {
    pub fn with_alert_threshold(mut self, threshold: u32) -> Self {
        self.alert_threshold = threshold.max(1);
        self
    }

    pub fn with_interval_secs(mut self, secs: u64) -> Self {
        self.interval = Duration::from_secs(secs.max(1));
        self
    }

    pub fn with_notify_enabled(mut self, enabled: bool) -> Self {
        self.notify_enabled = enabled;
        self
    }

    pub fn with_request_timeout_ms(mut self, ms: u64) -> Self {
        self.request_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_thumbnail_timeout_ms(mut self, ms: u64) -> Self {
        self.thumbnail_timeout = Duration::from_millis(ms);
        self
    }

    pub fn with_max_concurrent_channels(mut self, max: usize) -> Self {
        self.max_concurrent_channels = Some(max.max(1));
        self
    }

    pub fn with_thumbnail_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.thumbnail_dir = dir.into();
        self
    }

    pub fn with_ffmpeg_path(mut self, path: impl Into<String>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    pub fn with_count_failures_as_stall(mut self, enabled: bool) -> Self {
        self.count_failures_as_stall = enabled;
        self
    }

    /// Concurrency for a sweep over `channel_count` channels.
    pub fn sweep_concurrency(&self, channel_count: usize) -> usize {
        match self.max_concurrent_channels {
            Some(max) => max.min(channel_count).max(1),
            None => channel_count.max(1),
        }
    }

    /// Destination image for a channel's internal name.
    pub fn thumbnail_path(&self, name: &str) -> PathBuf {
        self.thumbnail_dir.join(format!("{}.jpg", name))
    }

    /// Served location of a channel's thumbnail, independent of `thumbnail_dir`.
    pub fn thumbnail_url(&self, name: &str) -> String {
        format!("{}/{}.jpg", THUMBNAIL_ROUTE, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = WatchConfig::default();
        assert_eq!(c.alert_threshold, 3);
        assert_eq!(c.interval, Duration::from_secs(10));
        assert!(!c.notify_enabled);
        assert!(c.max_concurrent_channels.is_none());
    }

    #[test]
    fn threshold_is_at_least_one() {
        let c = WatchConfig::default().with_alert_threshold(0);
        assert_eq!(c.alert_threshold, 1);
    }

    #[test]
    fn sweep_concurrency_unbounded_uses_channel_count() {
        let c = WatchConfig::default();
        assert_eq!(c.sweep_concurrency(12), 12);
        assert_eq!(c.sweep_concurrency(0), 1);
    }

    #[test]
    fn sweep_concurrency_respects_cap() {
        let c = WatchConfig::default().with_max_concurrent_channels(4);
        assert_eq!(c.sweep_concurrency(12), 4);
        assert_eq!(c.sweep_concurrency(2), 2);
    }

    #[test]
    fn thumbnail_path_is_named_after_channel() {
        let c = WatchConfig::default().with_thumbnail_dir("/var/thumbs");
        assert_eq!(c.thumbnail_path("news"), PathBuf::from("/var/thumbs/news.jpg"));
    }

    #[test]
    fn thumbnail_url_never_exposes_the_directory() {
        let c = WatchConfig::default().with_thumbnail_dir("/var/lib/channel-watch/thumbs");
        assert_eq!(c.thumbnail_url("news"), "/thumbnails/news.jpg");
    }
}

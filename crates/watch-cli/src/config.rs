//! TOML configuration file schema and parsing.
//!
//! Example config file:
//!
//! ```toml
//! # Either list channels inline or point at a JSON channel list.
//! registry = "channels.json"
//!
//! [server]
//! listen = "0.0.0.0:8080"
//! log_format = "json"
//!
//! [watch]
//! alert_threshold = 3
//! interval_secs = 10
//! notify = true
//! max_concurrent_channels = 16
//! thumbnail_dir = "/var/lib/channel-watch/thumbnails"
//! log_dir = "/var/log/channel-watch"
//!
//! [mail]
//! relay_host = "smtp.internal"
//! from = "channel-watch@example.com"
//! recipients = "noc@example.com, ops@example.com"
//!
//! [exchange]
//! url_template = "http://exchange.internal/api/close/{product}/{cdn_code}"
//!
//! [[channel]]
//! ch = "101"
//! chname = "News 24"
//! name = "news24"
//! url = "https://origin.example.com/news24/index.m3u8"
//! product = "ssai"
//! cdnCode = "akm"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use watch_core::notify::parse_recipients;
use watch_core::{
    load_registry, validate_registry, ChannelTarget, ExchangeConfig, MailConfig, SmtpMailer,
    WatchConfig,
};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub watch: WatchSection,

    #[serde(default)]
    pub mail: Option<MailConfig>,

    #[serde(default)]
    pub exchange: Option<ExchangeConfig>,

    /// JSON channel list, relative to the config file.
    #[serde(default)]
    pub registry: Option<PathBuf>,

    #[serde(default)]
    pub channel: Vec<ChannelTarget>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_format: default_log_format(),
        }
    }
}

pub fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_log_format() -> String {
    "pretty".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchSection {
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold: u32,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default)]
    pub notify: bool,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_thumbnail_timeout_ms")]
    pub thumbnail_timeout_ms: u64,

    #[serde(default)]
    pub max_concurrent_channels: Option<usize>,

    #[serde(default = "default_thumbnail_dir")]
    pub thumbnail_dir: PathBuf,

    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    #[serde(default)]
    pub count_failures_as_stall: bool,

    /// Per-channel log files go here; without it channel lines go to tracing only.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            alert_threshold: default_alert_threshold(),
            interval_secs: default_interval_secs(),
            notify: false,
            request_timeout_ms: default_request_timeout_ms(),
            thumbnail_timeout_ms: default_thumbnail_timeout_ms(),
            max_concurrent_channels: None,
            thumbnail_dir: default_thumbnail_dir(),
            ffmpeg_path: default_ffmpeg_path(),
            count_failures_as_stall: false,
            log_dir: None,
        }
    }
}

fn default_alert_threshold() -> u32 {
    3
}

fn default_interval_secs() -> u64 {
    10
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_thumbnail_timeout_ms() -> u64 {
    20_000
}

fn default_thumbnail_dir() -> PathBuf {
    PathBuf::from("thumbnails")
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".into()
}

impl WatchSection {
    pub fn to_watch_config(&self) -> WatchConfig {
        let mut c = WatchConfig::default()
            .with_alert_threshold(self.alert_threshold)
            .with_interval_secs(self.interval_secs)
            .with_notify_enabled(self.notify)
            .with_request_timeout_ms(self.request_timeout_ms)
            .with_thumbnail_timeout_ms(self.thumbnail_timeout_ms)
            .with_thumbnail_dir(&self.thumbnail_dir)
            .with_ffmpeg_path(&self.ffmpeg_path)
            .with_count_failures_as_stall(self.count_failures_as_stall);
        if let Some(max) = self.max_concurrent_channels {
            c = c.with_max_concurrent_channels(max);
        }
        c
    }
}

impl AppConfig {
    /// Parses and validates the file, then resolves the channel list.
    pub fn load(path: &Path) -> Result<(Self, Vec<ChannelTarget>), String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

        config.validate()?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let channels = config.channels(base)?;
        Ok((config, channels))
    }

    /// Inline `[[channel]]` entries, or the JSON registry resolved against `base`.
    pub fn channels(&self, base: &Path) -> Result<Vec<ChannelTarget>, String> {
        match &self.registry {
            Some(registry) => {
                let path = base.join(registry);
                load_registry(&path).map_err(|e| e.to_string())
            }
            None => {
                validate_registry(&self.channel).map_err(|e| e.to_string())?;
                Ok(self.channel.clone())
            }
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self.server.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(format!(
                    "Invalid log_format '{}': must be 'pretty' or 'json'",
                    other
                ));
            }
        }

        if self.watch.alert_threshold == 0 {
            return Err("alert_threshold must be at least 1".into());
        }
        if self.watch.interval_secs == 0 {
            return Err("interval_secs must be at least 1".into());
        }
        if self.watch.max_concurrent_channels == Some(0) {
            return Err("max_concurrent_channels must be at least 1".into());
        }

        if self.registry.is_some() && !self.channel.is_empty() {
            return Err("Use either 'registry' or [[channel]] entries, not both".into());
        }
        if self.registry.is_none() && self.channel.is_empty() {
            return Err("No channels configured: add [[channel]] entries or 'registry'".into());
        }

        if let Some(exchange) = &self.exchange {
            validate_exchange_template(&exchange.url_template)?;
        }

        if self.watch.notify {
            match &self.mail {
                Some(mail) => {
                    SmtpMailer::new(mail).map_err(|e| format!("Invalid [mail] section: {}", e))?;
                }
                None if self.exchange.is_none() => {
                    return Err(
                        "notify is enabled but neither [mail] nor [exchange] is configured".into(),
                    );
                }
                None => {}
            }
        } else if let Some(mail) = &self.mail {
            if parse_recipients(&mail.recipients).is_empty() {
                return Err("Invalid [mail] section: recipient list is empty".into());
            }
        }

        Ok(())
    }
}

fn validate_exchange_template(template: &str) -> Result<(), String> {
    let sample = watch_core::notify::exchange_url(template, "product", "cdn");
    let parsed = url::Url::parse(&sample)
        .map_err(|e| format!("Invalid exchange url_template '{}': {}", template, e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(format!(
            "Exchange url_template must use http or https: {}",
            template
        ));
    }
    Ok(())
}

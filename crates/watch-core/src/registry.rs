//! Static list of watched channels, loaded once at startup.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to read channel list {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("Failed to parse channel list {path}: {reason}")]
    Parse { path: String, reason: String },
    #[error("Channel list is empty")]
    Empty,
    #[error("Invalid channel '{id}': {reason}")]
    Invalid { id: String, reason: String },
    #[error("Duplicate channel {field}: {value}")]
    Duplicate { field: &'static str, value: String },
}

/// One watched channel.
///
/// Field names on the wire follow the channel list JSON format
/// (`ch`, `chname`, `url`, `product`, `cdnCode`, `name`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelTarget {
    #[serde(rename = "ch")]
    pub id: String,
    #[serde(rename = "chname")]
    pub display_name: String,
    /// Internal name; also the stem of the thumbnail and log files.
    pub name: String,
    #[serde(rename = "url")]
    pub playlist_url: String,
    pub product: String,
    #[serde(rename = "cdnCode")]
    pub cdn_code: String,
}

/// Reads and validates a JSON channel list.
pub fn load_registry(path: &Path) -> Result<Vec<ChannelTarget>, RegistryError> {
    let content = std::fs::read_to_string(path).map_err(|e| RegistryError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let channels: Vec<ChannelTarget> =
        serde_json::from_str(&content).map_err(|e| RegistryError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    validate_registry(&channels)?;
    Ok(channels)
}

pub fn validate_registry(channels: &[ChannelTarget]) -> Result<(), RegistryError> {
    if channels.is_empty() {
        return Err(RegistryError::Empty);
    }

    let mut ids = HashSet::new();
    let mut names = HashSet::new();
    for c in channels {
        if c.id.is_empty() {
            return Err(RegistryError::Invalid {
                id: c.name.clone(),
                reason: "channel id must not be empty".into(),
            });
        }
        if c.name.is_empty() || c.name.contains(['/', '\\']) || c.name.starts_with('.') {
            return Err(RegistryError::Invalid {
                id: c.id.clone(),
                reason: format!("name '{}' is not usable as a file name", c.name),
            });
        }
        let parsed = url::Url::parse(&c.playlist_url).map_err(|e| RegistryError::Invalid {
            id: c.id.clone(),
            reason: format!("invalid playlist URL {} ({})", c.playlist_url, e),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(RegistryError::Invalid {
                id: c.id.clone(),
                reason: format!("playlist URL must use http or https: {}", c.playlist_url),
            });
        }
        if !ids.insert(c.id.as_str()) {
            return Err(RegistryError::Duplicate {
                field: "id",
                value: c.id.clone(),
            });
        }
        if !names.insert(c.name.as_str()) {
            return Err(RegistryError::Duplicate {
                field: "name",
                value: c.name.clone(),
            });
        }
    }
    Ok(())
}

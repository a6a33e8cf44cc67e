use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherState {
    Idle,
    Active,
    Stopping,
    Stopped,
}

impl WatcherState {
    pub fn can_transition_to(self, target: WatcherState) -> bool {
        matches!(
            (self, target),
            (WatcherState::Idle, WatcherState::Active)
                | (WatcherState::Active, WatcherState::Stopping)
                | (WatcherState::Stopping, WatcherState::Stopped)
                | (WatcherState::Stopped, WatcherState::Active)
        )
    }
}

impl std::fmt::Display for WatcherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Active => write!(f, "active"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Latest committed observation for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    pub channel_id: String,
    pub display_name: String,
    pub name: String,
    pub playlist_url: String,
    pub thumbnail_path: String,
    /// Local time of day of the last thumbnail capture.
    pub generated_at: String,
    pub segment_url: String,
    pub last_status: u16,
    pub repeat_count: u32,
    pub alarm: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub incident_began_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_notified_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Per-channel state keyed by channel id.
///
/// Cloning shares the same underlying map. Entries live in shards, so a
/// read-decide-write on one channel only excludes channels in the same shard.
#[derive(Debug, Clone, Default)]
pub struct ChannelStateStore {
    inner: Arc<DashMap<String, ChannelState>>,
}

impl ChannelStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, channel_id: &str) -> Option<ChannelState> {
        self.inner.get(channel_id).map(|r| r.value().clone())
    }

    /// Runs `decide` on the current entry while holding its lock.
    ///
    /// `decide` returns the replacement state (or `None` to leave the entry
    /// untouched) plus a value handed back to the caller. It must not block.
    pub fn update<F, R>(&self, channel_id: &str, decide: F) -> R
    where
        F: FnOnce(Option<&ChannelState>) -> (Option<ChannelState>, R),
    {
        match self.inner.entry(channel_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let (next, out) = decide(Some(entry.get()));
                if let Some(state) = next {
                    entry.insert(state);
                }
                out
            }
            Entry::Vacant(entry) => {
                let (next, out) = decide(None);
                if let Some(state) = next {
                    entry.insert(state);
                }
                out
            }
        }
    }

    /// All committed states, sorted by channel id.
    pub fn snapshot(&self) -> Vec<ChannelState> {
        let mut states: Vec<ChannelState> =
            self.inner.iter().map(|r| r.value().clone()).collect();
        states.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        states
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;

use watch_core::{ChannelStateStore, ChannelTarget, SweepReports, Watcher};

/// Read-only view of a running watcher shared with every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: ChannelStateStore,
    pub channels: Arc<Vec<ChannelTarget>>,
    pub reports: SweepReports,
    pub thumbnail_dir: PathBuf,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            store: ChannelStateStore::new(),
            channels: Arc::new(Vec::new()),
            reports: Arc::new(RwLock::new(None)),
            thumbnail_dir: PathBuf::from("thumbnails"),
        }
    }

    /// Shares the watcher's store, sweep reports, channel list and thumbnail directory.
    pub fn from_watcher(watcher: &Watcher) -> Self {
        Self {
            store: watcher.store().clone(),
            channels: Arc::new(watcher.channels().to_vec()),
            reports: watcher.reports(),
            thumbnail_dir: watcher.config().thumbnail_dir.clone(),
        }
    }

    pub fn with_store(mut self, store: ChannelStateStore) -> Self {
        self.store = store;
        self
    }

    pub fn with_channels(mut self, channels: Vec<ChannelTarget>) -> Self {
        self.channels = Arc::new(channels);
        self
    }

    pub fn with_reports(mut self, reports: SweepReports) -> Self {
        self.reports = reports;
        self
    }

    pub fn with_thumbnail_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.thumbnail_dir = dir.into();
        self
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

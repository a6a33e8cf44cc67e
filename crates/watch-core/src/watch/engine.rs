use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::WatchConfig;
use crate::loader::{resolve_segment, PlaylistLoader};
use crate::notify::{Alarm, AlarmSender};
use crate::registry::ChannelTarget;
use crate::thumbnail::ThumbnailGenerator;

use super::channel_log::{ChannelLog, TracingChannelLog};
use super::debounce::{Debouncer, Observation};
use super::state::{ChannelStateStore, WatcherState};

/// Shared handle to the most recent sweep summary.
pub type SweepReports = Arc<RwLock<Option<SweepReport>>>;

/// A committed debouncer decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commit {
    pub stalled: bool,
    pub repeat_count: u32,
    pub alarm: bool,
    pub alarm_raised: bool,
}

/// What one channel did during a sweep.
#[derive(Debug, Clone)]
pub struct ChannelOutcome {
    pub channel_id: String,
    /// Resolve or thumbnail failure message.
    pub failure: Option<String>,
    /// `None` when the channel's state was left untouched.
    pub commit: Option<Commit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub channels: usize,
    pub committed: usize,
    pub stalled: usize,
    pub failed: usize,
    pub alarms_raised: usize,
}

impl SweepReport {
    fn from_outcomes(
        started_at: DateTime<Utc>,
        duration_ms: u64,
        outcomes: &[ChannelOutcome],
    ) -> Self {
        let commits = || outcomes.iter().filter_map(|o| o.commit);
        Self {
            started_at,
            duration_ms,
            channels: outcomes.len(),
            committed: commits().count(),
            stalled: commits().filter(|c| c.stalled).count(),
            failed: outcomes.iter().filter(|o| o.failure.is_some()).count(),
            alarms_raised: commits().filter(|c| c.alarm_raised).count(),
        }
    }
}

pub struct Watcher {
    channels: Arc<Vec<ChannelTarget>>,
    config: WatchConfig,
    debouncer: Debouncer,
    loader: Arc<dyn PlaylistLoader>,
    thumbnailer: Arc<dyn ThumbnailGenerator>,
    store: ChannelStateStore,
    state: Arc<RwLock<WatcherState>>,
    wake: Arc<Notify>,
    last_report: SweepReports,
    alarm_tx: Option<AlarmSender>,
    channel_log: Arc<dyn ChannelLog>,
}

impl Watcher {
    pub fn new(
        channels: Vec<ChannelTarget>,
        config: WatchConfig,
        loader: Arc<dyn PlaylistLoader>,
        thumbnailer: Arc<dyn ThumbnailGenerator>,
    ) -> Self {
        Self {
            channels: Arc::new(channels),
            debouncer: Debouncer::from_config(&config),
            config,
            loader,
            thumbnailer,
            store: ChannelStateStore::new(),
            state: Arc::new(RwLock::new(WatcherState::Idle)),
            wake: Arc::new(Notify::new()),
            last_report: Arc::new(RwLock::new(None)),
            alarm_tx: None,
            channel_log: Arc::new(TracingChannelLog),
        }
    }

    pub fn with_alarm_sender(mut self, tx: AlarmSender) -> Self {
        self.alarm_tx = Some(tx);
        self
    }

    pub fn with_channel_log(mut self, log: Arc<dyn ChannelLog>) -> Self {
        self.channel_log = log;
        self
    }

    pub fn with_store(mut self, store: ChannelStateStore) -> Self {
        self.store = store;
        self
    }

    pub fn channels(&self) -> &[ChannelTarget] {
        &self.channels
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    pub fn store(&self) -> &ChannelStateStore {
        &self.store
    }

    pub fn reports(&self) -> SweepReports {
        Arc::clone(&self.last_report)
    }

    pub async fn last_report(&self) -> Option<SweepReport> {
        self.last_report.read().await.clone()
    }

    pub async fn state(&self) -> WatcherState {
        *self.state.read().await
    }

    /// Spawns the sweep loop. The first sweep runs immediately.
    pub async fn start(self: &Arc<Self>) -> Result<(), String> {
        {
            let mut state = self.state.write().await;
            if *state == WatcherState::Active {
                return Ok(());
            }
            if !state.can_transition_to(WatcherState::Active) {
                return Err(format!("Cannot start watcher while {}", *state));
            }
            *state = WatcherState::Active;
        }

        info!(
            channels = self.channels.len(),
            interval_secs = self.config.interval.as_secs(),
            threshold = self.config.alert_threshold,
            notify = self.config.notify_enabled,
            "Starting watcher"
        );

        let watcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(watcher.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = watcher.wake.notified() => {}
                }

                if *watcher.state.read().await != WatcherState::Active {
                    *watcher.state.write().await = WatcherState::Stopped;
                    info!("Watcher stopped");
                    break;
                }

                debug!("Running sweep");
                let report = watcher.sweep().await;
                info!(
                    committed = report.committed,
                    stalled = report.stalled,
                    failed = report.failed,
                    alarms = report.alarms_raised,
                    duration_ms = report.duration_ms,
                    "Sweep completed"
                );
            }
        });

        Ok(())
    }

    /// Asks the loop to exit without waiting for the next tick.
    ///
    /// An in-flight sweep is not cancelled.
    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        if *state == WatcherState::Active {
            *state = WatcherState::Stopping;
            self.wake.notify_one();
            info!("Stopping watcher");
        }
    }

    /// Polls every channel once and waits for all of them.
    pub async fn sweep(&self) -> SweepReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let concurrency = self.config.sweep_concurrency(self.channels.len());

        let outcomes: Vec<ChannelOutcome> = stream::iter(self.channels.iter().cloned())
            .map(|target| async move { self.poll_channel(&target).await })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let report = SweepReport::from_outcomes(
            started_at,
            clock.elapsed().as_millis() as u64,
            &outcomes,
        );
        *self.last_report.write().await = Some(report.clone());
        report
    }

    /// Resolve, capture, then debounce one channel.
    pub async fn poll_channel(&self, target: &ChannelTarget) -> ChannelOutcome {
        let resolved = match resolve_segment(self.loader.as_ref(), &target.playlist_url).await {
            Ok(r) => r,
            Err(e) => {
                warn!(channel_id = %target.id, error = %e, "Segment resolve failed");
                let line = format!("Error fetching and extracting segment URL: {}", e);
                return self.on_failure(target, e.status_code(), line);
            }
        };

        let thumbnail_path = self.config.thumbnail_path(&target.name);
        let generated_at = match self
            .thumbnailer
            .generate(&resolved.segment_url, &thumbnail_path)
            .await
        {
            Ok(t) => t,
            Err(e) => {
                warn!(channel_id = %target.id, error = %e, "Thumbnail generation failed");
                let line = format!("Error generating thumbnail: {}", e);
                return self.on_failure(target, resolved.status, line);
            }
        };

        self.channel_log.record(
            target,
            &format!(
                "[{}][{}][{}] GenerateThumbnail {}",
                resolved.status, target.id, target.name, resolved.segment_url
            ),
        );

        let observation = Observation {
            segment_url: resolved.segment_url,
            status: resolved.status,
            thumbnail_path: self.config.thumbnail_url(&target.name),
            generated_at,
        };
        let now = Utc::now();

        let (commit, alarm) = self.store.update(&target.id, |prior| {
            let decision = self.debouncer.observe(target, prior, &observation, now);
            let commit = Commit {
                stalled: decision.stalled,
                repeat_count: decision.state.repeat_count,
                alarm: decision.state.alarm,
                alarm_raised: decision.alarm.is_some(),
            };
            (Some(decision.state), (commit, decision.alarm))
        });

        self.after_commit(target, observation.status, &commit, alarm);
        ChannelOutcome {
            channel_id: target.id.clone(),
            failure: None,
            commit: Some(commit),
        }
    }

    fn on_failure(&self, target: &ChannelTarget, status: u16, line: String) -> ChannelOutcome {
        self.channel_log.record(target, &line);

        let mut outcome = ChannelOutcome {
            channel_id: target.id.clone(),
            failure: Some(line),
            commit: None,
        };
        if !self.config.count_failures_as_stall {
            return outcome;
        }

        let now = Utc::now();
        let counted = self.store.update(&target.id, |prior| match prior {
            Some(prior) => {
                let decision = self.debouncer.observe_failure(target, prior, status, now);
                let commit = Commit {
                    stalled: true,
                    repeat_count: decision.state.repeat_count,
                    alarm: decision.state.alarm,
                    alarm_raised: decision.alarm.is_some(),
                };
                (Some(decision.state), Some((commit, decision.alarm)))
            }
            None => (None, None),
        });

        if let Some((commit, alarm)) = counted {
            self.after_commit(target, status, &commit, alarm);
            outcome.commit = Some(commit);
        }
        outcome
    }

    fn after_commit(
        &self,
        target: &ChannelTarget,
        status: u16,
        commit: &Commit,
        alarm: Option<Alarm>,
    ) {
        if commit.stalled {
            self.channel_log.record(
                target,
                &format!(
                    "httpStatusCode[{}] repeatCount: {} notify: {} alarm: {}",
                    status, commit.repeat_count, self.config.notify_enabled, commit.alarm
                ),
            );
        }

        let Some(alarm) = alarm else {
            return;
        };
        info!(
            alarm_id = %alarm.id,
            channel_id = %target.id,
            repeat_count = alarm.repeat_count,
            "Channel alarm raised"
        );
        match &self.alarm_tx {
            Some(tx) => {
                if tx.send(alarm).is_err() {
                    warn!(channel_id = %target.id, "Alarm dispatcher is gone; alarm dropped");
                }
            }
            None => debug!(channel_id = %target.id, "No alarm dispatcher attached"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(failure: bool, commit: Option<(bool, bool)>) -> ChannelOutcome {
        ChannelOutcome {
            channel_id: "1".into(),
            failure: failure.then(|| "boom".to_string()),
            commit: commit.map(|(stalled, raised)| Commit {
                stalled,
                repeat_count: if stalled { 1 } else { 0 },
                alarm: raised,
                alarm_raised: raised,
            }),
        }
    }

    #[test]
    fn report_counts_outcomes() {
        let outcomes = vec![
            outcome(false, Some((false, false))),
            outcome(false, Some((true, false))),
            outcome(false, Some((true, true))),
            outcome(true, None),
            outcome(true, Some((true, false))),
        ];
        let r = SweepReport::from_outcomes(Utc::now(), 12, &outcomes);
        assert_eq!(r.channels, 5);
        assert_eq!(r.committed, 4);
        assert_eq!(r.stalled, 3);
        assert_eq!(r.failed, 2);
        assert_eq!(r.alarms_raised, 1);
        assert_eq!(r.duration_ms, 12);
    }
}

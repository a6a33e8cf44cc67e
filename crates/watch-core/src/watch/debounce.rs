//! Stall detection and alert debouncing.
//!
//! A channel is stalled when it serves the same first segment as last time, or
//! when its playlist answers with a 4xx/5xx status. Consecutive stalled
//! observations advance a counter; the alarm latches once the counter reaches
//! the threshold and only rearms when a fresh segment is served with a healthy
//! status.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::WatchConfig;
use crate::notify::Alarm;
use crate::registry::ChannelTarget;

use super::state::ChannelState;

/// Counter value at which the incident clock starts.
pub const INCIDENT_START_COUNT: u32 = 2;

pub fn is_error_status(status: u16) -> bool {
    (400..=599).contains(&status)
}

/// A completed resolve + thumbnail step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub segment_url: String,
    pub status: u16,
    pub thumbnail_path: String,
    pub generated_at: String,
}

/// Result of debouncing one observation. `state` replaces the stored entry.
#[derive(Debug, Clone)]
pub struct Decision {
    pub state: ChannelState,
    pub stalled: bool,
    /// Set only on the transition into alarm, and only when notifications are enabled.
    pub alarm: Option<Alarm>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Progress {
    repeat_count: u32,
    alarm: bool,
    incident_began_at: Option<DateTime<Utc>>,
    last_notified_at: Option<DateTime<Utc>>,
}

impl Progress {
    fn of(prior: Option<&ChannelState>) -> Self {
        prior
            .map(|p| Progress {
                repeat_count: p.repeat_count,
                alarm: p.alarm,
                incident_began_at: p.incident_began_at,
                last_notified_at: p.last_notified_at,
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Debouncer {
    threshold: u32,
    notify_enabled: bool,
}

impl Debouncer {
    pub fn new(threshold: u32, notify_enabled: bool) -> Self {
        Self {
            threshold: threshold.max(1),
            notify_enabled,
        }
    }

    pub fn from_config(config: &WatchConfig) -> Self {
        Self::new(config.alert_threshold, config.notify_enabled)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Debounces a successful observation against the prior state (if any).
    pub fn observe(
        &self,
        target: &ChannelTarget,
        prior: Option<&ChannelState>,
        obs: &Observation,
        now: DateTime<Utc>,
    ) -> Decision {
        let repeated = prior.is_some_and(|p| p.segment_url == obs.segment_url);
        let stalled = repeated || is_error_status(obs.status);
        let (progress, alarm) = self.advance(target, Progress::of(prior), stalled, obs.status, now);

        Decision {
            state: ChannelState {
                channel_id: target.id.clone(),
                display_name: target.display_name.clone(),
                name: target.name.clone(),
                playlist_url: target.playlist_url.clone(),
                thumbnail_path: obs.thumbnail_path.clone(),
                generated_at: obs.generated_at.clone(),
                segment_url: obs.segment_url.clone(),
                last_status: obs.status,
                repeat_count: progress.repeat_count,
                alarm: progress.alarm,
                incident_began_at: progress.incident_began_at,
                last_notified_at: progress.last_notified_at,
                updated_at: now,
            },
            stalled,
            alarm,
        }
    }

    /// Counts a failed resolve or thumbnail step as a stalled observation.
    ///
    /// Segment and thumbnail fields are carried over from `prior`.
    pub fn observe_failure(
        &self,
        target: &ChannelTarget,
        prior: &ChannelState,
        status: u16,
        now: DateTime<Utc>,
    ) -> Decision {
        let (progress, alarm) = self.advance(target, Progress::of(Some(prior)), true, status, now);
        let mut state = prior.clone();
        state.last_status = status;
        state.repeat_count = progress.repeat_count;
        state.alarm = progress.alarm;
        state.incident_began_at = progress.incident_began_at;
        state.last_notified_at = progress.last_notified_at;
        state.updated_at = now;
        Decision {
            state,
            stalled: true,
            alarm,
        }
    }

    fn advance(
        &self,
        target: &ChannelTarget,
        prior: Progress,
        stalled: bool,
        status: u16,
        now: DateTime<Utc>,
    ) -> (Progress, Option<Alarm>) {
        let mut next = prior;
        if stalled {
            next.repeat_count = prior.repeat_count.saturating_add(1);
            if next.repeat_count == INCIDENT_START_COUNT {
                next.incident_began_at = Some(now);
            }
        } else {
            next.repeat_count = 0;
            next.alarm = false;
            next.incident_began_at = None;
        }

        let mut raised = None;
        if next.repeat_count >= self.threshold && !next.alarm {
            next.alarm = true;
            if self.notify_enabled {
                next.last_notified_at = Some(now);
                raised = Some(Alarm {
                    id: Uuid::new_v4(),
                    channel: target.clone(),
                    repeat_count: next.repeat_count,
                    status,
                    incident_began_at: next.incident_began_at.unwrap_or(now),
                    notified_at: now,
                });
            }
        }
        (next, raised)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn target() -> ChannelTarget {
        ChannelTarget {
            id: "101".into(),
            display_name: "News 24".into(),
            name: "news24".into(),
            playlist_url: "https://origin.example.com/news24/index.m3u8".into(),
            product: "ssai".into(),
            cdn_code: "akm".into(),
        }
    }

    fn obs(url: &str, status: u16) -> Observation {
        Observation {
            segment_url: url.into(),
            status,
            thumbnail_path: "thumbnails/news24.jpg".into(),
            generated_at: "10:00:00".into(),
        }
    }

    /// Feeds observations through the debouncer, returning every decision.
    fn run(debouncer: Debouncer, seq: &[(&str, u16)]) -> Vec<Decision> {
        let t0 = Utc::now();
        let mut prior: Option<ChannelState> = None;
        let mut out = Vec::new();
        for (i, (url, status)) in seq.iter().enumerate() {
            let d = debouncer.observe(
                &target(),
                prior.as_ref(),
                &obs(url, *status),
                t0 + Duration::seconds(10 * i as i64),
            );
            prior = Some(d.state.clone());
            out.push(d);
        }
        out
    }

    #[test]
    fn first_healthy_observation_starts_at_zero() {
        let d = run(Debouncer::new(3, true), &[("https://cdn/x.ts", 200)]);
        assert!(!d[0].stalled);
        assert_eq!(d[0].state.repeat_count, 0);
        assert!(!d[0].state.alarm);
    }

    #[test]
    fn first_observation_with_error_status_counts() {
        let d = run(Debouncer::new(3, true), &[("https://cdn/x.ts", 503)]);
        assert!(d[0].stalled);
        assert_eq!(d[0].state.repeat_count, 1);
    }

    #[test]
    fn repeated_url_increments_by_one() {
        let d = run(
            Debouncer::new(10, true),
            &[
                ("https://cdn/x.ts", 200),
                ("https://cdn/x.ts", 200),
                ("https://cdn/x.ts", 200),
                ("https://cdn/x.ts", 200),
            ],
        );
        let counts: Vec<u32> = d.iter().map(|d| d.state.repeat_count).collect();
        assert_eq!(counts, vec![0, 1, 2, 3]);
    }

    #[test]
    fn error_status_increments_regardless_of_url() {
        let d = run(
            Debouncer::new(10, true),
            &[
                ("https://cdn/a.ts", 200),
                ("https://cdn/b.ts", 404),
                ("https://cdn/c.ts", 500),
                ("https://cdn/d.ts", 599),
            ],
        );
        let counts: Vec<u32> = d.iter().map(|d| d.state.repeat_count).collect();
        assert_eq!(counts, vec![0, 1, 2, 3]);
    }

    #[test]
    fn status_boundaries() {
        assert!(!is_error_status(399));
        assert!(is_error_status(400));
        assert!(is_error_status(599));
        assert!(!is_error_status(600));
        assert!(!is_error_status(0));
    }

    #[test]
    fn alarm_fires_once_on_threshold() {
        // threshold 3: counters 1, 2, 3; alarm on the third observation, one notification.
        let d = run(
            Debouncer::new(3, true),
            &[
                ("https://cdn/x.ts", 200),
                ("https://cdn/x.ts", 200),
                ("https://cdn/x.ts", 200),
                ("https://cdn/x.ts", 200),
            ],
        );
        let counts: Vec<u32> = d[1..].iter().map(|d| d.state.repeat_count).collect();
        assert_eq!(counts, vec![1, 2, 3]);
        assert!(!d[1].state.alarm);
        assert!(!d[2].state.alarm);
        assert!(d[3].state.alarm);
        let alarms: Vec<&Alarm> = d.iter().filter_map(|d| d.alarm.as_ref()).collect();
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].repeat_count, 3);
        assert_eq!(alarms[0].channel.cdn_code, "akm");
    }

    #[test]
    fn alarm_stays_latched_without_renotifying() {
        let seq = vec![("https://cdn/x.ts", 200); 8];
        let d = run(Debouncer::new(3, true), &seq);
        assert!(d[3..].iter().all(|d| d.state.alarm));
        assert_eq!(d.iter().filter(|d| d.alarm.is_some()).count(), 1);
        assert_eq!(d.last().unwrap().state.repeat_count, 7);
    }

    #[test]
    fn fresh_healthy_segment_resets_and_rearms() {
        let d = run(
            Debouncer::new(3, true),
            &[
                ("https://cdn/x.ts", 200),
                ("https://cdn/x.ts", 200),
                ("https://cdn/x.ts", 200),
                ("https://cdn/x.ts", 200),
                ("https://cdn/y.ts", 200),
            ],
        );
        let last = &d[4].state;
        assert!(!d[4].stalled);
        assert_eq!(last.repeat_count, 0);
        assert!(!last.alarm);
        assert!(last.incident_began_at.is_none());
        assert!(last.last_notified_at.is_some());
    }

    #[test]
    fn error_then_fresh_healthy_segment_resets() {
        let d = run(
            Debouncer::new(3, true),
            &[("https://cdn/x.ts", 500), ("https://cdn/y.ts", 200)],
        );
        assert_eq!(d[0].state.repeat_count, 1);
        assert_eq!(d[1].state.repeat_count, 0);
        assert!(!d[1].state.alarm);
    }

    #[test]
    fn rearmed_alarm_fires_again_on_next_incident() {
        let mut seq = vec![("https://cdn/x.ts", 200); 4];
        seq.push(("https://cdn/y.ts", 200));
        seq.extend(vec![("https://cdn/y.ts", 200); 3]);
        let d = run(Debouncer::new(3, true), &seq);
        assert_eq!(d.iter().filter(|d| d.alarm.is_some()).count(), 2);
    }

    #[test]
    fn alarm_never_set_below_threshold() {
        let seq = vec![("https://cdn/x.ts", 200); 5];
        let d = run(Debouncer::new(6, true), &seq);
        assert!(d.iter().all(|d| !d.state.alarm && d.alarm.is_none()));
    }

    #[test]
    fn incident_clock_starts_at_second_strike() {
        let d = run(
            Debouncer::new(3, true),
            &[
                ("https://cdn/x.ts", 200),
                ("https://cdn/x.ts", 200),
                ("https://cdn/x.ts", 200),
                ("https://cdn/x.ts", 200),
            ],
        );
        assert!(d[1].state.incident_began_at.is_none());
        let began = d[2].state.incident_began_at.unwrap();
        assert_eq!(d[3].state.incident_began_at, Some(began));
        let alarm = d[3].alarm.as_ref().unwrap();
        assert_eq!(alarm.incident_began_at, began);
        assert_eq!(alarm.notified_at, d[3].state.updated_at);
        assert_eq!(d[3].state.last_notified_at, Some(alarm.notified_at));
        assert!(alarm.notified_at > began);
    }

    #[test]
    fn threshold_one_uses_notify_time_as_incident_start() {
        let d = run(
            Debouncer::new(1, true),
            &[("https://cdn/x.ts", 200), ("https://cdn/x.ts", 200)],
        );
        let alarm = d[1].alarm.as_ref().unwrap();
        assert_eq!(alarm.incident_began_at, alarm.notified_at);
    }

    #[test]
    fn disabled_notifications_still_latch_alarm() {
        let seq = vec![("https://cdn/x.ts", 200); 5];
        let d = run(Debouncer::new(3, false), &seq);
        assert!(d[3].state.alarm);
        assert!(d.iter().all(|d| d.alarm.is_none()));
        assert!(d.iter().all(|d| d.state.last_notified_at.is_none()));
    }

    #[test]
    fn alarm_implies_threshold_reached() {
        let seq = [
            ("https://cdn/a.ts", 200),
            ("https://cdn/a.ts", 200),
            ("https://cdn/b.ts", 502),
            ("https://cdn/b.ts", 200),
            ("https://cdn/c.ts", 200),
            ("https://cdn/c.ts", 404),
            ("https://cdn/c.ts", 200),
        ];
        for d in run(Debouncer::new(2, true), &seq) {
            if d.state.alarm {
                assert!(d.state.repeat_count >= 2);
            }
        }
    }

    #[test]
    fn failure_observation_advances_and_keeps_segment() {
        let debouncer = Debouncer::new(2, true);
        let now = Utc::now();
        let first = debouncer.observe(&target(), None, &obs("https://cdn/x.ts", 200), now);
        let failed =
            debouncer.observe_failure(&target(), &first.state, 0, now + Duration::seconds(10));
        assert!(failed.stalled);
        assert_eq!(failed.state.repeat_count, 1);
        assert_eq!(failed.state.segment_url, "https://cdn/x.ts");
        assert_eq!(failed.state.last_status, 0);
        let again =
            debouncer.observe_failure(&target(), &failed.state, 0, now + Duration::seconds(20));
        assert!(again.state.alarm);
        assert!(again.alarm.is_some());
    }
}

use std::fmt::Write;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use watch_core::{ChannelState, SweepReport};

use crate::error::ApiError;
use crate::state::AppState;

const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

pub async fn metrics_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let snapshot = state.store.snapshot();
    let report = state.reports.read().await.clone();

    let out = render(state.channels.len(), &snapshot, report.as_ref())
        .map_err(|e| ApiError::Internal(format!("Failed to render metrics: {}", e)))?;

    Ok(([(header::CONTENT_TYPE, CONTENT_TYPE)], out))
}

fn render(
    configured: usize,
    snapshot: &[ChannelState],
    report: Option<&SweepReport>,
) -> Result<String, std::fmt::Error> {
    let mut out = String::with_capacity(1024 + snapshot.len() * 256);

    writeln!(out, "# TYPE channel_watch_channels gauge")?;
    writeln!(out, "# HELP channel_watch_channels Number of channels in the registry")?;
    writeln!(out, "channel_watch_channels {}", configured)?;

    writeln!(out, "# TYPE channel_watch_channels_tracked gauge")?;
    writeln!(
        out,
        "# HELP channel_watch_channels_tracked Channels with at least one committed observation"
    )?;
    writeln!(out, "channel_watch_channels_tracked {}", snapshot.len())?;

    writeln!(out, "# TYPE channel_watch_repeat_count gauge")?;
    writeln!(
        out,
        "# HELP channel_watch_repeat_count Consecutive stalled observations per channel"
    )?;
    for s in snapshot {
        writeln!(
            out,
            "channel_watch_repeat_count{{channel_id=\"{}\",name=\"{}\"}} {}",
            s.channel_id, s.name, s.repeat_count
        )?;
    }

    writeln!(out, "# TYPE channel_watch_alarm gauge")?;
    writeln!(out, "# HELP channel_watch_alarm 1 while the channel alarm is latched")?;
    for s in snapshot {
        writeln!(
            out,
            "channel_watch_alarm{{channel_id=\"{}\",name=\"{}\"}} {}",
            s.channel_id,
            s.name,
            u8::from(s.alarm)
        )?;
    }

    writeln!(out, "# TYPE channel_watch_last_status gauge")?;
    writeln!(
        out,
        "# HELP channel_watch_last_status HTTP status of the last playlist fetch (0 when the fetch failed)"
    )?;
    for s in snapshot {
        writeln!(
            out,
            "channel_watch_last_status{{channel_id=\"{}\"}} {}",
            s.channel_id, s.last_status
        )?;
    }

    if let Some(r) = report {
        let finished = r.started_at.timestamp() as f64
            + (r.started_at.timestamp_subsec_millis() as f64 / 1000.0)
            + (r.duration_ms as f64 / 1000.0);

        writeln!(out, "# TYPE channel_watch_last_sweep_timestamp_seconds gauge")?;
        writeln!(
            out,
            "# HELP channel_watch_last_sweep_timestamp_seconds Unix timestamp at which the last sweep finished"
        )?;
        writeln!(out, "channel_watch_last_sweep_timestamp_seconds {:.3}", finished)?;

        writeln!(out, "# TYPE channel_watch_last_sweep_duration_seconds gauge")?;
        writeln!(
            out,
            "# HELP channel_watch_last_sweep_duration_seconds Wall time of the last sweep"
        )?;
        writeln!(
            out,
            "channel_watch_last_sweep_duration_seconds {:.3}",
            r.duration_ms as f64 / 1000.0
        )?;

        writeln!(out, "# TYPE channel_watch_last_sweep_failed gauge")?;
        writeln!(
            out,
            "# HELP channel_watch_last_sweep_failed Channels whose resolve or thumbnail step failed in the last sweep"
        )?;
        writeln!(out, "channel_watch_last_sweep_failed {}", r.failed)?;
    }

    writeln!(out, "# EOF")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn state(id: &str, repeat_count: u32, alarm: bool) -> ChannelState {
        ChannelState {
            channel_id: id.into(),
            display_name: format!("Channel {}", id),
            name: format!("ch{}", id),
            playlist_url: format!("https://origin/{}.m3u8", id),
            thumbnail_path: format!("/thumbnails/ch{}.jpg", id),
            generated_at: "10:00:00".into(),
            segment_url: "https://cdn/seg/1.ts".into(),
            last_status: 200,
            repeat_count,
            alarm,
            incident_began_at: None,
            last_notified_at: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn renders_per_channel_gauges() {
        let out = render(3, &[state("1", 0, false), state("2", 4, true)], None).unwrap();
        assert!(out.contains("channel_watch_channels 3\n"));
        assert!(out.contains("channel_watch_channels_tracked 2\n"));
        assert!(out.contains("channel_watch_repeat_count{channel_id=\"2\",name=\"ch2\"} 4"));
        assert!(out.contains("channel_watch_alarm{channel_id=\"2\",name=\"ch2\"} 1"));
        assert!(out.contains("channel_watch_alarm{channel_id=\"1\",name=\"ch1\"} 0"));
        assert!(!out.contains("last_sweep"));
        assert!(out.ends_with("# EOF\n"));
    }

    #[test]
    fn renders_last_sweep() {
        let report = SweepReport {
            started_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            duration_ms: 1500,
            channels: 2,
            committed: 1,
            stalled: 0,
            failed: 1,
            alarms_raised: 0,
        };
        let out = render(2, &[], Some(&report)).unwrap();
        let finished = report.started_at.timestamp() as f64 + 1.5;
        assert!(out.contains(&format!(
            "channel_watch_last_sweep_timestamp_seconds {:.3}",
            finished
        )));
        assert!(out.contains("channel_watch_last_sweep_duration_seconds 1.500"));
        assert!(out.contains("channel_watch_last_sweep_failed 1"));
    }
}

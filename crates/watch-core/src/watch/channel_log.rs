//! Per-channel poll log sinks.

use std::io::Write;
use std::path::PathBuf;

use chrono::Local;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{info, warn};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::registry::ChannelTarget;

/// Receives one line per channel per poll event.
pub trait ChannelLog: Send + Sync {
    fn record(&self, channel: &ChannelTarget, line: &str);
}

/// Emits channel lines as structured tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingChannelLog;

impl ChannelLog for TracingChannelLog {
    fn record(&self, channel: &ChannelTarget, line: &str) {
        info!(channel_id = %channel.id, channel = %channel.name, "{}", line);
    }
}

struct ChannelWriter {
    writer: NonBlocking,
    _guard: WorkerGuard,
}

/// Appends timestamped lines to `<dir>/<name>.log`, one file per channel.
///
/// Each file has its own background writer thread, so recording never blocks
/// on disk I/O. Pending lines are flushed when the log is dropped.
pub struct FileChannelLog {
    dir: PathBuf,
    writers: DashMap<String, ChannelWriter>,
}

impl FileChannelLog {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            writers: DashMap::new(),
        })
    }

    pub fn path_for(&self, channel: &ChannelTarget) -> PathBuf {
        self.dir.join(format!("{}.log", channel.name))
    }

    fn writer(&self, channel: &ChannelTarget) -> Option<NonBlocking> {
        if let Some(w) = self.writers.get(&channel.name) {
            return Some(w.writer.clone());
        }

        match self.writers.entry(channel.name.clone()) {
            Entry::Occupied(e) => Some(e.get().writer.clone()),
            Entry::Vacant(v) => {
                let appender = RollingFileAppender::builder()
                    .rotation(Rotation::NEVER)
                    .filename_prefix(&channel.name)
                    .filename_suffix("log")
                    .build(&self.dir);
                match appender {
                    Ok(appender) => {
                        let (writer, guard) = tracing_appender::non_blocking(appender);
                        v.insert(ChannelWriter {
                            writer: writer.clone(),
                            _guard: guard,
                        });
                        Some(writer)
                    }
                    Err(e) => {
                        warn!(
                            path = %self.path_for(channel).display(),
                            error = %e,
                            "Failed to open channel log"
                        );
                        None
                    }
                }
            }
        }
    }
}

impl ChannelLog for FileChannelLog {
    fn record(&self, channel: &ChannelTarget, line: &str) {
        let Some(mut writer) = self.writer(channel) else {
            return;
        };
        let stamp = Local::now().format("%Y/%m/%d %H:%M:%S");
        if let Err(e) = writer.write_all(format!("{} {}\n", stamp, line).as_bytes()) {
            warn!(channel = %channel.name, error = %e, "Failed to write channel log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(name: &str) -> ChannelTarget {
        ChannelTarget {
            id: "1".into(),
            display_name: "One".into(),
            name: name.into(),
            playlist_url: "https://origin/1.m3u8".into(),
            product: "p".into(),
            cdn_code: "c".into(),
        }
    }

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("channel-log-{}-{}", tag, uuid::Uuid::new_v4()))
    }

    #[test]
    fn appends_lines_per_channel() {
        let dir = temp_dir("append");
        let log = FileChannelLog::new(&dir).unwrap();
        log.record(&channel("news"), "first");
        log.record(&channel("news"), "second");
        log.record(&channel("sports"), "other");
        drop(log);

        let news = std::fs::read_to_string(dir.join("news.log")).unwrap();
        let lines: Vec<&str> = news.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" first"));
        assert!(lines[1].ends_with(" second"));
        assert!(dir.join("sports.log").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn reopening_keeps_previous_lines() {
        let dir = temp_dir("reopen");
        FileChannelLog::new(&dir).unwrap().record(&channel("news"), "before");
        FileChannelLog::new(&dir).unwrap().record(&channel("news"), "after");

        let news = std::fs::read_to_string(dir.join("news.log")).unwrap();
        assert_eq!(news.lines().count(), 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn channels_write_independently_from_many_threads() {
        let dir = temp_dir("threads");
        let log = FileChannelLog::new(&dir).unwrap();

        std::thread::scope(|s| {
            for t in 0..8 {
                let log = &log;
                s.spawn(move || {
                    let ch = channel(&format!("ch{}", t % 4));
                    for i in 0..50 {
                        log.record(&ch, &format!("thread {} line {}", t, i));
                    }
                });
            }
        });
        assert_eq!(log.writers.len(), 4);
        drop(log);

        for c in 0..4 {
            let text = std::fs::read_to_string(dir.join(format!("ch{}.log", c))).unwrap();
            assert_eq!(text.lines().count(), 100, "ch{}", c);
        }

        std::fs::remove_dir_all(&dir).ok();
    }
}

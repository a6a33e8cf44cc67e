#![forbid(unsafe_code)]

pub mod config;
pub mod loader;
pub mod notify;
pub mod registry;
pub mod thumbnail;
pub mod watch;

pub use config::WatchConfig;
pub use loader::{
    first_segment_url, resolve_segment, HttpLoader, PlaylistLoader, PlaylistResponse,
    ResolveError, ResolvedSegment,
};
pub use notify::{
    alarm_channel, Alarm, AlarmDispatcher, AlarmSender, ExchangeConfig, FailoverClient,
    HttpFailover, MailConfig, Mailer, NotifyError, SmtpMailer,
};
pub use registry::{load_registry, validate_registry, ChannelTarget, RegistryError};
pub use thumbnail::{FfmpegThumbnailer, ThumbnailError, ThumbnailGenerator};
pub use watch::{
    ChannelLog, ChannelOutcome, ChannelState, ChannelStateStore, Debouncer, FileChannelLog,
    SweepReport, SweepReports, TracingChannelLog, Watcher, WatcherState,
};

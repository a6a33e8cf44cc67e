pub mod channel_log;
pub mod debounce;
pub mod engine;
pub mod state;

pub use channel_log::{ChannelLog, FileChannelLog, TracingChannelLog};
pub use debounce::{is_error_status, Debouncer, Decision, Observation};
pub use engine::{ChannelOutcome, Commit, SweepReport, SweepReports, Watcher};
pub use state::{ChannelState, ChannelStateStore, WatcherState};

mod config;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing_subscriber::{fmt, EnvFilter};

use watch_core::{
    alarm_channel, AlarmDispatcher, ChannelLog, ChannelState, ChannelTarget, FfmpegThumbnailer,
    FileChannelLog, HttpFailover, HttpLoader, PlaylistLoader, SmtpMailer, SweepReport,
    TracingChannelLog, WatchConfig, Watcher,
};

use crate::config::AppConfig;

/// Channel stall watcher: detect frozen live playlists, alert and fail over.
#[derive(Parser)]
#[command(name = "channel-watch", version = env!("CHANNEL_WATCH_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sweep loop and the HTTP API.
    Serve {
        /// Listen address (e.g. 0.0.0.0:8080). Overrides config file.
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Path to TOML config file.
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run sweeps with a live terminal table (no API server).
    Watch {
        /// Path to TOML config file.
        #[arg(short, long)]
        config: PathBuf,

        /// Sweep interval in seconds. Overrides config file.
        #[arg(short, long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { listen, config } => run_serve(listen, &config).await,
        Commands::Watch { config, interval } => run_watch(&config, interval).await,
    }
}

/// Loads the config or logs the error and exits 1. Tracing is initialised here.
fn load_config(path: &Path, default_filter: &str) -> (AppConfig, Vec<ChannelTarget>) {
    match AppConfig::load(path) {
        Ok((c, channels)) => {
            init_tracing(&c.server.log_format, default_filter);
            tracing::info!(path = %path.display(), channels = channels.len(), "Loaded config file");
            (c, channels)
        }
        Err(e) => {
            init_tracing("pretty", default_filter);
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    }
}

struct Pipeline {
    watcher: Arc<Watcher>,
    dispatcher: Option<JoinHandle<()>>,
}

/// Wires loader, thumbnailer, channel log and (when enabled) the alarm dispatcher.
fn build_pipeline(
    app: &AppConfig,
    channels: Vec<ChannelTarget>,
    watch: WatchConfig,
) -> Result<Pipeline, String> {
    let client = HttpLoader::build_client(watch.request_timeout)
        .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
    let loader: Arc<dyn PlaylistLoader> = Arc::new(HttpLoader::with_client(client.clone()));
    let thumbnailer = Arc::new(FfmpegThumbnailer::from_config(&watch));

    std::fs::create_dir_all(&watch.thumbnail_dir).map_err(|e| {
        format!(
            "Failed to create thumbnail directory {}: {}",
            watch.thumbnail_dir.display(),
            e
        )
    })?;

    let channel_log: Arc<dyn ChannelLog> = match &app.watch.log_dir {
        Some(dir) => Arc::new(FileChannelLog::new(dir).map_err(|e| {
            format!("Failed to create log directory {}: {}", dir.display(), e)
        })?),
        None => Arc::new(TracingChannelLog),
    };

    let notify_enabled = watch.notify_enabled;
    let mut watcher = Watcher::new(channels, watch, Arc::clone(&loader), thumbnailer)
        .with_channel_log(Arc::clone(&channel_log));

    let dispatcher = if notify_enabled {
        let (tx, rx) = alarm_channel();
        let mut dispatcher = AlarmDispatcher::new(rx, loader).with_channel_log(channel_log);
        if let Some(mail) = &app.mail {
            let mailer = SmtpMailer::new(mail).map_err(|e| e.to_string())?;
            tracing::info!(
                relay = %format!("{}:{}", mail.relay_host, mail.relay_port),
                recipients = mailer.recipients().len(),
                "Alert mail enabled"
            );
            dispatcher = dispatcher.with_mailer(Arc::new(mailer));
        }
        if let Some(exchange) = &app.exchange {
            tracing::info!(template = %exchange.url_template, "Failover exchange enabled");
            dispatcher = dispatcher.with_failover(Arc::new(HttpFailover::new(client, exchange)));
        }
        watcher = watcher.with_alarm_sender(tx);
        Some(tokio::spawn(dispatcher.run()))
    } else {
        tracing::info!("Notifications disabled; alarms are only latched");
        None
    };

    Ok(Pipeline {
        watcher: Arc::new(watcher),
        dispatcher,
    })
}

/// Drops the last sender and gives queued alarms a bounded time to go out.
async fn drain_dispatcher(watcher: Arc<Watcher>, dispatcher: Option<JoinHandle<()>>) {
    drop(watcher);
    if let Some(handle) = dispatcher {
        if join_dispatcher(handle, Duration::from_secs(5)).await {
            tracing::info!("Alarm dispatcher shut down");
        }
    }
}

/// Waits up to `grace` for the dispatcher task, aborting it afterwards.
/// Returns whether it finished on its own.
async fn join_dispatcher(mut handle: JoinHandle<()>, grace: Duration) -> bool {
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(_) => true,
        Err(_) => {
            handle.abort();
            tracing::warn!("Alarm dispatcher did not shut down in time, aborting");
            false
        }
    }
}

async fn run_serve(listen_override: Option<SocketAddr>, config_path: &Path) {
    let (app_config, channels) = load_config(config_path, "info");
    let listen = listen_override.unwrap_or(app_config.server.listen);
    let watch = app_config.watch.to_watch_config();

    let Pipeline {
        watcher,
        dispatcher,
    } = match build_pipeline(&app_config, channels, watch) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let state = watch_api::state::AppState::from_watcher(&watcher);

    if let Err(e) = watcher.start().await {
        tracing::error!(error = %e, "Failed to start watcher");
        std::process::exit(1);
    }

    tracing::info!(%listen, "Starting channel watch API server");
    if let Err(e) = watch_api::serve_with_state(listen, state, watch_api::shutdown_signal()).await {
        tracing::error!(error = %e, "Server failed");
        watcher.stop().await;
        std::process::exit(1);
    }

    tracing::info!("Shutdown signal received, stopping watcher...");
    watcher.stop().await;
    drain_dispatcher(watcher, dispatcher).await;
    tracing::info!("Shutdown complete");
}

async fn run_watch(config_path: &Path, interval_override: Option<u64>) {
    let (app_config, channels) = load_config(config_path, "warn");
    let mut watch = app_config.watch.to_watch_config();
    if let Some(secs) = interval_override {
        watch = watch.with_interval_secs(secs);
    }
    let interval = watch.interval;
    let threshold = watch.alert_threshold;
    let notify = watch.notify_enabled;

    let Pipeline {
        watcher,
        dispatcher,
    } = match build_pipeline(&app_config, channels, watch) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let multi = MultiProgress::new();
    multi
        .println(format!(
            "{} {}",
            style("channel-watch").bold(),
            style(env!("CARGO_PKG_VERSION")).dim()
        ))
        .ok();
    multi
        .println(format!(
            "  {} {}",
            style("channels: ").dim(),
            style(watcher.channels().len()).bold()
        ))
        .ok();
    multi
        .println(format!("  {} {}s", style("interval: ").dim(), interval.as_secs()))
        .ok();
    multi
        .println(format!("  {} {}", style("threshold:").dim(), threshold))
        .ok();
    multi
        .println(format!("  {} {}", style("notify:   ").dim(), notify))
        .ok();
    multi.println("").ok();
    multi
        .println(format!("{}", style("Press Ctrl+C to stop").dim()))
        .ok();
    multi.println("").ok();

    let status_bar = match ProgressStyle::with_template("{wide_msg}") {
        Ok(s) => multi.add(ProgressBar::new_spinner().with_style(s)),
        Err(_) => multi.add(ProgressBar::new_spinner()),
    };
    status_bar.set_message(format!(
        "{}\n  {}",
        format_separator(0),
        style("Waiting for first sweep...").dim()
    ));

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sweep_num = 0u64;
    let mut alarmed: HashSet<String> = HashSet::new();

    let shutdown = watch_api::shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let report = tokio::select! {
            _ = &mut shutdown => break,
            report = async {
                ticker.tick().await;
                watcher.sweep().await
            } => report,
        };
        sweep_num += 1;

        let snapshot = watcher.store().snapshot();
        for s in &snapshot {
            if s.alarm && alarmed.insert(s.channel_id.clone()) {
                multi
                    .println(format!(
                        "  {}  {} [{}] {} repeat={} status={}",
                        style(s.updated_at.with_timezone(&chrono::Local).format("%H:%M:%S")).dim(),
                        style("ALARM").red().bold(),
                        s.channel_id,
                        s.display_name,
                        s.repeat_count,
                        s.last_status
                    ))
                    .ok();
            } else if !s.alarm && alarmed.remove(&s.channel_id) {
                multi
                    .println(format!(
                        "  {}  {} [{}] {}",
                        style(s.updated_at.with_timezone(&chrono::Local).format("%H:%M:%S")).dim(),
                        style("CLEAR").green().bold(),
                        s.channel_id,
                        s.display_name
                    ))
                    .ok();
            }
        }

        status_bar.set_message(render_table(sweep_num, &report, &snapshot));
    }

    status_bar.finish_and_clear();
    multi
        .println(format!("\n{}", style("Watcher stopped.").dim()))
        .ok();
    drain_dispatcher(watcher, dispatcher).await;
}

fn render_table(sweep_num: u64, report: &SweepReport, snapshot: &[ChannelState]) -> String {
    let mut lines = vec![format_separator(sweep_num)];
    lines.push(format!(
        "  {}",
        style(format!(
            "{} committed, {} stalled, {} failed, {}ms",
            report.committed, report.stalled, report.failed, report.duration_ms
        ))
        .dim()
    ));

    if snapshot.is_empty() {
        lines.push(format!("  {}", style("No channel has been polled yet").dim()));
    }
    for s in snapshot {
        let status = if s.last_status == 200 {
            style(format!("{:<4}", s.last_status)).green()
        } else {
            style(format!("{:<4}", s.last_status)).red()
        };
        let badge = if s.alarm {
            format!("  {}", style("ALARM").red().bold())
        } else if s.repeat_count > 0 {
            format!("  {}", style("STALL").yellow().bold())
        } else {
            String::new()
        };
        lines.push(format!(
            "  {:<8} {:<20} {} repeat={:<3} thumb={}  {}{}",
            s.channel_id,
            s.display_name,
            status,
            s.repeat_count,
            s.generated_at,
            style(segment_tail(&s.segment_url)).dim(),
            badge,
        ));
    }
    lines.join("\n")
}

fn segment_tail(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

fn format_separator(sweep_num: u64) -> String {
    let label = if sweep_num == 0 {
        String::new()
    } else {
        format!(" sweep {} ", sweep_num)
    };
    let width = 64usize.saturating_sub(label.len());
    format!(
        "{}{}{}",
        style("──").dim(),
        style(label).dim().bold(),
        style("─".repeat(width)).dim()
    )
}

fn init_tracing(log_format: &str, default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    match log_format {
        "json" => {
            fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}

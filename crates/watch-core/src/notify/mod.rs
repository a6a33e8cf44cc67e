//! Alarm notification.
//!
//! The sweep never waits on mail or HTTP. When the debouncer raises an alarm
//! it is pushed through an mpsc channel; the [`AlarmDispatcher`] reads from
//! that channel, sends the operator mail and calls the failover exchange.

mod exchange;
mod mail;

pub use exchange::{exchange_url, ExchangeConfig, HttpFailover};
pub use mail::{compose_alert_mail, parse_recipients, AlertMail, MailConfig, SmtpMailer};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::loader::PlaylistLoader;
use crate::registry::ChannelTarget;
use crate::watch::channel_log::{ChannelLog, TracingChannelLog};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Invalid mail address {address}: {reason}")]
    Address { address: String, reason: String },
    #[error("Failed to build alert mail: {0}")]
    Build(String),
    #[error("Mail relay {relay} failed: {reason}")]
    Mail { relay: String, reason: String },
    #[error("Exchange call to {url} failed: {reason}")]
    Exchange { url: String, reason: String },
}

/// A channel that just crossed the alert threshold.
#[derive(Debug, Clone, Serialize)]
pub struct Alarm {
    pub id: Uuid,
    pub channel: ChannelTarget,
    pub repeat_count: u32,
    pub status: u16,
    pub incident_began_at: DateTime<Utc>,
    pub notified_at: DateTime<Utc>,
}

pub type AlarmSender = mpsc::UnboundedSender<Alarm>;
pub type AlarmReceiver = mpsc::UnboundedReceiver<Alarm>;

pub fn alarm_channel() -> (AlarmSender, AlarmReceiver) {
    mpsc::unbounded_channel()
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &AlertMail) -> Result<(), NotifyError>;
}

/// Pulls a channel out of rotation. Returns the HTTP status the endpoint answered with.
#[async_trait]
pub trait FailoverClient: Send + Sync {
    async fn pull_out(&self, channel: &ChannelTarget) -> Result<u16, NotifyError>;
}

/// What happened to one alarm. `None` means the sub-action is not configured.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub mail: Option<Result<(), NotifyError>>,
    pub exchange: Option<Result<u16, NotifyError>>,
}

pub struct AlarmDispatcher {
    rx: AlarmReceiver,
    loader: Arc<dyn PlaylistLoader>,
    mailer: Option<Arc<dyn Mailer>>,
    failover: Option<Arc<dyn FailoverClient>>,
    channel_log: Arc<dyn ChannelLog>,
}

impl AlarmDispatcher {
    /// `loader` is used for the diagnostic playlist re-fetch included in the mail.
    pub fn new(rx: AlarmReceiver, loader: Arc<dyn PlaylistLoader>) -> Self {
        Self {
            rx,
            loader,
            mailer: None,
            failover: None,
            channel_log: Arc::new(TracingChannelLog),
        }
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    pub fn with_failover(mut self, failover: Arc<dyn FailoverClient>) -> Self {
        self.failover = Some(failover);
        self
    }

    pub fn with_channel_log(mut self, log: Arc<dyn ChannelLog>) -> Self {
        self.channel_log = log;
        self
    }

    /// Run the dispatcher loop. Returns when all senders are dropped.
    pub async fn run(mut self) {
        debug!(
            mail = self.mailer.is_some(),
            exchange = self.failover.is_some(),
            "Alarm dispatcher started"
        );

        while let Some(alarm) = self.rx.recv().await {
            self.handle(&alarm).await;
        }

        debug!("Alarm dispatcher shutting down");
    }

    /// Sends the mail and the exchange call for one alarm, concurrently.
    pub async fn handle(&self, alarm: &Alarm) -> DispatchOutcome {
        let channel = &alarm.channel;
        info!(
            alarm_id = %alarm.id,
            channel_id = %channel.id,
            channel = %channel.name,
            product = %channel.product,
            cdn_code = %channel.cdn_code,
            "Dispatching alarm"
        );

        let mail = async {
            let mailer = self.mailer.as_ref()?;
            self.channel_log
                .record(channel, &format!("----sendMail[{}]", channel.name));
            let playlist = fetch_diagnostic(self.loader.as_ref(), &channel.playlist_url).await;
            let result = mailer.send(&compose_alert_mail(alarm, &playlist)).await;
            if let Err(e) = &result {
                warn!(
                    alarm_id = %alarm.id,
                    channel_id = %channel.id,
                    error = %e,
                    "Alert mail failed"
                );
                self.channel_log
                    .record(channel, &format!("sendMail error: {}", e));
            }
            Some(result)
        };

        let exchange = async {
            let failover = self.failover.as_ref()?;
            self.channel_log.record(
                channel,
                &format!("----actionExchange[{}][{}]", channel.product, channel.cdn_code),
            );
            let result = failover.pull_out(channel).await;
            match &result {
                Ok(status) => {
                    info!(
                        alarm_id = %alarm.id,
                        channel_id = %channel.id,
                        status,
                        "Exchange answered"
                    )
                }
                Err(e) => {
                    warn!(
                        alarm_id = %alarm.id,
                        channel_id = %channel.id,
                        error = %e,
                        "Exchange call failed"
                    );
                    self.channel_log
                        .record(channel, &format!("actionExchange error: {}", e));
                }
            }
            Some(result)
        };

        let (mail, exchange) = tokio::join!(mail, exchange);
        DispatchOutcome { mail, exchange }
    }
}

/// Re-fetches the playlist for the alert body. Failures become inline text.
pub async fn fetch_diagnostic(loader: &dyn PlaylistLoader, playlist_url: &str) -> String {
    match loader.load(playlist_url).await {
        Ok(response) => response.body,
        Err(e) => format!("Error fetching playlist {}: {}", playlist_url, e),
    }
}

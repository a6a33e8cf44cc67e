use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Alarm, Mailer, NotifyError};

/// Mail relay settings. The relay is trusted: no TLS, no authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_relay_host")]
    pub relay_host: String,
    #[serde(default = "default_relay_port")]
    pub relay_port: u16,
    pub from: String,
    /// Comma-separated recipient list.
    pub recipients: String,
    #[serde(default = "default_mail_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_relay_host() -> String {
    "localhost".into()
}

fn default_relay_port() -> u16 {
    25
}

fn default_mail_timeout_ms() -> u64 {
    10_000
}

/// Splits a comma-separated address list, dropping blanks.
pub fn parse_recipients(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertMail {
    pub subject: String,
    pub body: String,
}

pub fn compose_alert_mail(alarm: &Alarm, playlist_text: &str) -> AlertMail {
    let channel = &alarm.channel;
    let began = alarm.incident_began_at.with_timezone(&Local);
    let notified = alarm.notified_at.with_timezone(&Local);

    let subject = format!(
        "!!! Channel watch alert [{}] [{}][{}]",
        notified.format("%Y-%m-%d"),
        channel.product,
        channel.cdn_code
    );

    let body = format!(
        "Incident began:   {}\n\
         Notified at:      {}\n\
         Channel:          {} ({})\n\
         Playlist URL:     {}\n\
         Repeat count:     {}\n\
         Last HTTP status: {}\n\
         \n\
         Playlist content:\n\
         ---------------------------------\n\
         {}\n\
         ---------------------------------\n\
         \n\
         Please investigate as soon as possible.\n",
        began.format("%Y-%m-%d %H:%M:%S"),
        notified.format("%Y-%m-%d %H:%M:%S"),
        channel.display_name,
        channel.name,
        channel.playlist_url,
        alarm.repeat_count,
        alarm.status,
        playlist_text.trim_end(),
    );

    AlertMail { subject, body }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    relay: String,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl SmtpMailer {
    pub fn new(config: &MailConfig) -> Result<Self, NotifyError> {
        let from = parse_mailbox(&config.from)?;
        let to = parse_recipients(&config.recipients)
            .iter()
            .map(|r| parse_mailbox(r))
            .collect::<Result<Vec<_>, _>>()?;
        if to.is_empty() {
            return Err(NotifyError::Address {
                address: config.recipients.clone(),
                reason: "recipient list is empty".into(),
            });
        }

        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.relay_host)
            .port(config.relay_port)
            .timeout(Some(Duration::from_millis(config.timeout_ms)))
            .build();

        Ok(Self {
            transport,
            relay: format!("{}:{}", config.relay_host, config.relay_port),
            from,
            to,
        })
    }

    pub fn recipients(&self) -> &[Mailbox] {
        &self.to
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, NotifyError> {
    address.parse::<Mailbox>().map_err(|e| NotifyError::Address {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &AlertMail) -> Result<(), NotifyError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(mail.subject.clone())
            .header(ContentType::TEXT_PLAIN);
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        let message = builder
            .body(mail.body.clone())
            .map_err(|e| NotifyError::Build(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::Mail {
                relay: self.relay.clone(),
                reason: e.to_string(),
            })?;

        debug!(relay = %self.relay, recipients = self.to.len(), "Alert mail sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::registry::ChannelTarget;

    fn config(recipients: &str) -> MailConfig {
        MailConfig {
            relay_host: "127.0.0.1".into(),
            relay_port: 9,
            from: "channel-watch@example.com".into(),
            recipients: recipients.into(),
            timeout_ms: 2000,
        }
    }

    fn alarm() -> Alarm {
        Alarm {
            id: Uuid::new_v4(),
            channel: ChannelTarget {
                id: "101".into(),
                display_name: "News 24".into(),
                name: "news24".into(),
                playlist_url: "https://origin.example.com/news24/index.m3u8".into(),
                product: "ssai".into(),
                cdn_code: "akm".into(),
            },
            repeat_count: 3,
            status: 502,
            incident_began_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
            notified_at: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 10).unwrap(),
        }
    }

    #[test]
    fn recipients_are_split_and_trimmed() {
        assert_eq!(
            parse_recipients(" ops@example.com, noc@example.com,,"),
            vec!["ops@example.com", "noc@example.com"]
        );
        assert!(parse_recipients("").is_empty());
    }

    #[test]
    fn mail_carries_channel_details_and_playlist() {
        let mail = compose_alert_mail(&alarm(), "#EXTM3U\nhttps://cdn/seg/1.ts\n");
        assert!(mail.subject.contains("[ssai][akm]"));
        assert!(mail.body.contains("News 24 (news24)"));
        assert!(mail.body.contains("https://origin.example.com/news24/index.m3u8"));
        assert!(mail.body.contains("Last HTTP status: 502"));
        assert!(mail.body.contains("#EXTM3U\nhttps://cdn/seg/1.ts\n---"));
    }

    #[test]
    fn mail_shows_both_timestamps_in_local_time() {
        let a = alarm();
        let mail = compose_alert_mail(&a, "");
        let began = a
            .incident_began_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let notified = a
            .notified_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        assert!(mail.body.contains(&began));
        assert!(mail.body.contains(&notified));
    }

    #[test]
    fn mailer_rejects_bad_addresses() {
        assert!(matches!(
            SmtpMailer::new(&config("not an address")),
            Err(NotifyError::Address { .. })
        ));
        assert!(matches!(
            SmtpMailer::new(&config(" , ")),
            Err(NotifyError::Address { .. })
        ));
    }

    #[tokio::test]
    async fn mailer_accepts_recipient_list() {
        let mailer = SmtpMailer::new(&config("ops@example.com,noc@example.com")).unwrap();
        assert_eq!(mailer.recipients().len(), 2);
    }

    #[tokio::test]
    async fn unreachable_relay_is_a_mail_error() {
        let mailer = SmtpMailer::new(&config("ops@example.com")).unwrap();
        let err = mailer
            .send(&compose_alert_mail(&alarm(), ""))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Mail { .. }), "{}", err);
    }
}

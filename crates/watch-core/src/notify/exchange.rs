use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{FailoverClient, NotifyError};
use crate::registry::ChannelTarget;

/// Failover exchange endpoint, e.g. `http://exchange.local/api/close/{product}/{cdn_code}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub url_template: String,
    #[serde(default = "default_exchange_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_exchange_timeout_ms() -> u64 {
    5000
}

pub fn exchange_url(template: &str, product: &str, cdn_code: &str) -> String {
    template
        .replace("{product}", product)
        .replace("{cdn_code}", cdn_code)
}

#[derive(Debug, Clone)]
pub struct HttpFailover {
    client: Client,
    url_template: String,
    timeout: Duration,
}

impl HttpFailover {
    pub fn new(client: Client, config: &ExchangeConfig) -> Self {
        Self {
            client,
            url_template: config.url_template.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

#[async_trait]
impl FailoverClient for HttpFailover {
    /// Any HTTP answer counts as delivered; only transport failures are errors.
    async fn pull_out(&self, channel: &ChannelTarget) -> Result<u16, NotifyError> {
        let url = exchange_url(&self.url_template, &channel.product, &channel.cdn_code);
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| NotifyError::Exchange {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        info!(url = %url, status, body = %body.trim(), "Exchange response");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel() -> ChannelTarget {
        ChannelTarget {
            id: "101".into(),
            display_name: "News 24".into(),
            name: "news24".into(),
            playlist_url: "https://origin.example.com/news24/index.m3u8".into(),
            product: "ssai".into(),
            cdn_code: "akm".into(),
        }
    }

    fn failover(base: &str) -> HttpFailover {
        HttpFailover::new(
            Client::new(),
            &ExchangeConfig {
                url_template: format!("{}/api/closeSsai/{{product}}/{{cdn_code}}", base),
                timeout_ms: 2000,
            },
        )
    }

    #[test]
    fn url_template_is_filled() {
        assert_eq!(
            exchange_url("http://x/api/{product}/{cdn_code}", "ssai", "akm"),
            "http://x/api/ssai/akm"
        );
    }

    #[tokio::test]
    async fn pull_out_calls_templated_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/closeSsai/ssai/akm"))
            .respond_with(ResponseTemplate::new(200).set_body_string("closed"))
            .expect(1)
            .mount(&server)
            .await;

        let status = failover(&server.uri()).pull_out(&channel()).await.unwrap();
        assert_eq!(status, 200);
    }

    #[tokio::test]
    async fn error_status_is_still_delivered() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/closeSsai/ssai/akm"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let status = failover(&server.uri()).pull_out(&channel()).await.unwrap();
        assert_eq!(status, 500);
    }

    #[tokio::test]
    async fn transport_failure_is_an_error() {
        let err = failover("http://127.0.0.1:9")
            .pull_out(&channel())
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Exchange { .. }), "{}", err);
    }
}

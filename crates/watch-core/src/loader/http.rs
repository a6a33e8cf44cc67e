use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use super::{PlaylistLoader, PlaylistResponse, ResolveError};

/// HTTP playlist loader. One attempt per call; the client carries the deadline.
#[derive(Debug, Clone)]
pub struct HttpLoader {
    client: Client,
}

impl HttpLoader {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Self::build_client(timeout)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(config: &crate::config::WatchConfig) -> Result<Self, reqwest::Error> {
        Self::new(config.request_timeout)
    }

    pub fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(20)
            .gzip(true)
            .build()
    }
}

#[async_trait]
impl PlaylistLoader for HttpLoader {
    async fn load(&self, uri: &str) -> Result<PlaylistResponse, ResolveError> {
        let response = match self.client.get(uri).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                warn!(uri, "Playlist fetch timed out");
                return Err(ResolveError::Timeout {
                    url: uri.to_string(),
                });
            }
            Err(e) => {
                warn!(uri, error = %e, "Playlist fetch network error");
                return Err(ResolveError::Network {
                    url: uri.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let status = response.status().as_u16();
        if !response.status().is_success() {
            debug!(uri, status, "Playlist served with error status");
        }

        match response.text().await {
            Ok(body) => Ok(PlaylistResponse { status, body }),
            Err(e) => Err(ResolveError::Body {
                url: uri.to_string(),
                status,
                reason: e.to_string(),
            }),
        }
    }
}

// ABOUTME: Pub/sub delivery driver publishing one alert to the shared broadcast channel
// ABOUTME: Issues a fresh server token per publish and retries transport failures with backoff

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::channel::{ChannelKind, DeliveryDriver, DeliveryOutcome};
use crate::config::PubSubConfig;
use crate::ledger::BroadcastRecord;
use crate::token;

const MAX_RETRIES: u32 = 2;
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

/// Publishes one broadcast payload to the channel.
/// Seam over the REST backend so the retry loop is testable without a network.
#[async_trait]
pub trait PublishTransport: Send + Sync {
    async fn publish(&self, broadcast: &BroadcastRecord) -> Result<()>;
}

/// Production transport: signed REST publish to the messaging backend.
pub struct RestTransport {
    config: PubSubConfig,
    client: reqwest::Client,
}

impl RestTransport {
    pub fn new(config: PubSubConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build pub/sub HTTP client")?;
        Ok(Self { config, client })
    }

    /// Wire payload published to the shared channel. Listeners pick their
    /// own language out of the embedded translations map.
    fn build_payload(&self, broadcast: &BroadcastRecord) -> serde_json::Value {
        let inner = json!({
            "type": "broadcast",
            "data": {
                "id": broadcast.id,
                "message": broadcast.message,
                "translations": broadcast.translations,
                "location": broadcast.location,
                "emergency": broadcast.emergency,
                "timestamp": broadcast.timestamp,
            }
        });
        json!({
            "channel_name": self.config.channel,
            "payload": inner.to_string(),
            "enable_historical_messaging": true,
        })
    }
}

#[async_trait]
impl PublishTransport for RestTransport {
    async fn publish(&self, broadcast: &BroadcastRecord) -> Result<()> {
        let app_id = self
            .config
            .app_id
            .as_deref()
            .context("pub/sub credentials not configured")?;

        let issued = token::issue_token(&self.config, &self.config.server_user_id)?;
        let url = format!(
            "{}/dev/v2/project/{}/rtm/users/{}/channel_messages",
            self.config.api_base, app_id, self.config.server_user_id
        );

        let response = self
            .client
            .post(&url)
            .header("x-agora-token", &issued.token)
            .header("x-agora-uid", &self.config.server_user_id)
            .json(&self.build_payload(broadcast))
            .send()
            .await
            .context("Publish request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Publish rejected with {}: {}", status, body);
        }
        Ok(())
    }
}

pub struct PubSubDriver {
    config: PubSubConfig,
    transport: Arc<dyn PublishTransport>,
}

impl PubSubDriver {
    pub fn new(config: PubSubConfig) -> Result<Self> {
        let transport = Arc::new(RestTransport::new(config.clone())?);
        Ok(Self::with_transport(config, transport))
    }

    pub fn with_transport(config: PubSubConfig, transport: Arc<dyn PublishTransport>) -> Self {
        Self { config, transport }
    }
}

#[async_trait]
impl DeliveryDriver for PubSubDriver {
    fn kind(&self) -> ChannelKind {
        ChannelKind::PubSub
    }

    async fn deliver(&self, broadcast: &BroadcastRecord) -> DeliveryOutcome {
        if self.config.app_id.is_none() || self.config.app_certificate.is_none() {
            tracing::warn!(
                broadcast_id = broadcast.id,
                "Pub/sub credentials not configured, skipping channel"
            );
            return DeliveryOutcome::channel_failed(
                ChannelKind::PubSub,
                "credentials not configured",
            );
        }

        let mut last_error = String::new();
        for attempt in 0..=MAX_RETRIES {
            match self.transport.publish(broadcast).await {
                Ok(()) => {
                    tracing::info!(
                        broadcast_id = broadcast.id,
                        channel = %self.config.channel,
                        "Broadcast published"
                    );
                    let mut outcome = DeliveryOutcome::new(ChannelKind::PubSub);
                    outcome.record_success();
                    return outcome;
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < MAX_RETRIES {
                        let delay = RETRY_BACKOFF * 2u32.pow(attempt);
                        tracing::warn!(
                            broadcast_id = broadcast.id,
                            error = %last_error,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "Publish failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        tracing::error!(
            broadcast_id = broadcast.id,
            error = %last_error,
            "Publish failed after retries"
        );
        DeliveryOutcome::channel_failed(ChannelKind::PubSub, last_error)
    }
}

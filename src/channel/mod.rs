// ABOUTME: Channel abstraction for broadcast delivery drivers
// ABOUTME: Defines the uniform deliver-and-tally contract shared by pub/sub and chat

pub mod pubsub;
pub mod telegram;

pub use pubsub::PubSubDriver;
pub use telegram::TelegramDriver;

use crate::ledger::BroadcastRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The independent delivery paths a broadcast can fan out across.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    PubSub,
    Telegram,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PubSub => write!(f, "pubsub"),
            Self::Telegram => write!(f, "telegram"),
        }
    }
}

/// One failed recipient (or the channel itself), kept for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryFailure {
    pub recipient: String,
    pub reason: String,
}

/// What one driver reports back after a delivery attempt.
///
/// Success semantics differ per channel: the pub/sub driver counts one
/// successful publish, the chat driver counts recipients reached. The
/// orchestrator sums them into the ledger's scalar without unifying the
/// semantics any further.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryOutcome {
    pub channel: ChannelKind,
    pub success_count: u32,
    pub failure_count: u32,
    pub failures: Vec<DeliveryFailure>,
}

impl DeliveryOutcome {
    pub fn new(channel: ChannelKind) -> Self {
        Self {
            channel,
            success_count: 0,
            failure_count: 0,
            failures: Vec::new(),
        }
    }

    /// Zero-success outcome carrying a single channel-level diagnostic.
    pub fn channel_failed(channel: ChannelKind, reason: impl Into<String>) -> Self {
        let mut outcome = Self::new(channel);
        outcome.record_failure(channel.to_string(), reason);
        outcome
    }

    pub fn record_success(&mut self) {
        self.success_count += 1;
    }

    pub fn record_failure(&mut self, recipient: impl Into<String>, reason: impl Into<String>) {
        self.failure_count += 1;
        self.failures.push(DeliveryFailure {
            recipient: recipient.into(),
            reason: reason.into(),
        });
    }
}

/// A delivery driver for one channel. Drivers never propagate transport
/// errors past this boundary: every failure becomes a tally entry, and
/// drivers are safe to run concurrently with each other.
#[async_trait]
pub trait DeliveryDriver: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn deliver(&self, broadcast: &BroadcastRecord) -> DeliveryOutcome;
}

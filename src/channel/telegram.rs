// ABOUTME: Chat delivery driver fanning a broadcast out to every registered subscriber
// ABOUTME: Also hosts the long-polling listener that handles subscription commands

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{ChatKind, MediaKind, MessageKind, UpdateKind};

use crate::channel::{ChannelKind, DeliveryDriver, DeliveryOutcome};
use crate::ledger::BroadcastRecord;
use crate::registry::{NewSubscriber, SubscriberRegistry};

/// Sends one direct message to one chat-platform recipient.
/// Seam over the bot API so delivery logic is testable without a network.
#[async_trait]
pub trait DirectMessenger: Send + Sync {
    async fn send_direct(&self, recipient: i64, text: &str) -> Result<()>;
}

/// Production messenger backed by the Telegram Bot API.
pub struct BotMessenger {
    bot: Bot,
}

impl BotMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl DirectMessenger for BotMessenger {
    async fn send_direct(&self, recipient: i64, text: &str) -> Result<()> {
        self.bot
            .send_message(ChatId(recipient), text)
            .await
            .context("Failed to send direct message")?;
        Ok(())
    }
}

pub struct TelegramDriver {
    messenger: Arc<dyn DirectMessenger>,
    registry: SubscriberRegistry,
    /// Delay between consecutive sends, respecting the Bot API rate limit
    pacing: Duration,
}

impl TelegramDriver {
    pub fn new(bot: Bot, registry: SubscriberRegistry, pacing_ms: u64) -> Self {
        Self::with_messenger(Arc::new(BotMessenger::new(bot)), registry, pacing_ms)
    }

    pub fn with_messenger(
        messenger: Arc<dyn DirectMessenger>,
        registry: SubscriberRegistry,
        pacing_ms: u64,
    ) -> Self {
        Self {
            messenger,
            registry,
            pacing: Duration::from_millis(pacing_ms),
        }
    }
}

/// Pick the alert body for a subscriber: their preferred language's
/// translation when present, the authored text otherwise.
fn alert_text<'a>(broadcast: &'a BroadcastRecord, language: &str) -> &'a str {
    broadcast
        .translations
        .get(language)
        .map(String::as_str)
        .unwrap_or(&broadcast.message)
}

/// Format one alert message for a direct send.
fn format_alert(broadcast: &BroadcastRecord, language: &str) -> String {
    let (emoji, title) = if broadcast.emergency {
        ("🚨", "EMERGENCY ALERT")
    } else {
        ("📢", "Broadcast Message")
    };

    let mut message = format!("{} {}\n\n{}", emoji, title, alert_text(broadcast, language));
    if let Some(location) = broadcast.location.as_deref().filter(|l| !l.is_empty()) {
        message.push_str(&format!("\n\n📍 {}", location));
    }

    let when = chrono::DateTime::parse_from_rfc3339(&broadcast.timestamp)
        .map(|t| t.format("%I:%M %p, %d %b %Y").to_string())
        .unwrap_or_else(|_| broadcast.timestamp.clone());
    message.push_str(&format!("\n\n⏰ {}", when));
    message
}

#[async_trait]
impl DeliveryDriver for TelegramDriver {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    async fn deliver(&self, broadcast: &BroadcastRecord) -> DeliveryOutcome {
        let mut outcome = DeliveryOutcome::new(ChannelKind::Telegram);

        let roster = match self.registry.list_all() {
            Ok(roster) => roster,
            Err(e) => {
                tracing::error!(broadcast_id = broadcast.id, error = %e, "Failed to load roster");
                return DeliveryOutcome::channel_failed(ChannelKind::Telegram, e.to_string());
            }
        };

        if roster.is_empty() {
            tracing::info!(broadcast_id = broadcast.id, "No subscribers, nothing to send");
            return outcome;
        }

        let total = roster.len();
        for (i, subscriber) in roster.iter().enumerate() {
            let text = format_alert(broadcast, &subscriber.language);
            match self.messenger.send_direct(subscriber.id, &text).await {
                Ok(()) => outcome.record_success(),
                Err(e) => {
                    // One recipient's failure never aborts the rest of the roster
                    tracing::warn!(
                        broadcast_id = broadcast.id,
                        subscriber_id = subscriber.id,
                        error = %e,
                        "Direct send failed"
                    );
                    outcome.record_failure(subscriber.id.to_string(), e.to_string());
                }
            }

            if i + 1 < total {
                tokio::time::sleep(self.pacing).await;
            }
        }

        tracing::info!(
            broadcast_id = broadcast.id,
            sent = outcome.success_count,
            failed = outcome.failure_count,
            "Chat fan-out complete"
        );
        outcome
    }
}

// =============================================================================
// Subscription listener
// =============================================================================

const WELCOME_TEXT: &str = "👋 Welcome to the Emergency Alert System!\n\n\
You are now subscribed to emergency broadcasts.\n\n\
🚨 You'll receive instant alerts during emergencies\n\
🌍 Set your language with /language <code> (e.g. /language hi)\n\n\
Type /help to see available commands.";

const HELP_TEXT: &str = "📋 Available commands:\n\n\
/start - Subscribe to alerts\n\
/help - Show this help message\n\
/language <code> - Change language (en, hi, ta, te, bn, mr, ...)\n\
/status - Check system status\n\n\
🚨 You'll automatically receive all emergency broadcasts!";

/// What the listener does with one incoming update.
#[derive(Debug, PartialEq, Eq)]
enum BotCommand {
    Start,
    Help,
    Language(Option<String>),
    Status,
    Other,
}

fn parse_command(text: &str) -> BotCommand {
    let mut parts = text.trim().split_whitespace();
    match parts.next() {
        Some("/start") => BotCommand::Start,
        Some("/help") => BotCommand::Help,
        Some("/language") => BotCommand::Language(parts.next().map(str::to_lowercase)),
        Some("/status") => BotCommand::Status,
        _ => BotCommand::Other,
    }
}

/// Long-polling loop handling subscription traffic. Every /start and
/// /language event upserts the registry; broadcast fan-out reads the same
/// rows, so there is no separate in-memory preference cache to drift.
pub async fn run_subscription_listener(
    bot: Bot,
    registry: SubscriberRegistry,
    catalog: Vec<String>,
    pubsub_configured: bool,
) {
    let mut offset: i32 = 0;

    loop {
        let updates = match bot.get_updates().offset(offset).timeout(30).await {
            Ok(updates) => updates,
            Err(e) => {
                tracing::warn!(error = %e, "Long polling error, retrying in 5s");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        for update in &updates {
            offset = update.id.as_offset();

            let message = match &update.kind {
                UpdateKind::Message(msg) => msg,
                _ => continue,
            };
            let text = match &message.kind {
                MessageKind::Common(common) => match &common.media_kind {
                    MediaKind::Text(text) => text.text.clone(),
                    _ => continue,
                },
                _ => continue,
            };
            let Some(from) = message.from.as_ref() else {
                continue;
            };
            // Subscriptions are personal; ignore group chatter
            if !matches!(message.chat.kind, ChatKind::Private(_)) {
                continue;
            }

            let reply = handle_command(
                &parse_command(&text),
                from.id.0 as i64,
                from.username.as_deref(),
                &from.first_name,
                &registry,
                &catalog,
                pubsub_configured,
            );

            if let Some(reply) = reply {
                if let Err(e) = bot.send_message(message.chat.id, reply).await {
                    tracing::warn!(chat_id = message.chat.id.0, error = %e, "Reply failed");
                }
            }
        }
    }
}

fn handle_command(
    command: &BotCommand,
    user_id: i64,
    username: Option<&str>,
    first_name: &str,
    registry: &SubscriberRegistry,
    catalog: &[String],
    pubsub_configured: bool,
) -> Option<String> {
    match command {
        BotCommand::Start => {
            let upserted = registry.upsert(NewSubscriber {
                id: user_id,
                username: username.map(str::to_string),
                display_name: Some(first_name.to_string()),
                language: None,
            });
            match upserted {
                Ok(_) => Some(WELCOME_TEXT.to_string()),
                Err(e) => {
                    tracing::error!(subscriber_id = user_id, error = %e, "Subscribe failed");
                    Some("⚠️ Subscription failed, please try again later.".to_string())
                }
            }
        }
        BotCommand::Help => Some(HELP_TEXT.to_string()),
        BotCommand::Language(Some(code)) if catalog.contains(code) => {
            let upserted = registry.upsert(NewSubscriber {
                id: user_id,
                username: username.map(str::to_string),
                display_name: Some(first_name.to_string()),
                language: Some(code.clone()),
            });
            match upserted {
                Ok(_) => Some(format!(
                    "✅ Language set to {}\n\nYou'll receive alerts in this language.",
                    code
                )),
                Err(e) => {
                    tracing::error!(subscriber_id = user_id, error = %e, "Language update failed");
                    Some("⚠️ Could not update your language, please try again later.".to_string())
                }
            }
        }
        BotCommand::Language(_) => Some(format!(
            "🌍 Usage: /language <code>\nSupported: {}",
            catalog.join(", ")
        )),
        BotCommand::Status => {
            let subscribers = registry.count().unwrap_or(0);
            Some(format!(
                "✅ System status: online\n\n\
                 💬 Subscribers: {}\n\
                 📡 Real-time alerts: {}\n\n\
                 🟢 All systems operational",
                subscribers,
                if pubsub_configured {
                    "enabled"
                } else {
                    "not configured"
                }
            ))
        }
        BotCommand::Other => None,
    }
}

// =============================================================================
// Tests
// =============================================================================

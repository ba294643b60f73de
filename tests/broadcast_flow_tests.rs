// ABOUTME: End-to-end broadcast pipeline tests over in-memory storage
// ABOUTME: Covers translate-persist-fan-out-reconcile across chat and pub/sub channels

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use siren::channel::telegram::{DirectMessenger, TelegramDriver};
use siren::channel::{ChannelKind, DeliveryDriver, PubSubDriver};
use siren::config::PubSubConfig;
use siren::ledger::BroadcastLedger;
use siren::orchestrator::{BroadcastRequest, ChannelSelection, Orchestrator};
use siren::registry::{NewSubscriber, SubscriberRegistry};
use siren::store;
use siren::translate::{TranslationBackend, Translator};

struct TaggingBackend;

#[async_trait]
impl TranslationBackend for TaggingBackend {
    async fn translate_batch(
        &self,
        text: &str,
        targets: &[String],
    ) -> Result<HashMap<String, String>> {
        Ok(targets
            .iter()
            .map(|lang| (lang.clone(), format!("[{}] {}", lang, text)))
            .collect())
    }
}

/// Messenger that fails for a fixed set of recipients and records every
/// message text it was asked to send.
struct ScriptedMessenger {
    blocked: Vec<i64>,
    sent: Mutex<Vec<(i64, String)>>,
}

impl ScriptedMessenger {
    fn new(blocked: Vec<i64>) -> Arc<Self> {
        Arc::new(Self {
            blocked,
            sent: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl DirectMessenger for ScriptedMessenger {
    async fn send_direct(&self, recipient: i64, text: &str) -> Result<()> {
        if self.blocked.contains(&recipient) {
            anyhow::bail!("recipient blocked the bot")
        }
        self.sent.lock().unwrap().push((recipient, text.to_string()));
        Ok(())
    }
}

struct Fixture {
    orchestrator: Orchestrator,
    ledger: BroadcastLedger,
    registry: SubscriberRegistry,
    messenger: Arc<ScriptedMessenger>,
}

fn catalog() -> Vec<String> {
    vec!["en".to_string(), "hi".to_string(), "ta".to_string()]
}

/// Wire up the full pipeline: unconfigured pub/sub driver, chat driver over
/// a scripted messenger, tagging translator, shared in-memory database.
fn fixture(blocked: Vec<i64>) -> Fixture {
    let db = store::open_in_memory().unwrap();
    let ledger = BroadcastLedger::new(Arc::clone(&db));
    let registry = SubscriberRegistry::new(db, "en");
    let messenger = ScriptedMessenger::new(blocked);

    let drivers: Vec<Arc<dyn DeliveryDriver>> = vec![
        Arc::new(PubSubDriver::new(PubSubConfig::default()).unwrap()),
        Arc::new(TelegramDriver::with_messenger(
            messenger.clone(),
            registry.clone(),
            0,
        )),
    ];

    let orchestrator = Orchestrator::new(
        Translator::new(Arc::new(TaggingBackend)),
        ledger.clone(),
        drivers,
        catalog(),
        "en".to_string(),
    );

    Fixture {
        orchestrator,
        ledger,
        registry,
        messenger,
    }
}

fn subscribe(fixture: &Fixture, id: i64, language: &str) {
    fixture
        .registry
        .upsert(NewSubscriber {
            id,
            username: None,
            display_name: None,
            language: Some(language.to_string()),
        })
        .unwrap();
}

fn emergency(message: &str, channels: ChannelSelection) -> BroadcastRequest {
    BroadcastRequest {
        message: message.to_string(),
        source_language: None,
        location: Some("Sector 5".to_string()),
        radius: None,
        emergency: true,
        channels,
    }
}

#[tokio::test]
async fn test_partial_chat_delivery_reconciles_count() {
    // Three subscribers, one of whom blocked the bot
    let fixture = fixture(vec![2]);
    subscribe(&fixture, 1, "en");
    subscribe(&fixture, 2, "hi");
    subscribe(&fixture, 3, "ta");

    let summary = fixture
        .orchestrator
        .broadcast(emergency("Evacuate now", ChannelSelection::Telegram))
        .await
        .unwrap();

    assert_eq!(summary.delivered_count, 2);
    assert_eq!(summary.failed_count(), 1);

    let chat = summary.outcome_for(ChannelKind::Telegram).unwrap();
    assert_eq!(chat.success_count, 2);
    assert_eq!(chat.failures[0].recipient, "2");

    // The ledger row carries the reconciled count, and the per-language
    // texts actually reached the right subscribers
    let stored = &fixture.ledger.list_recent(1).unwrap()[0];
    assert_eq!(stored.id, summary.broadcast_id);
    assert_eq!(stored.delivered_count, 2);

    let sent = fixture.messenger.sent.lock().unwrap();
    assert!(sent
        .iter()
        .any(|(id, text)| *id == 1 && text.contains("[en] Evacuate now")));
    assert!(sent
        .iter()
        .any(|(id, text)| *id == 3 && text.contains("[ta] Evacuate now")));
}

#[tokio::test]
async fn test_unconfigured_pubsub_never_blocks_chat() {
    let fixture = fixture(vec![]);
    subscribe(&fixture, 1, "hi");

    let summary = fixture
        .orchestrator
        .broadcast(emergency("Evacuate now", ChannelSelection::All))
        .await
        .unwrap();

    // Pub/sub has no credentials and reports a zero-success outcome;
    // the chat channel still delivers
    let pubsub = summary.outcome_for(ChannelKind::PubSub).unwrap();
    assert_eq!(pubsub.success_count, 0);
    assert_eq!(pubsub.failure_count, 1);

    let chat = summary.outcome_for(ChannelKind::Telegram).unwrap();
    assert_eq!(chat.success_count, 1);
    assert_eq!(summary.delivered_count, 1);
}

#[tokio::test]
async fn test_broadcast_with_no_subscribers_still_recorded() {
    let fixture = fixture(vec![]);

    let summary = fixture
        .orchestrator
        .broadcast(emergency("Routine check", ChannelSelection::Telegram))
        .await
        .unwrap();

    assert_eq!(summary.delivered_count, 0);
    assert_eq!(summary.failed_count(), 0);
    assert_eq!(fixture.ledger.list_recent(1).unwrap()[0].delivered_count, 0);
}

#[tokio::test]
async fn test_translations_persisted_for_whole_catalog() {
    let fixture = fixture(vec![]);

    let summary = fixture
        .orchestrator
        .broadcast(emergency("Evacuate now", ChannelSelection::Telegram))
        .await
        .unwrap();

    let stored = &fixture.ledger.list_recent(1).unwrap()[0];
    let expected: BTreeMap<String, String> = catalog()
        .into_iter()
        .map(|lang| (lang.clone(), format!("[{}] Evacuate now", lang)))
        .collect();
    assert_eq!(stored.translations, expected);
    assert_eq!(summary.translations, expected);
    assert!(summary.translation_warnings.is_empty());
}

#[tokio::test]
async fn test_sequential_broadcasts_keep_independent_counts() {
    let fixture = fixture(vec![]);
    subscribe(&fixture, 1, "en");

    fixture
        .orchestrator
        .broadcast(emergency("First", ChannelSelection::Telegram))
        .await
        .unwrap();
    subscribe(&fixture, 2, "hi");
    fixture
        .orchestrator
        .broadcast(emergency("Second", ChannelSelection::Telegram))
        .await
        .unwrap();

    let recent = fixture.ledger.list_recent(10).unwrap();
    assert_eq!(recent[0].message, "Second");
    assert_eq!(recent[0].delivered_count, 2);
    assert_eq!(recent[1].message, "First");
    assert_eq!(recent[1].delivered_count, 1);
}

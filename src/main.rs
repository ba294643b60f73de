// ABOUTME: Main entry point for the emergency broadcast service
// ABOUTME: Initializes logging, config, stores, channel drivers and the HTTP API

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use teloxide::Bot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use siren::channel::{DeliveryDriver, PubSubDriver, TelegramDriver};
use siren::channel::telegram::run_subscription_listener;
use siren::config::Config;
use siren::ledger::BroadcastLedger;
use siren::orchestrator::Orchestrator;
use siren::registry::SubscriberRegistry;
use siren::server::{self, AppState};
use siren::store;
use siren::translate::{HttpTranslationBackend, Translator};

#[derive(Parser, Debug)]
#[command(name = "siren", about = "Multilingual emergency broadcast service")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Log panics before they take the process down
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("\nPANIC! Service crashed with the following error:\n");
        eprintln!("{}", panic_info);
        eprintln!("\nBacktrace:");
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting emergency broadcast service");

    dotenvy::dotenv().ok();
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    tracing::info!(
        host = %config.http.host,
        port = config.http.port,
        languages = config.languages.catalog.len(),
        database = %config.storage.path,
        pubsub = config.pubsub_configured(),
        telegram = config.telegram.bot_token.is_some(),
        "Configuration loaded"
    );

    let db = store::open_database(&config.storage.path)?;
    let ledger = BroadcastLedger::new(Arc::clone(&db));
    let registry = SubscriberRegistry::new(db, config.languages.baseline.clone());
    tracing::info!(database = %config.storage.path, "Stores initialized");

    // Pub/sub driver is always registered; it reports an unconfigured outcome
    // at delivery time when credentials are missing
    let mut drivers: Vec<Arc<dyn DeliveryDriver>> =
        vec![Arc::new(PubSubDriver::new(config.pubsub.clone())?)];

    // Chat driver and subscription listener only run with a bot token
    if let Some(bot_token) = config.telegram.bot_token.as_deref() {
        let bot = Bot::new(bot_token);
        drivers.push(Arc::new(TelegramDriver::new(
            bot.clone(),
            registry.clone(),
            config.telegram.pacing_ms,
        )));

        let listener_registry = registry.clone();
        let catalog = config.languages.catalog.clone();
        let pubsub_configured = config.pubsub_configured();
        tokio::spawn(async move {
            run_subscription_listener(bot, listener_registry, catalog, pubsub_configured).await;
        });
        tracing::info!("Telegram channel enabled, subscription listener running");
    } else {
        tracing::warn!("No Telegram bot token, chat channel disabled");
    }

    let translator = Translator::new(Arc::new(HttpTranslationBackend::new(&config.translator)?));
    let orchestrator = Orchestrator::new(
        translator,
        ledger.clone(),
        drivers,
        config.languages.catalog.clone(),
        config.languages.baseline.clone(),
    );

    let state = Arc::new(AppState {
        config,
        orchestrator,
        ledger,
        registry,
    });

    server::run(state).await
}

// ABOUTME: HTTP API for issuing broadcasts, managing subscriptions and reading history
// ABOUTME: Thin axum layer over the orchestrator, ledger and subscriber registry

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::ledger::BroadcastLedger;
use crate::orchestrator::{BroadcastError, BroadcastRequest, ChannelSelection, Orchestrator};
use crate::registry::{NewSubscriber, SubscriberRegistry};
use crate::token;

pub struct AppState {
    pub config: Config,
    pub orchestrator: Orchestrator,
    pub ledger: BroadcastLedger,
    pub registry: SubscriberRegistry,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/broadcasts", post(create_broadcast).get(list_broadcasts))
        .route("/api/telegram/broadcast", post(telegram_broadcast))
        .route("/api/telegram/subscribe", post(subscribe))
        .route("/api/token/rtm/{user_id}", get(issue_rtm_token))
        .route("/api/analytics", get(analytics))
        .route("/api/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn run(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.http.host, state.config.http.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid HTTP bind address: {}", e))?;

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "HTTP API listening");
    axum::serve(listener, router).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BroadcastBody {
    message: String,
    source_language: Option<String>,
    location: Option<String>,
    radius: Option<u32>,
    #[serde(default = "default_emergency")]
    emergency: bool,
    #[serde(default)]
    channels: ChannelSelection,
}

fn default_emergency() -> bool {
    true
}

impl BroadcastBody {
    fn into_request(self, channels: ChannelSelection) -> BroadcastRequest {
        BroadcastRequest {
            message: self.message,
            source_language: self.source_language,
            location: self.location,
            radius: self.radius,
            emergency: self.emergency,
            channels,
        }
    }
}

async fn create_broadcast(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BroadcastBody>,
) -> impl IntoResponse {
    let channels = body.channels;
    run_broadcast(&state, body.into_request(channels)).await
}

/// Chat-only broadcast, for callers that want to skip the pub/sub channel.
async fn telegram_broadcast(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BroadcastBody>,
) -> impl IntoResponse {
    run_broadcast(&state, body.into_request(ChannelSelection::Telegram)).await
}

/// Scalar channel discriminator kept alongside the per-channel breakdown,
/// matching the wire contract of earlier clients.
fn platform_label(selection: ChannelSelection) -> &'static str {
    match selection {
        ChannelSelection::PubSub => "agora_rtm",
        ChannelSelection::Telegram => "telegram",
        ChannelSelection::All => "all",
    }
}

async fn run_broadcast(
    state: &AppState,
    request: BroadcastRequest,
) -> (StatusCode, Json<serde_json::Value>) {
    let platform = platform_label(request.channels);
    match state.orchestrator.broadcast(request).await {
        Ok(summary) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "broadcastId": summary.broadcast_id,
                "platform": platform,
                "translations": summary.translations,
                "translationWarnings": summary.translation_warnings,
                "deliveredCount": summary.delivered_count,
                "failedCount": summary.failed_count(),
                "channels": summary.per_channel,
                "timestamp": summary.timestamp,
            })),
        ),
        Err(BroadcastError::EmptyMessage) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "Broadcast message cannot be empty" })),
        ),
        Err(BroadcastError::LedgerUnavailable(e)) => {
            tracing::error!(error = %e, "Broadcast rejected, ledger unavailable");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": "Failed to record broadcast" })),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

async fn list_broadcasts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.ledger.list_recent(params.limit.unwrap_or(50)) {
        Ok(broadcasts) => (
            StatusCode::OK,
            Json(json!({ "count": broadcasts.len(), "broadcasts": broadcasts })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to list broadcasts");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to list broadcasts" })),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeBody {
    user_id: i64,
    username: Option<String>,
    first_name: Option<String>,
    language: Option<String>,
}

async fn subscribe(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubscribeBody>,
) -> (StatusCode, Json<serde_json::Value>) {
    if let Some(language) = body.language.as_deref() {
        if !state.config.languages.catalog.iter().any(|l| l == language) {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "success": false,
                    "error": format!("Unsupported language code: {}", language),
                })),
            );
        }
    }

    let upserted = state.registry.upsert(NewSubscriber {
        id: body.user_id,
        username: body.username,
        display_name: body.first_name,
        language: body.language,
    });
    match upserted {
        Ok(subscriber) => (
            StatusCode::OK,
            Json(json!({ "success": true, "subscriber": subscriber })),
        ),
        Err(e) => {
            tracing::error!(subscriber_id = body.user_id, error = %e, "Subscribe failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": "Failed to store subscription" })),
            )
        }
    }
}

/// Issue a short-lived pub/sub auth token for a client user id.
async fn issue_rtm_token(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    if !state.config.pubsub_configured() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "Real-time messaging is not configured" })),
        );
    }

    match token::issue_token(&state.config.pubsub, &user_id) {
        Ok(issued) => (
            StatusCode::OK,
            Json(json!({
                "token": issued.token,
                "appId": state.config.pubsub.app_id,
                "userId": user_id,
                "expiresAt": issued.expires_at,
            })),
        ),
        Err(e) => {
            tracing::error!(user_id = %user_id, error = %e, "Token issuance failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to issue token" })),
            )
        }
    }
}

async fn analytics(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    match state.ledger.analytics() {
        Ok(analytics) => (StatusCode::OK, Json(json!(analytics))),
        Err(e) => {
            tracing::error!(error = %e, "Failed to compute analytics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to compute analytics" })),
            )
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let subscribers = state.registry.count().unwrap_or(0);
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "subscribers": subscribers,
            "services": {
                "pubsub": state.config.pubsub_configured(),
                "telegram": state.config.telegram.bot_token.is_some(),
            },
        })),
    )
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store;
    use crate::translate::{TranslationBackend, Translator};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct EchoBackend;

    #[async_trait]
    impl TranslationBackend for EchoBackend {
        async fn translate_batch(
            &self,
            text: &str,
            targets: &[String],
        ) -> anyhow::Result<HashMap<String, String>> {
            Ok(targets
                .iter()
                .map(|lang| (lang.clone(), text.to_string()))
                .collect())
        }
    }

    fn test_state() -> AppState {
        let db = store::open_in_memory().unwrap();
        let ledger = BroadcastLedger::new(Arc::clone(&db));
        let registry = SubscriberRegistry::new(db, "en");
        let orchestrator = Orchestrator::new(
            Translator::new(Arc::new(EchoBackend)),
            ledger.clone(),
            Vec::new(),
            vec!["en".to_string()],
            "en".to_string(),
        );
        AppState {
            config: Config::default(),
            orchestrator,
            ledger,
            registry,
        }
    }

    fn body(channels: ChannelSelection) -> BroadcastRequest {
        BroadcastRequest {
            message: "Evacuate now".to_string(),
            source_language: None,
            location: None,
            radius: None,
            emergency: true,
            channels,
        }
    }

    #[tokio::test]
    async fn test_broadcast_response_names_platform() {
        let state = test_state();

        let (status, Json(response)) =
            run_broadcast(&state, body(ChannelSelection::PubSub)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["success"], true);
        assert_eq!(response["platform"], "agora_rtm");

        let (_, Json(response)) =
            run_broadcast(&state, body(ChannelSelection::Telegram)).await;
        assert_eq!(response["platform"], "telegram");

        let (_, Json(response)) = run_broadcast(&state, body(ChannelSelection::All)).await;
        assert_eq!(response["platform"], "all");
        // The richer per-channel breakdown stays alongside the scalar
        assert!(response["channels"].is_array());
    }
}

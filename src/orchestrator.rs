// ABOUTME: Core broadcast pipeline: translate once, persist, fan out, reconcile
// ABOUTME: Channels run concurrently and report outcomes; only the ledger can fail a broadcast

use futures_util::future::join_all;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::channel::{ChannelKind, DeliveryDriver, DeliveryOutcome};
use crate::ledger::{BroadcastLedger, BroadcastRecord, NewBroadcast};
use crate::translate::Translator;

/// Which delivery channels a broadcast targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelSelection {
    PubSub,
    Telegram,
    #[default]
    All,
}

impl ChannelSelection {
    pub fn kinds(&self) -> Vec<ChannelKind> {
        match self {
            ChannelSelection::PubSub => vec![ChannelKind::PubSub],
            ChannelSelection::Telegram => vec![ChannelKind::Telegram],
            ChannelSelection::All => vec![ChannelKind::PubSub, ChannelKind::Telegram],
        }
    }
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("Broadcast message cannot be empty")]
    EmptyMessage,
    #[error("Broadcast ledger unavailable: {0}")]
    LedgerUnavailable(#[source] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct BroadcastRequest {
    pub message: String,
    /// Language the message was authored in; the configured baseline when absent
    pub source_language: Option<String>,
    pub location: Option<String>,
    pub radius: Option<u32>,
    pub emergency: bool,
    pub channels: ChannelSelection,
}

/// Everything a caller learns about a finished broadcast: the persisted
/// record's id, the translation map, and the per-channel tallies.
#[derive(Debug, Clone)]
pub struct BroadcastSummary {
    pub broadcast_id: i64,
    pub translations: BTreeMap<String, String>,
    pub translation_warnings: Vec<String>,
    pub delivered_count: u32,
    pub per_channel: Vec<DeliveryOutcome>,
    pub timestamp: String,
}

impl BroadcastSummary {
    pub fn failed_count(&self) -> u32 {
        self.per_channel.iter().map(|o| o.failure_count).sum()
    }

    pub fn outcome_for(&self, kind: ChannelKind) -> Option<&DeliveryOutcome> {
        self.per_channel.iter().find(|o| o.channel == kind)
    }
}

pub struct Orchestrator {
    translator: Translator,
    ledger: BroadcastLedger,
    drivers: Vec<Arc<dyn DeliveryDriver>>,
    catalog: Vec<String>,
    baseline_language: String,
}

impl Orchestrator {
    pub fn new(
        translator: Translator,
        ledger: BroadcastLedger,
        drivers: Vec<Arc<dyn DeliveryDriver>>,
        catalog: Vec<String>,
        baseline_language: String,
    ) -> Self {
        Self {
            translator,
            ledger,
            drivers,
            catalog,
            baseline_language,
        }
    }

    fn driver_for(&self, kind: ChannelKind) -> Option<&Arc<dyn DeliveryDriver>> {
        self.drivers.iter().find(|d| d.kind() == kind)
    }

    /// Run one broadcast end to end. The record hits the ledger before any
    /// delivery is attempted, so history never shows a send the caller
    /// cannot audit. Delivery failures are reported in the summary, never
    /// raised as errors.
    pub async fn broadcast(
        &self,
        request: BroadcastRequest,
    ) -> Result<BroadcastSummary, BroadcastError> {
        if request.message.trim().is_empty() {
            return Err(BroadcastError::EmptyMessage);
        }

        tracing::info!(
            emergency = request.emergency,
            channels = ?request.channels,
            "Broadcast requested"
        );

        let translation = self
            .translator
            .translate(&request.message, &self.catalog)
            .await;

        let source_language = request
            .source_language
            .clone()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| self.baseline_language.clone());

        let record = self
            .ledger
            .create(NewBroadcast {
                message: request.message.clone(),
                source_language,
                translations: translation.translations.clone(),
                location: request.location.clone(),
                radius: request.radius,
                emergency: request.emergency,
            })
            .map_err(BroadcastError::LedgerUnavailable)?;

        let per_channel = self.fan_out(&record, request.channels).await;

        let delivered_count: u32 = per_channel.iter().map(|o| o.success_count).sum();
        if let Err(e) = self.ledger.set_delivered_count(record.id, delivered_count) {
            // Deliveries already happened; a failed reconciliation is logged
            // rather than surfaced as a broadcast failure
            tracing::error!(
                broadcast_id = record.id,
                delivered = delivered_count,
                error = %e,
                "Failed to reconcile delivery count"
            );
        }

        tracing::info!(
            broadcast_id = record.id,
            delivered = delivered_count,
            channels = per_channel.len(),
            "Broadcast complete"
        );

        Ok(BroadcastSummary {
            broadcast_id: record.id,
            translations: record.translations,
            translation_warnings: translation.warnings,
            delivered_count,
            per_channel,
            timestamp: record.timestamp,
        })
    }

    /// Dispatch the record to every selected channel concurrently. A selected
    /// channel with no registered driver yields a zero-success outcome.
    async fn fan_out(
        &self,
        record: &BroadcastRecord,
        selection: ChannelSelection,
    ) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::new();
        let mut pending = Vec::new();

        for kind in selection.kinds() {
            match self.driver_for(kind) {
                Some(driver) => pending.push(driver.deliver(record)),
                None => {
                    tracing::warn!(channel = %kind, "Channel selected but not configured");
                    outcomes.push(DeliveryOutcome::channel_failed(
                        kind,
                        "channel not configured",
                    ));
                }
            }
        }

        outcomes.extend(join_all(pending).await);
        outcomes
    }
}

// =============================================================================
// Tests
// =============================================================================

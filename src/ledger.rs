// ABOUTME: Durable ledger of broadcast attempts and their reconciled delivery counts
// ABOUTME: Single source of truth for broadcast history and the analytics summary

use crate::store::SharedConnection;
use anyhow::Result;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Upper bound for `list_recent`; callers asking for more are clamped.
pub const MAX_LIST_LIMIT: usize = 200;

/// One broadcast attempt: the authored message, its translations, and
/// the delivery count reconciled after all channels finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRecord {
    pub id: i64,
    pub message: String,
    pub source_language: String,
    pub translations: BTreeMap<String, String>,
    pub location: Option<String>,
    pub radius: Option<u32>,
    pub emergency: bool,
    pub delivered_count: u32,
    pub timestamp: String,
}

/// Fields supplied by the caller when a broadcast is recorded.
#[derive(Debug, Clone)]
pub struct NewBroadcast {
    pub message: String,
    pub source_language: String,
    pub translations: BTreeMap<String, String>,
    pub location: Option<String>,
    pub radius: Option<u32>,
    pub emergency: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub total_broadcasts: u64,
    pub total_delivered: u64,
    pub subscriber_count: u64,
}

#[derive(Clone)]
pub struct BroadcastLedger {
    db: SharedConnection,
}

impl BroadcastLedger {
    pub fn new(db: SharedConnection) -> Self {
        Self { db }
    }

    /// Record a broadcast before any delivery is attempted.
    /// Assigns the id and timestamp; `delivered_count` starts at 0.
    pub fn create(&self, new: NewBroadcast) -> Result<BroadcastRecord> {
        if new.message.trim().is_empty() {
            anyhow::bail!("Broadcast message cannot be empty");
        }

        let timestamp = chrono::Utc::now().to_rfc3339();
        let translations_json = serde_json::to_string(&new.translations)?;

        let db = self
            .db
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        db.execute(
            "INSERT INTO broadcasts
             (message, source_language, location, radius, emergency, timestamp, delivered_count, translations)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
            params![
                &new.message,
                &new.source_language,
                &new.location,
                &new.radius,
                if new.emergency { 1 } else { 0 },
                &timestamp,
                &translations_json,
            ],
        )?;
        let id = db.last_insert_rowid();

        tracing::info!(
            broadcast_id = id,
            emergency = new.emergency,
            languages = new.translations.len(),
            "Broadcast recorded"
        );

        Ok(BroadcastRecord {
            id,
            message: new.message,
            source_language: new.source_language,
            translations: new.translations,
            location: new.location,
            radius: new.radius,
            emergency: new.emergency,
            delivered_count: 0,
            timestamp,
        })
    }

    /// Set the final delivery count for a broadcast. The update is a plain
    /// idempotent UPDATE so a retried reconciliation is harmless.
    pub fn set_delivered_count(&self, id: i64, count: u32) -> Result<()> {
        let db = self
            .db
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        let updated = db.execute(
            "UPDATE broadcasts SET delivered_count = ?1 WHERE id = ?2",
            params![count, id],
        )?;
        if updated == 0 {
            anyhow::bail!("No broadcast with id {}", id);
        }
        tracing::info!(broadcast_id = id, delivered = count, "Delivery count reconciled");
        Ok(())
    }

    /// Recent broadcasts, newest first, at most `limit` (clamped to MAX_LIST_LIMIT).
    pub fn list_recent(&self, limit: usize) -> Result<Vec<BroadcastRecord>> {
        let limit = limit.min(MAX_LIST_LIMIT);
        let db = self
            .db
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        let mut stmt = db.prepare(
            "SELECT id, message, source_language, location, radius, emergency,
                    timestamp, delivered_count, translations
             FROM broadcasts ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;

        let records = stmt
            .query_map(params![limit], |row| {
                let translations_json: String = row.get(8)?;
                let translations: BTreeMap<String, String> =
                    serde_json::from_str(&translations_json).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            8,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?;
                Ok(BroadcastRecord {
                    id: row.get(0)?,
                    message: row.get(1)?,
                    source_language: row.get(2)?,
                    location: row.get(3)?,
                    radius: row.get(4)?,
                    emergency: row.get::<_, i32>(5)? != 0,
                    timestamp: row.get(6)?,
                    delivered_count: row.get(7)?,
                    translations,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Totals over the whole ledger plus the current subscriber count.
    pub fn analytics(&self) -> Result<Analytics> {
        let db = self
            .db
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;

        let total_broadcasts: u64 =
            db.query_row("SELECT COUNT(*) FROM broadcasts", [], |row| row.get(0))?;
        let total_delivered: u64 = db.query_row(
            "SELECT COALESCE(SUM(delivered_count), 0) FROM broadcasts",
            [],
            |row| row.get(0),
        )?;
        let subscriber_count: u64 =
            db.query_row("SELECT COUNT(*) FROM subscribers", [], |row| row.get(0))?;

        Ok(Analytics {
            total_broadcasts,
            total_delivered,
            subscriber_count,
        })
    }

    /// Shared connection, for wiring other stores onto the same database.
    pub fn db_connection(&self) -> SharedConnection {
        Arc::clone(&self.db)
    }
}

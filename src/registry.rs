// ABOUTME: Subscriber registry backed by SQLite with a read-through cache
// ABOUTME: Upserts preserve the first subscription time; re-subscribing refreshes metadata

use crate::store::SharedConnection;
use anyhow::Result;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub id: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub language: String,
    pub subscribed_at: String,
    pub last_seen: String,
}

/// Fields accepted from a subscription event. Timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewSubscriber {
    pub id: i64,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub language: Option<String>,
}

#[derive(Clone)]
pub struct SubscriberRegistry {
    db: SharedConnection,
    baseline_language: String,
    /// Read-through cache keyed by subscriber id, invalidated on every upsert.
    cache: Arc<Mutex<HashMap<i64, Subscriber>>>,
}

impl SubscriberRegistry {
    pub fn new(db: SharedConnection, baseline_language: impl Into<String>) -> Self {
        Self {
            db,
            baseline_language: baseline_language.into(),
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Insert or update a subscriber. The first `subscribed_at` is preserved
    /// across re-subscription; everything else is last-write-wins.
    pub fn upsert(&self, new: NewSubscriber) -> Result<Subscriber> {
        let now = chrono::Utc::now().to_rfc3339();
        let language = new
            .language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| self.baseline_language.clone());

        {
            let db = self
                .db
                .lock()
                .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
            db.execute(
                "INSERT INTO subscribers (id, username, display_name, language, subscribed_at, last_seen)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    username = ?2,
                    display_name = ?3,
                    language = ?4,
                    last_seen = ?5",
                params![new.id, &new.username, &new.display_name, &language, &now],
            )?;
        }

        // Invalidate so the next read goes through to the database
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(&new.id);
        }

        let subscriber = self
            .get(new.id)?
            .ok_or_else(|| anyhow::anyhow!("Subscriber {} missing after upsert", new.id))?;

        tracing::info!(
            subscriber_id = subscriber.id,
            language = %subscriber.language,
            "Subscriber upserted"
        );
        Ok(subscriber)
    }

    /// Fetch one subscriber, serving repeat reads from the cache.
    pub fn get(&self, id: i64) -> Result<Option<Subscriber>> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(hit) = cache.get(&id) {
                return Ok(Some(hit.clone()));
            }
        }

        let loaded = {
            let db = self
                .db
                .lock()
                .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
            let mut stmt = db.prepare(
                "SELECT id, username, display_name, language, subscribed_at, last_seen
                 FROM subscribers WHERE id = ?1",
            )?;
            let subscriber = stmt.query_row(params![id], Self::row_to_subscriber);
            match subscriber {
                Ok(s) => Some(s),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            }
        };

        if let Some(ref s) = loaded {
            if let Ok(mut cache) = self.cache.lock() {
                cache.insert(id, s.clone());
            }
        }
        Ok(loaded)
    }

    /// Full roster, in subscription order. The chat driver fans out over this.
    pub fn list_all(&self) -> Result<Vec<Subscriber>> {
        let db = self
            .db
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        let mut stmt = db.prepare(
            "SELECT id, username, display_name, language, subscribed_at, last_seen
             FROM subscribers ORDER BY subscribed_at ASC, id ASC",
        )?;
        let subscribers = stmt
            .query_map([], Self::row_to_subscriber)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(subscribers)
    }

    pub fn count(&self) -> Result<u64> {
        let db = self
            .db
            .lock()
            .map_err(|e| anyhow::anyhow!("Database mutex poisoned: {}", e))?;
        let count = db.query_row("SELECT COUNT(*) FROM subscribers", [], |row| row.get(0))?;
        Ok(count)
    }

    fn row_to_subscriber(row: &rusqlite::Row) -> rusqlite::Result<Subscriber> {
        Ok(Subscriber {
            id: row.get(0)?,
            username: row.get(1)?,
            display_name: row.get(2)?,
            language: row.get(3)?,
            subscribed_at: row.get(4)?,
            last_seen: row.get(5)?,
        })
    }
}

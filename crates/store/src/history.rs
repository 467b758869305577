//! Actor history registry.
//!
//! One record per actor ever seen. Records are created on the first observed
//! command, updated on every later one (blocked commands included), and never
//! deleted.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::RwLock,
};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    tracing::warn,
};

use crate::{error::Result, json};

/// Durable per-actor activity record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorHistoryRecord {
    pub actor_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Registry of every actor ever seen, persisted as a JSON array.
pub struct HistoryStore {
    path: PathBuf,
    records: RwLock<HashMap<i64, ActorHistoryRecord>>,
}

impl HistoryStore {
    /// Load the history file (empty registry when absent).
    pub async fn load(path: PathBuf) -> Result<Self> {
        let list: Vec<ActorHistoryRecord> = json::load_or_default(&path).await?;
        let records = list.into_iter().map(|r| (r.actor_id, r)).collect();
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// Record activity for `actor_id`, creating the record on first sight.
    ///
    /// The username is filled in only when previously unknown, matching how
    /// chat platforms surface it intermittently.
    pub async fn record_activity(&self, actor_id: i64, username: Option<&str>) {
        let now = Utc::now();
        {
            let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
            let entry = records.entry(actor_id).or_insert_with(|| ActorHistoryRecord {
                actor_id,
                username: None,
                first_seen: now,
                last_active: now,
            });
            entry.last_active = now;
            if entry.username.is_none() {
                entry.username = username.map(str::to_string);
            }
        }
        self.persist().await;
    }

    /// Number of actors ever seen.
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Actor ids for broadcast fan-out, unordered.
    pub fn recipient_ids(&self) -> Vec<i64> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.keys().copied().collect()
    }

    /// Look up a single record.
    pub fn get(&self, actor_id: i64) -> Option<ActorHistoryRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.get(&actor_id).cloned()
    }

    /// One page of records, newest first. Returns the page slice and the
    /// total page count (at least 1).
    pub fn page(&self, page: usize, per_page: usize) -> (Vec<ActorHistoryRecord>, usize) {
        let mut all: Vec<ActorHistoryRecord> = {
            let records = self.records.read().unwrap_or_else(|e| e.into_inner());
            records.values().cloned().collect()
        };
        all.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));

        let total_pages = all.len().div_ceil(per_page).max(1);
        let start = page.saturating_sub(1) * per_page;
        let slice = if start >= all.len() {
            Vec::new()
        } else {
            all[start..(start + per_page).min(all.len())].to_vec()
        };
        (slice, total_pages)
    }

    /// Actors whose last activity falls on the given UTC date.
    pub fn active_on(&self, date: chrono::NaiveDate) -> usize {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .values()
            .filter(|r| r.last_active.date_naive() == date)
            .count()
    }

    async fn persist(&self) {
        let snapshot: Vec<ActorHistoryRecord> = {
            let records = self.records.read().unwrap_or_else(|e| e.into_inner());
            records.values().cloned().collect()
        };
        if let Err(e) = json::save(&self.path, &snapshot).await {
            warn!(path = %self.path.display(), error = %e, "failed to persist actor history");
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_command_creates_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::load(dir.path().join("history.json")).await.unwrap();

        store.record_activity(42, Some("alice")).await;

        let rec = store.get(42).unwrap();
        assert_eq!(rec.username.as_deref(), Some("alice"));
        assert_eq!(rec.first_seen, rec.last_active);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn later_commands_touch_last_active_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::load(dir.path().join("history.json")).await.unwrap();

        store.record_activity(42, None).await;
        let first = store.get(42).unwrap();
        store.record_activity(42, Some("alice")).await;
        let second = store.get(42).unwrap();

        assert_eq!(first.first_seen, second.first_seen);
        assert!(second.last_active >= first.last_active);
        // Username backfilled once known.
        assert_eq!(second.username.as_deref(), Some("alice"));

        // A different username later does not overwrite it.
        store.record_activity(42, Some("impostor")).await;
        assert_eq!(store.get(42).unwrap().username.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        {
            let store = HistoryStore::load(path.clone()).await.unwrap();
            store.record_activity(1, Some("a")).await;
            store.record_activity(2, None).await;
        }
        let store = HistoryStore::load(path).await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(1).unwrap().username.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn pagination_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::load(dir.path().join("history.json")).await.unwrap();
        for id in 1..=7 {
            store.record_activity(id, None).await;
        }

        let (page1, total) = store.page(1, 5);
        assert_eq!(total, 2);
        assert_eq!(page1.len(), 5);
        // Most recently first-seen actor leads.
        assert_eq!(page1[0].actor_id, 7);

        let (page2, _) = store.page(2, 5);
        assert_eq!(page2.len(), 2);

        let (page3, _) = store.page(3, 5);
        assert!(page3.is_empty());
    }

    #[tokio::test]
    async fn empty_store_has_one_page() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::load(dir.path().join("history.json")).await.unwrap();
        let (records, total) = store.page(1, 5);
        assert!(records.is_empty());
        assert_eq!(total, 1);
    }
}

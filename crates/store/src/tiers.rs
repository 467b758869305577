//! Premium tier membership and the admin allow-list.
//!
//! Both lists are persisted as JSON arrays and can also be edited out of
//! band; [`crate::watch::StoreWatcher`] notifies the gateway, which calls
//! `replace_all` with the re-read contents.

use std::{path::PathBuf, sync::RwLock};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    tracing::{info, warn},
};

use crate::{error::Result, json};

/// Time-limited premium membership for one actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierMembership {
    pub actor_id: i64,
    pub expires_at: DateTime<Utc>,
}

/// Premium membership list. An actor is premium iff a record exists and its
/// expiry is in the future.
pub struct TierStore {
    path: PathBuf,
    entries: RwLock<Vec<TierMembership>>,
}

impl TierStore {
    pub async fn load(path: PathBuf) -> Result<Self> {
        let entries: Vec<TierMembership> = json::load_or_default(&path).await?;
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn is_premium(&self, actor_id: i64, now: DateTime<Utc>) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .any(|m| m.actor_id == actor_id && m.expires_at > now)
    }

    /// Grant (or extend) membership until `expires_at`. Returns `true` when
    /// the actor already had a record.
    pub async fn grant(&self, actor_id: i64, expires_at: DateTime<Utc>) -> bool {
        let existed = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            match entries.iter_mut().find(|m| m.actor_id == actor_id) {
                Some(existing) => {
                    existing.expires_at = expires_at;
                    true
                },
                None => {
                    entries.push(TierMembership { actor_id, expires_at });
                    false
                },
            }
        };
        self.persist().await;
        existed
    }

    /// Remove membership. Returns `false` when no record existed.
    pub async fn revoke(&self, actor_id: i64) -> bool {
        let removed = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            let before = entries.len();
            entries.retain(|m| m.actor_id != actor_id);
            entries.len() != before
        };
        if removed {
            self.persist().await;
        }
        removed
    }

    pub fn list(&self) -> Vec<TierMembership> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn active_count(&self, now: DateTime<Utc>) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.iter().filter(|m| m.expires_at > now).count()
    }

    /// Replace the whole list after an external edit (hot reload).
    pub fn replace_all(&self, entries: Vec<TierMembership>) {
        info!(count = entries.len(), "premium list reloaded from disk");
        *self.entries.write().unwrap_or_else(|e| e.into_inner()) = entries;
    }

    async fn persist(&self) {
        let snapshot = self.list();
        if let Err(e) = json::save(&self.path, &snapshot).await {
            warn!(path = %self.path.display(), error = %e, "failed to persist premium list");
        }
    }
}

/// Admin allow-list: actors permitted to manage tier membership.
pub struct AdminStore {
    path: PathBuf,
    ids: RwLock<Vec<i64>>,
}

impl AdminStore {
    pub async fn load(path: PathBuf) -> Result<Self> {
        let ids: Vec<i64> = json::load_or_default(&path).await?;
        Ok(Self {
            path,
            ids: RwLock::new(ids),
        })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn contains(&self, actor_id: i64) -> bool {
        self.ids
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&actor_id)
    }

    pub fn len(&self) -> usize {
        self.ids.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `false` when the actor was already an admin.
    pub async fn add(&self, actor_id: i64) -> bool {
        let added = {
            let mut ids = self.ids.write().unwrap_or_else(|e| e.into_inner());
            if ids.contains(&actor_id) {
                false
            } else {
                ids.push(actor_id);
                true
            }
        };
        if added {
            self.persist().await;
        }
        added
    }

    /// Returns `false` when the actor was not an admin.
    pub async fn remove(&self, actor_id: i64) -> bool {
        let removed = {
            let mut ids = self.ids.write().unwrap_or_else(|e| e.into_inner());
            let before = ids.len();
            ids.retain(|id| *id != actor_id);
            ids.len() != before
        };
        if removed {
            self.persist().await;
        }
        removed
    }

    pub fn replace_all(&self, ids: Vec<i64>) {
        info!(count = ids.len(), "admin list reloaded from disk");
        *self.ids.write().unwrap_or_else(|e| e.into_inner()) = ids;
    }

    async fn persist(&self) {
        let snapshot = self.ids.read().unwrap_or_else(|e| e.into_inner()).clone();
        if let Err(e) = json::save(&self.path, &snapshot).await {
            warn!(path = %self.path.display(), error = %e, "failed to persist admin list");
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use {super::*, chrono::Duration};

    #[tokio::test]
    async fn premium_requires_unexpired_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = TierStore::load(dir.path().join("premium.json")).await.unwrap();
        let now = Utc::now();

        assert!(!store.is_premium(1, now));

        store.grant(1, now + Duration::days(30)).await;
        assert!(store.is_premium(1, now));

        store.grant(2, now - Duration::hours(1)).await;
        assert!(!store.is_premium(2, now), "expired record is not premium");

        assert_eq!(store.active_count(now), 1);
    }

    #[tokio::test]
    async fn grant_extends_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = TierStore::load(dir.path().join("premium.json")).await.unwrap();
        let now = Utc::now();

        assert!(!store.grant(1, now + Duration::days(1)).await);
        assert!(store.grant(1, now + Duration::days(60)).await);

        let list = store.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].expires_at, now + Duration::days(60));
    }

    #[tokio::test]
    async fn revoke_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = TierStore::load(dir.path().join("premium.json")).await.unwrap();
        let now = Utc::now();

        store.grant(1, now + Duration::days(1)).await;
        assert!(store.revoke(1).await);
        assert!(!store.revoke(1).await);
        assert!(!store.is_premium(1, now));
    }

    #[tokio::test]
    async fn admin_add_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = AdminStore::load(dir.path().join("admins.json")).await.unwrap();

        assert!(store.add(7).await);
        assert!(!store.add(7).await);
        assert!(store.contains(7));
        assert!(store.remove(7).await);
        assert!(!store.remove(7).await);
        assert!(!store.contains(7));
    }

    #[tokio::test]
    async fn replace_all_hot_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let store = TierStore::load(dir.path().join("premium.json")).await.unwrap();
        let now = Utc::now();

        store.replace_all(vec![TierMembership {
            actor_id: 9,
            expires_at: now + Duration::days(1),
        }]);
        assert!(store.is_premium(9, now));
    }
}

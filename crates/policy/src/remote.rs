//! Remote kill-switch cache.
//!
//! The maintenance key is fetched from a remote source, cached with a TTL,
//! and served stale when the fetch fails. Availability wins over freshness:
//! briefly serving during an intended outage costs less than refusing service
//! on a transient network blip. A background tick refreshes the key even when
//! no commands arrive, so the first command after a long idle period does not
//! pay the fetch latency.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

use crate::error::{Error, Result};

/// How long a fetched value stays fresh.
pub const REMOTE_CACHE_TTL: Duration = Duration::from_secs(30);

/// Interval of the proactive background refresh.
pub const REMOTE_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Hard timeout on a single remote fetch.
pub const REMOTE_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote maintenance state as published by the fleet operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RemoteMaintenance {
    pub enabled: bool,
    pub reason: String,
    /// When set, operator accounts may bypass the remote block.
    pub allow_operator_bypass: bool,
}

/// Fetches the remote maintenance key. Behind a trait so the cache logic can
/// be exercised without a network.
#[async_trait]
pub trait ConfigFetcher: Send + Sync {
    async fn fetch_maintenance(&self) -> anyhow::Result<RemoteMaintenance>;
}

/// HTTP fetcher against a JSON document at `<base_url>/maintenance.json`.
pub struct HttpFetcher {
    http: reqwest::Client,
    url: String,
}

impl HttpFetcher {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REMOTE_FETCH_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            url: format!("{}/maintenance.json", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl ConfigFetcher for HttpFetcher {
    async fn fetch_maintenance(&self) -> anyhow::Result<RemoteMaintenance> {
        let state = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .json::<RemoteMaintenance>()
            .await?;
        Ok(state)
    }
}

struct CacheSlot {
    value: RemoteMaintenance,
    fetched_at: Instant,
}

/// TTL cache over a [`ConfigFetcher`] with stale fallback.
pub struct RemoteConfigCache {
    fetcher: Arc<dyn ConfigFetcher>,
    slot: Mutex<Option<CacheSlot>>,
    ttl: Duration,
}

impl RemoteConfigCache {
    pub fn new(fetcher: Arc<dyn ConfigFetcher>) -> Self {
        Self::with_ttl(fetcher, REMOTE_CACHE_TTL)
    }

    pub fn with_ttl(fetcher: Arc<dyn ConfigFetcher>, ttl: Duration) -> Self {
        Self {
            fetcher,
            slot: Mutex::new(None),
            ttl,
        }
    }

    /// Current maintenance state: cached when fresh, fetched otherwise. On
    /// fetch failure the last known value (even expired) is returned; the
    /// error only propagates when nothing was ever cached.
    pub async fn maintenance(&self) -> Result<RemoteMaintenance> {
        if let Some(value) = self.fresh() {
            return Ok(value);
        }
        self.refresh().await
    }

    /// Last known value regardless of age, without fetching.
    pub fn last_known(&self) -> Option<RemoteMaintenance> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref().map(|s| s.value.clone())
    }

    /// Force a fetch, falling back to the stale value on failure.
    pub async fn refresh(&self) -> Result<RemoteMaintenance> {
        match self.fetcher.fetch_maintenance().await {
            Ok(value) => {
                let previous = {
                    let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
                    let previous = slot.as_ref().map(|s| s.value.enabled);
                    *slot = Some(CacheSlot {
                        value: value.clone(),
                        fetched_at: Instant::now(),
                    });
                    previous
                };
                if previous != Some(value.enabled) {
                    info!(
                        enabled = value.enabled,
                        reason = %value.reason,
                        allow_operator_bypass = value.allow_operator_bypass,
                        "remote maintenance state changed"
                    );
                }
                Ok(value)
            },
            Err(e) => {
                if let Some(stale) = self.last_known() {
                    warn!(error = %e, "remote config fetch failed, serving cached value");
                    Ok(stale)
                } else {
                    Err(Error::RemoteUnavailable {
                        context: "maintenance key".into(),
                        source: e.into(),
                    })
                }
            },
        }
    }

    fn fresh(&self) -> Option<RemoteMaintenance> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        slot.as_ref()
            .filter(|s| s.fetched_at.elapsed() < self.ttl)
            .map(|s| s.value.clone())
    }

    /// Spawn the periodic refresh task. The returned token stops it.
    pub fn spawn_refresh(self: Arc<Self>, interval: Duration) -> CancellationToken {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let cache = self;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel_clone.cancelled() => break,
                    () = tokio::time::sleep(interval) => {
                        if let Err(e) = cache.refresh().await {
                            warn!(error = %e, "remote maintenance refresh failed");
                        }
                    },
                }
            }
        });
        cancel
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct ScriptedFetcher {
        calls: AtomicUsize,
        // One entry per call: Some(state) for success, None for failure.
        script: Vec<Option<RemoteMaintenance>>,
    }

    impl ScriptedFetcher {
        fn new(script: Vec<Option<RemoteMaintenance>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                script,
            }
        }
    }

    #[async_trait]
    impl ConfigFetcher for ScriptedFetcher {
        async fn fetch_maintenance(&self) -> anyhow::Result<RemoteMaintenance> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.script.get(i).cloned().flatten() {
                Some(state) => Ok(state),
                None => anyhow::bail!("fetch failed"),
            }
        }
    }

    fn enabled(reason: &str) -> RemoteMaintenance {
        RemoteMaintenance {
            enabled: true,
            reason: reason.into(),
            allow_operator_bypass: false,
        }
    }

    #[tokio::test]
    async fn fresh_value_is_served_from_cache() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Some(enabled("upgrade"))]));
        let cache = RemoteConfigCache::new(Arc::clone(&fetcher) as Arc<dyn ConfigFetcher>);

        let first = cache.maintenance().await.unwrap();
        let second = cache.maintenance().await.unwrap();
        assert_eq!(first, second);
        // Second call never hit the fetcher.
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_failure_serves_stale_value() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![Some(enabled("v1")), None]));
        let cache = RemoteConfigCache::with_ttl(
            Arc::clone(&fetcher) as Arc<dyn ConfigFetcher>,
            Duration::ZERO,
        );

        let first = cache.maintenance().await.unwrap();
        // TTL zero forces a refetch, which fails; the stale value comes back.
        let second = cache.maintenance().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.reason, "v1");
    }

    #[tokio::test]
    async fn fetch_failure_without_cache_propagates() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![None]));
        let cache = RemoteConfigCache::new(fetcher as Arc<dyn ConfigFetcher>);
        assert!(cache.maintenance().await.is_err());
        assert!(cache.last_known().is_none());
    }

    #[tokio::test]
    async fn expired_value_refetches() {
        let fetcher = Arc::new(ScriptedFetcher::new(vec![
            Some(enabled("v1")),
            Some(enabled("v2")),
        ]));
        let cache = RemoteConfigCache::with_ttl(
            Arc::clone(&fetcher) as Arc<dyn ConfigFetcher>,
            Duration::ZERO,
        );

        assert_eq!(cache.maintenance().await.unwrap().reason, "v1");
        assert_eq!(cache.maintenance().await.unwrap().reason, "v2");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }
}

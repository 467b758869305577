//! Local maintenance flag.
//!
//! Independent of the remote kill-switch: a single-instance operator toggles
//! it, the gateway persists it, and only operators pass while it is on.

use std::sync::RwLock;

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

/// Persisted shape of the local maintenance flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LocalMaintenance {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
}

/// In-memory handle over the local maintenance flag. Persistence is the
/// caller's concern (the gateway rewrites the flag file after each toggle).
pub struct MaintenanceFlag {
    inner: RwLock<LocalMaintenance>,
}

impl MaintenanceFlag {
    pub fn new(state: LocalMaintenance) -> Self {
        Self {
            inner: RwLock::new(state),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).enabled
    }

    pub fn snapshot(&self) -> LocalMaintenance {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Enable the flag. Returns `false` when it was already on.
    pub fn enable(&self) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.enabled {
            return false;
        }
        inner.enabled = true;
        inner.since = Some(Utc::now());
        true
    }

    /// Disable the flag. Returns `false` when it was already off.
    pub fn disable(&self) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if !inner.enabled {
            return false;
        }
        inner.enabled = false;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_reports_changes_only() {
        let flag = MaintenanceFlag::new(LocalMaintenance::default());
        assert!(!flag.is_enabled());

        assert!(flag.enable());
        assert!(!flag.enable());
        assert!(flag.is_enabled());
        assert!(flag.snapshot().since.is_some());

        assert!(flag.disable());
        assert!(!flag.disable());
        assert!(!flag.is_enabled());
    }

    #[test]
    fn since_survives_disable() {
        let flag = MaintenanceFlag::new(LocalMaintenance::default());
        flag.enable();
        let since = flag.snapshot().since;
        flag.disable();
        assert_eq!(flag.snapshot().since, since);
    }
}

//! Bounded rolling error log.
//!
//! Keeps the most recent entries (handler faults, broadcast failures) both in
//! memory and in a JSON file so an operator can inspect recent trouble
//! without log-file access.

use std::{collections::VecDeque, path::PathBuf, sync::Mutex};

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    tracing::warn,
};

use crate::{error::Result, json};

/// Maximum retained entries.
pub const ERROR_LOG_CAP: usize = 100;

/// One logged failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub timestamp: DateTime<Utc>,
    /// Where the failure happened ("broadcast", "/send", ...).
    pub context: String,
    pub detail: String,
}

/// Rolling log of the last [`ERROR_LOG_CAP`] failures.
pub struct ErrorLog {
    path: PathBuf,
    entries: Mutex<VecDeque<ErrorLogEntry>>,
}

impl ErrorLog {
    pub async fn load(path: PathBuf) -> Result<Self> {
        let list: Vec<ErrorLogEntry> = json::load_or_default(&path).await?;
        let mut entries: VecDeque<ErrorLogEntry> = list.into();
        while entries.len() > ERROR_LOG_CAP {
            entries.pop_front();
        }
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Append an entry, evicting the oldest once the cap is reached.
    pub async fn record(&self, context: impl Into<String>, detail: impl Into<String>) {
        let entry = ErrorLogEntry {
            timestamp: Utc::now(),
            context: context.into(),
            detail: detail.into(),
        };
        {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.push_back(entry);
            while entries.len() > ERROR_LOG_CAP {
                entries.pop_front();
            }
        }
        self.persist().await;
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn recent(&self, n: usize) -> Vec<ErrorLogEntry> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.iter().rev().take(n).cloned().collect()
    }

    async fn persist(&self) {
        let snapshot: Vec<ErrorLogEntry> = {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.iter().cloned().collect()
        };
        if let Err(e) = json::save(&self.path, &snapshot).await {
            warn!(path = %self.path.display(), error = %e, "failed to persist error log");
        }
    }
}

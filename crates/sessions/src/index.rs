//! Persisted session metadata.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one actor's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Uninitialized,
    Pairing,
    Connected,
    Disconnected,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Pairing => "pairing",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
        };
        write!(f, "{s}")
    }
}

/// One entry of the persisted session index. The live connection handle is
/// runtime-only and never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub actor_id: i64,
    /// External network identifier (phone number).
    pub number: String,
    pub status: SessionStatus,
    pub credential_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&SessionStatus::Disconnected).unwrap();
        assert_eq!(json, "\"disconnected\"");
    }

    #[test]
    fn record_roundtrips_without_handle_fields() {
        let record = SessionRecord {
            actor_id: 7,
            number: "628123".into(),
            status: SessionStatus::Connected,
            credential_dir: PathBuf::from("/data/sessions/actor_7"),
            username: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("username"));
        let back: SessionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.actor_id, 7);
        assert_eq!(back.status, SessionStatus::Connected);
    }
}

//! Gateway configuration.
//!
//! Loaded from `tether.{toml,json}` in the working directory or
//! `~/.config/tether/`, with the bot token overridable through the
//! `TETHER_BOT_TOKEN` environment variable.

use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    serde::Deserialize,
    tracing::{debug, warn},
};

use crate::error::{Error, Result};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["tether.toml", "tether.json"];

/// Gateway-wide configuration.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Bot token from @BotFather.
    pub token: Secret<String>,

    /// Operator account ids.
    pub operator_ids: Vec<i64>,

    /// Base URL of the remote config source (kill-switch). Remote
    /// maintenance checks are skipped when unset.
    pub remote_config_url: Option<String>,

    /// Websocket endpoint of the messenger sidecar.
    pub sidecar_url: String,

    /// Directory holding all durable state.
    pub data_dir: PathBuf,

    /// Minimum interval between progress-message edits (ms).
    pub edit_throttle_ms: u64,

    /// Interval of the proactive remote maintenance refresh (seconds).
    pub remote_refresh_secs: u64,
}

impl std::fmt::Debug for TetherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TetherConfig")
            .field("token", &"[REDACTED]")
            .field("operator_ids", &self.operator_ids)
            .field("remote_config_url", &self.remote_config_url)
            .field("sidecar_url", &self.sidecar_url)
            .field("data_dir", &self.data_dir)
            .finish_non_exhaustive()
    }
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            token: Secret::new(String::new()),
            operator_ids: Vec::new(),
            remote_config_url: None,
            sidecar_url: tether_sessions::sidecar::DEFAULT_SIDECAR_URL.into(),
            data_dir: PathBuf::from("data"),
            edit_throttle_ms: 600,
            remote_refresh_secs: 30,
        }
    }
}

impl TetherConfig {
    pub fn is_operator(&self, actor_id: i64) -> bool {
        self.operator_ids.contains(&actor_id)
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    pub fn session_index_path(&self) -> PathBuf {
        self.data_dir.join("sessions.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join("history.json")
    }

    pub fn premium_path(&self) -> PathBuf {
        self.data_dir.join("premium.json")
    }

    pub fn admins_path(&self) -> PathBuf {
        self.data_dir.join("admins.json")
    }

    pub fn cooldown_path(&self) -> PathBuf {
        self.data_dir.join("cooldown.json")
    }

    pub fn maintenance_path(&self) -> PathBuf {
        self.data_dir.join("maintenance.json")
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.data_dir.join("errors.json")
    }
}

/// Load config from the given path (format by extension).
pub fn load_config(path: &Path) -> Result<TetherConfig> {
    let raw = std::fs::read_to_string(path)?;
    let mut config: TetherConfig = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&raw)?,
        Some("json") => serde_json::from_str(&raw)?,
        other => {
            return Err(Error::config(format!(
                "unsupported config extension: {other:?}"
            )));
        },
    };
    if let Ok(token) = std::env::var("TETHER_BOT_TOKEN") {
        config.token = Secret::new(token);
    }
    Ok(config)
}

/// Discover and load config from standard locations.
///
/// Search order: project-local `tether.{toml,json}`, then the user config
/// directory. Falls back to defaults when nothing is found or parsing fails.
pub fn discover_and_load() -> TetherConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(config) => return config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    TetherConfig::default()
}

fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    if let Some(dirs) = directories::ProjectDirs::from("", "", "tether") {
        let config_dir = dirs.config_dir();
        for name in CONFIG_FILENAMES {
            let p = config_dir.join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }

    None
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use {secrecy::ExposeSecret, super::*};

    #[test]
    fn defaults() {
        let config = TetherConfig::default();
        assert!(config.operator_ids.is_empty());
        assert_eq!(config.edit_throttle_ms, 600);
        assert_eq!(config.remote_refresh_secs, 30);
        assert_eq!(config.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn loads_toml_with_partial_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        std::fs::write(
            &path,
            r#"
token = "123:ABC"
operator_ids = [111, 222]
remote_config_url = "https://example.com/fleet"
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.token.expose_secret(), "123:ABC");
        assert!(config.is_operator(111));
        assert!(!config.is_operator(333));
        assert_eq!(
            config.remote_config_url.as_deref(),
            Some("https://example.com/fleet")
        );
        // Unspecified fields keep defaults.
        assert_eq!(config.edit_throttle_ms, 600);
    }

    #[test]
    fn data_paths_hang_off_data_dir() {
        let config = TetherConfig {
            data_dir: PathBuf::from("/var/lib/tether"),
            ..Default::default()
        };
        assert_eq!(
            config.premium_path(),
            PathBuf::from("/var/lib/tether/premium.json")
        );
        assert_eq!(
            config.sessions_dir(),
            PathBuf::from("/var/lib/tether/sessions")
        );
    }
}

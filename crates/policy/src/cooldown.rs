//! Per-actor, per-tier cooldown for privileged commands.
//!
//! A permitted use reserves the actor's slot; a blocked attempt reports the
//! remaining wait without touching the slot, so hammering the command never
//! extends the window.

use std::{
    collections::HashMap,
    sync::{Mutex, RwLock},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

/// Access class of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Operator,
    Premium,
    Free,
}

/// Cooldown windows in seconds, one per tier. Persisted by the gateway and
/// adjustable at runtime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CooldownConfig {
    pub free: u64,
    pub premium: u64,
    pub operator: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            free: 300,
            premium: 60,
            operator: 0,
        }
    }
}

impl CooldownConfig {
    pub fn window_for(&self, tier: Tier) -> Duration {
        let secs = match tier {
            Tier::Operator => self.operator,
            Tier::Premium => self.premium,
            Tier::Free => self.free,
        };
        Duration::from_secs(secs)
    }
}

/// Outcome of parsing a per-tier window update string.
///
/// Invalid fields land in `rejected` without discarding the valid ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowUpdate {
    pub free: Option<u64>,
    pub premium: Option<u64>,
    pub operator: Option<u64>,
    pub rejected: Vec<String>,
}

impl WindowUpdate {
    pub fn is_empty(&self) -> bool {
        self.free.is_none() && self.premium.is_none() && self.operator.is_none()
    }
}

/// Parse an update like `free:5m premium:1m operator:0`.
pub fn parse_window_update(input: &str) -> WindowUpdate {
    let mut update = WindowUpdate::default();
    for token in input.split_whitespace() {
        let Some((field, value)) = token.split_once(':') else {
            update.rejected.push(token.to_string());
            continue;
        };
        let parsed = parse_duration_secs(value);
        let slot = match field.to_ascii_lowercase().as_str() {
            "free" => &mut update.free,
            "premium" => &mut update.premium,
            "operator" => &mut update.operator,
            _ => {
                update.rejected.push(token.to_string());
                continue;
            },
        };
        match parsed {
            Some(secs) => *slot = Some(secs),
            None => update.rejected.push(token.to_string()),
        }
    }
    update
}

/// Parse a unit-suffixed duration: bare number means seconds, `s`/`m`/`h`/`d`
/// scale accordingly. Fractional values are floored to whole seconds.
pub fn parse_duration_secs(input: &str) -> Option<u64> {
    let trimmed = input.trim().to_ascii_lowercase();
    if trimmed.is_empty() {
        return None;
    }
    let (number, unit) = match trimmed.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => (&trimmed[..trimmed.len() - 1], c),
        _ => (trimmed.as_str(), 's'),
    };
    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let scale = match unit {
        's' => 1.0,
        'm' => 60.0,
        'h' => 3600.0,
        'd' => 86400.0,
        _ => return None,
    };
    Some((value * scale).floor() as u64)
}

/// Render a window for the operator surface.
pub fn format_window(seconds: u64) -> String {
    if seconds == 0 {
        return "No Cooldown".into();
    }
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{days} Day{}", if days > 1 { "s" } else { "" }));
    }
    if hours > 0 {
        parts.push(format!("{hours} Hour{}", if hours > 1 { "s" } else { "" }));
    }
    if minutes > 0 {
        parts.push(format!("{minutes} Minute{}", if minutes > 1 { "s" } else { "" }));
    }
    if secs > 0 && days == 0 && hours == 0 {
        parts.push(format!("{secs} Second{}", if secs > 1 { "s" } else { "" }));
    }
    parts.join(", ")
}

/// Per-actor cooldown ledger.
pub struct CooldownRegistry {
    entries: Mutex<HashMap<i64, Instant>>,
    config: RwLock<CooldownConfig>,
}

impl CooldownRegistry {
    pub fn new(config: CooldownConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config: RwLock::new(config),
        }
    }

    pub fn config(&self) -> CooldownConfig {
        *self.config.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_config(&self, config: CooldownConfig) {
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
    }

    /// Returns 0 and reserves the slot when the actor may act now; otherwise
    /// the remaining whole seconds (ceiling), leaving the slot untouched.
    pub fn check_and_reserve(&self, actor_id: i64, tier: Tier) -> u64 {
        let window = self.config().window_for(tier);
        if window.is_zero() {
            return 0;
        }

        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(last) = entries.get(&actor_id) {
            let elapsed = now.duration_since(*last);
            if elapsed < window {
                let remaining = window - elapsed;
                return remaining.as_millis().div_ceil(1000) as u64;
            }
        }
        entries.insert(actor_id, now);
        0
    }

    /// Drop entries older than the widest window. Memory hygiene only; an
    /// expired entry already permits.
    pub fn evict_expired(&self) {
        let config = self.config();
        let widest = Duration::from_secs(config.free.max(config.premium).max(config.operator));
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, last| now.duration_since(*last) < widest);
    }

    #[cfg(test)]
    fn backdate(&self, actor_id: i64, by: Duration) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(last) = entries.get_mut(&actor_id) {
            *last = last.checked_sub(by).unwrap_or(*last);
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    fn registry(free: u64, premium: u64, operator: u64) -> CooldownRegistry {
        CooldownRegistry::new(CooldownConfig {
            free,
            premium,
            operator,
        })
    }

    #[test]
    fn first_use_reserves_then_blocks_then_permits_again() {
        let reg = registry(300, 60, 0);

        assert_eq!(reg.check_and_reserve(1, Tier::Free), 0);

        let remaining = reg.check_and_reserve(1, Tier::Free);
        assert!(remaining > 0 && remaining <= 300, "remaining={remaining}");

        // Simulate the window elapsing.
        reg.backdate(1, Duration::from_secs(301));
        assert_eq!(reg.check_and_reserve(1, Tier::Free), 0);
    }

    #[test]
    fn blocked_attempt_does_not_extend_window() {
        let reg = registry(300, 60, 0);
        assert_eq!(reg.check_and_reserve(1, Tier::Free), 0);
        reg.backdate(1, Duration::from_secs(200));

        let first = reg.check_and_reserve(1, Tier::Free);
        let second = reg.check_and_reserve(1, Tier::Free);
        // If the blocked attempt had reserved, the second reading would jump
        // back up toward the full window.
        assert!(second <= first, "second={second} first={first}");
        assert!(first <= 100);
    }

    #[test]
    fn zero_window_always_permits() {
        let reg = registry(300, 60, 0);
        for _ in 0..5 {
            assert_eq!(reg.check_and_reserve(9, Tier::Operator), 0);
        }
    }

    #[test]
    fn tiers_use_their_own_window() {
        let reg = registry(300, 60, 0);
        assert_eq!(reg.check_and_reserve(1, Tier::Premium), 0);
        reg.backdate(1, Duration::from_secs(61));
        assert_eq!(reg.check_and_reserve(1, Tier::Premium), 0);
    }

    #[test]
    fn evict_expired_keeps_live_entries() {
        let reg = registry(300, 60, 0);
        reg.check_and_reserve(1, Tier::Free);
        reg.check_and_reserve(2, Tier::Free);
        reg.backdate(1, Duration::from_secs(400));

        reg.evict_expired();

        let entries = reg.entries.lock().unwrap();
        assert!(!entries.contains_key(&1));
        assert!(entries.contains_key(&2));
    }

    #[rstest]
    #[case("0", Some(0))]
    #[case("300", Some(300))]
    #[case("45s", Some(45))]
    #[case("5m", Some(300))]
    #[case("1.5m", Some(90))]
    #[case("2h", Some(7200))]
    #[case("1d", Some(86400))]
    #[case(" 10 ", Some(10))]
    #[case("", None)]
    #[case("abc", None)]
    #[case("5x", None)]
    #[case("-3", None)]
    fn duration_parsing(#[case] input: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_duration_secs(input), expected);
    }

    #[test]
    fn window_update_keeps_valid_fields_on_partial_failure() {
        let update = parse_window_update("free:5m premium:oops operator:0");
        assert_eq!(update.free, Some(300));
        assert_eq!(update.premium, None);
        assert_eq!(update.operator, Some(0));
        assert_eq!(update.rejected, vec!["premium:oops".to_string()]);
    }

    #[test]
    fn window_update_rejects_unknown_fields() {
        let update = parse_window_update("gold:10s");
        assert!(update.is_empty());
        assert_eq!(update.rejected.len(), 1);
    }

    #[test]
    fn format_window_examples() {
        assert_eq!(format_window(0), "No Cooldown");
        assert_eq!(format_window(45), "45 Seconds");
        assert_eq!(format_window(300), "5 Minutes");
        assert_eq!(format_window(3660), "1 Hour, 1 Minute");
        assert_eq!(format_window(90000), "1 Day, 1 Hour");
    }
}

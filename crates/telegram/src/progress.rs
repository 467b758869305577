//! Throttled progress-message edits.
//!
//! Long-running operations report through a single message that is edited in
//! place. Edits are deduplicated per target so a chatty operation never
//! exceeds the platform's edit-rate tolerance; completion (100%) always goes
//! through.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use {async_trait::async_trait, tracing::warn};

/// Default minimum interval between applied edits per target.
pub const DEFAULT_EDIT_THROTTLE: Duration = Duration::from_millis(600);

const BAR_CELLS: usize = 10;

/// A single editable chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EditTarget {
    pub chat_id: i64,
    pub message_id: i32,
}

/// How the transport handled an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Applied,
    /// The content was identical; the platform treats this as an error but it
    /// is an idempotent no-op for us.
    Unchanged,
    /// The target message no longer exists.
    Missing,
}

/// Edit transport, behind a trait so the throttle logic runs without a bot.
#[async_trait]
pub trait EditSink: Send + Sync {
    async fn edit_text(&self, target: EditTarget, text: &str) -> anyhow::Result<EditOutcome>;
}

/// Throttles and deduplicates status-update edits per target message.
pub struct ProgressReporter {
    sink: Arc<dyn EditSink>,
    min_interval: Duration,
    last_applied: Mutex<HashMap<EditTarget, Instant>>,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn EditSink>) -> Self {
        Self::with_min_interval(sink, DEFAULT_EDIT_THROTTLE)
    }

    pub fn with_min_interval(sink: Arc<dyn EditSink>, min_interval: Duration) -> Self {
        Self {
            sink,
            min_interval,
            last_applied: Mutex::new(HashMap::new()),
        }
    }

    /// Edit `target` to show `status` at `percent`. Returns whether an edit
    /// was applied. Sub-completion updates inside the throttle window are
    /// suppressed without a network call; 100% always applies.
    pub async fn update(&self, target: EditTarget, percent: u8, status: &str) -> bool {
        if percent < 100 && self.throttled(target) {
            return false;
        }

        let text = format!(
            "{status}\n[{}] {percent}%",
            progress_bar(percent.min(100))
        );
        match self.sink.edit_text(target, &text).await {
            Ok(EditOutcome::Applied | EditOutcome::Unchanged) => {
                let mut last = self.last_applied.lock().unwrap_or_else(|e| e.into_inner());
                last.insert(target, Instant::now());
                true
            },
            Ok(EditOutcome::Missing) => false,
            Err(e) => {
                warn!(chat_id = target.chat_id, error = %e, "progress edit failed");
                false
            },
        }
    }

    /// Forget a finished target.
    pub fn forget(&self, target: EditTarget) {
        let mut last = self.last_applied.lock().unwrap_or_else(|e| e.into_inner());
        last.remove(&target);
    }

    fn throttled(&self, target: EditTarget) -> bool {
        let last = self.last_applied.lock().unwrap_or_else(|e| e.into_inner());
        last.get(&target)
            .is_some_and(|at| at.elapsed() < self.min_interval)
    }
}

/// Render a `[████░░░░░░]`-style bar.
pub fn progress_bar(percent: u8) -> String {
    let filled = (usize::from(percent) * BAR_CELLS) / 100;
    let empty = BAR_CELLS - filled;
    format!("{}{}", "█".repeat(filled), "░".repeat(empty))
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct MockSink {
        calls: AtomicUsize,
        outcome: Mutex<EditOutcome>,
        texts: Mutex<Vec<String>>,
    }

    impl MockSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                outcome: Mutex::new(EditOutcome::Applied),
                texts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl EditSink for MockSink {
        async fn edit_text(&self, _target: EditTarget, text: &str) -> anyhow::Result<EditOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts.lock().unwrap().push(text.to_string());
            Ok(*self.outcome.lock().unwrap())
        }
    }

    const TARGET: EditTarget = EditTarget {
        chat_id: 1,
        message_id: 10,
    };

    #[tokio::test]
    async fn second_update_within_window_is_suppressed() {
        let sink = MockSink::new();
        let reporter = ProgressReporter::with_min_interval(
            Arc::clone(&sink) as Arc<dyn EditSink>,
            Duration::from_secs(60),
        );

        assert!(reporter.update(TARGET, 10, "working").await);
        assert!(!reporter.update(TARGET, 20, "working").await);
        // No transport call for the suppressed update.
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn completion_always_applies() {
        let sink = MockSink::new();
        let reporter = ProgressReporter::with_min_interval(
            Arc::clone(&sink) as Arc<dyn EditSink>,
            Duration::from_secs(60),
        );

        assert!(reporter.update(TARGET, 10, "working").await);
        assert!(reporter.update(TARGET, 100, "done").await);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unchanged_counts_as_success() {
        let sink = MockSink::new();
        *sink.outcome.lock().unwrap() = EditOutcome::Unchanged;
        let reporter =
            ProgressReporter::with_min_interval(Arc::clone(&sink) as Arc<dyn EditSink>, Duration::ZERO);

        assert!(reporter.update(TARGET, 50, "working").await);
    }

    #[tokio::test]
    async fn missing_target_is_benign_false() {
        let sink = MockSink::new();
        *sink.outcome.lock().unwrap() = EditOutcome::Missing;
        let reporter =
            ProgressReporter::with_min_interval(Arc::clone(&sink) as Arc<dyn EditSink>, Duration::ZERO);

        assert!(!reporter.update(TARGET, 50, "working").await);
    }

    #[tokio::test]
    async fn targets_are_throttled_independently() {
        let sink = MockSink::new();
        let reporter = ProgressReporter::with_min_interval(
            Arc::clone(&sink) as Arc<dyn EditSink>,
            Duration::from_secs(60),
        );
        let other = EditTarget {
            chat_id: 2,
            message_id: 20,
        };

        assert!(reporter.update(TARGET, 10, "a").await);
        assert!(reporter.update(other, 10, "b").await);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn bar_rendering() {
        assert_eq!(progress_bar(0), "░░░░░░░░░░");
        assert_eq!(progress_bar(50), "█████░░░░░");
        assert_eq!(progress_bar(100), "██████████");
        assert_eq!(progress_bar(44), "████░░░░░░");
    }
}

//! Batched broadcast fan-out.
//!
//! Recipients are partitioned into fixed-size batches; sends within a batch
//! run concurrently and the batch settles before the next one starts, which
//! bounds peak concurrency while still overlapping per-recipient latency.
//! Individual failures are counted and logged, never fatal to the job.

use std::{sync::Arc, time::Duration};

use {async_trait::async_trait, tracing::info};

use tether_store::ErrorLog;

use crate::progress::{EditTarget, ProgressReporter};

/// Recipients per batch.
pub const BATCH_SIZE: usize = 20;

/// Courtesy pause between batches.
pub const INTER_BATCH_DELAY: Duration = Duration::from_millis(100);

/// Maximum url buttons attached to a broadcast.
pub const MAX_BUTTONS: usize = 4;

/// A url button under the broadcast message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlButton {
    pub url: String,
    pub label: String,
}

/// What gets delivered to every recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastPayload {
    pub text: String,
    /// Photo as an http(s) URL or a platform file id.
    pub photo: Option<String>,
    pub buttons: Vec<UrlButton>,
}

impl BroadcastPayload {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.photo.is_none()
    }
}

/// Delivery transport, behind a trait so the batching logic runs without a
/// bot.
#[async_trait]
pub trait BroadcastSink: Send + Sync {
    async fn deliver(&self, recipient: i64, payload: &BroadcastPayload) -> anyhow::Result<()>;
}

/// Aggregate outcome of a broadcast job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

/// Fans a payload out to a recipient snapshot in bounded batches.
pub struct BroadcastEngine {
    sink: Arc<dyn BroadcastSink>,
    progress: Arc<ProgressReporter>,
    error_log: Arc<ErrorLog>,
}

impl BroadcastEngine {
    pub fn new(
        sink: Arc<dyn BroadcastSink>,
        progress: Arc<ProgressReporter>,
        error_log: Arc<ErrorLog>,
    ) -> Self {
        Self {
            sink,
            progress,
            error_log,
        }
    }

    /// Deliver `payload` to every recipient. Progress is reflected on
    /// `progress_target` whenever completion crosses a 20% multiple and at
    /// the end. The report always carries exact counts.
    pub async fn send(
        &self,
        payload: &BroadcastPayload,
        recipients: &[i64],
        progress_target: Option<EditTarget>,
    ) -> BroadcastReport {
        let total = recipients.len();
        if total == 0 {
            return BroadcastReport::default();
        }

        info!(total, "broadcast started");
        let mut succeeded = 0usize;
        let mut failed = 0usize;
        let mut last_bucket = 0u8;

        let batch_count = total.div_ceil(BATCH_SIZE);
        for (i, batch) in recipients.chunks(BATCH_SIZE).enumerate() {
            let results = futures::future::join_all(batch.iter().map(|&recipient| {
                let sink = Arc::clone(&self.sink);
                async move { (recipient, sink.deliver(recipient, payload).await) }
            }))
            .await;

            for (recipient, result) in results {
                match result {
                    Ok(()) => succeeded += 1,
                    Err(e) => {
                        failed += 1;
                        self.error_log
                            .record("broadcast", format!("recipient {recipient}: {e:#}"))
                            .await;
                    },
                }
            }

            let processed = succeeded + failed;
            let finished = processed == total;
            let percent = ((processed * 100) / total) as u8;
            if let Some(target) = progress_target {
                let bucket = percent / 20;
                if bucket > last_bucket || finished {
                    last_bucket = bucket;
                    let status = format!(
                        "Broadcast {processed}/{total} — delivered {succeeded}, failed {failed}"
                    );
                    let shown = if finished { 100 } else { percent };
                    let _ = self.progress.update(target, shown, &status).await;
                }
            }

            if i + 1 < batch_count {
                tokio::time::sleep(INTER_BATCH_DELAY).await;
            }
        }

        info!(total, succeeded, failed, "broadcast finished");
        BroadcastReport {
            succeeded,
            failed,
            total,
        }
    }
}

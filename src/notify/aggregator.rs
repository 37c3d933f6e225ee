//! Per-instance aggregation of observed HTTP requests.
//!
//! # Responsibilities
//! - Merge events sharing an aggregation key, counting occurrences
//! - Drain everything on flush and deliver one notification per key
//! - Flush periodically until the owning instance shuts down

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::notify::event::{AggregationKey, NotificationEvent};
use crate::notify::Notificator;
use crate::observability::metrics;

/// Latest snapshot for a key and how often the key was seen since the last flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedEntry {
    pub event: NotificationEvent,
    pub count: u64,
}

/// Outcome of one flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub delivered: usize,
    pub failed: usize,
}

impl FlushReport {
    pub fn drained(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Deduplicating store of HTTP events owned by one proxy instance.
pub struct NotificationAggregator {
    destination: String,
    notifier: Arc<dyn Notificator>,
    entries: Mutex<HashMap<AggregationKey, AggregatedEntry>>,
}

impl NotificationAggregator {
    pub fn new(destination: impl Into<String>, notifier: Arc<dyn Notificator>) -> Self {
        Self {
            destination: destination.into(),
            notifier,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fold one event into the pending set.
    pub fn record(&self, event: NotificationEvent) {
        tracing::info!(
            destination = %self.destination,
            remote_ip = %event.remote_ip,
            method = %event.method,
            path = %event.url,
            body_length = event.body_length,
            "Observed HTTP request"
        );
        tracing::debug!(payload = %event.body, "HTTP request payload");

        let key = event.key().clone();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.entry(key) {
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                entry.event = event;
                entry.count += 1;
            }
            Entry::Vacant(slot) => {
                slot.insert(AggregatedEntry { event, count: 1 });
            }
        }
    }

    /// Number of distinct keys waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Current entry for `key`, if any.
    pub fn entry(&self, key: &AggregationKey) -> Option<AggregatedEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Drain all pending entries and deliver one notification per entry.
    ///
    /// Entries are taken before delivery starts; a failed delivery is logged
    /// and the entry is gone.
    pub async fn flush(&self) -> FlushReport {
        let drained = std::mem::take(&mut *self.entries.lock().unwrap_or_else(PoisonError::into_inner));

        let mut report = FlushReport::default();
        if drained.is_empty() {
            return report;
        }

        tracing::debug!(
            destination = %self.destination,
            entries = drained.len(),
            "Flushing HTTP notifications"
        );
        metrics::record_flushed_entries(drained.len());

        for entry in drained.into_values() {
            match self
                .notifier
                .send_info_new_request(&entry.event, &self.destination, entry.count)
                .await
            {
                Ok(()) => {
                    report.delivered += 1;
                    metrics::record_notification("http_request", true);
                }
                Err(e) => {
                    report.failed += 1;
                    metrics::record_notification("http_request", false);
                    tracing::error!(
                        destination = %self.destination,
                        method = %entry.event.method,
                        path = %entry.event.url,
                        occurrences = entry.count,
                        error = %e,
                        "Failed to send notification"
                    );
                }
            }
        }
        report
    }

    /// Flush every `interval` until `shutdown` fires.
    ///
    /// The first flush happens one full interval after the call.
    pub fn spawn_flush_loop(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let aggregator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        aggregator.flush().await;
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!(
                            destination = %aggregator.destination,
                            "Flush loop received shutdown signal, exiting loop"
                        );
                        break;
                    }
                }
            }
        })
    }
}

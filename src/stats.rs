//! Telemetry counters for packet flow.
//!
//! This module provides real-time tracking of received and forwarded
//! packets. The same events feed two consumers: the in-process counters
//! read back by the WebSocket snapshot loop, and the Prometheus recorder
//! behind `GET /metrics`.

use metrics::{counter, describe_counter, describe_gauge};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for packets moving through the distributor.
#[derive(Debug, Default)]
pub struct StatsTracker {
    /// Packets accepted from emitters.
    packets_rx: AtomicU64,
    /// Packets successfully forwarded, across all analyzers.
    packets_tx: AtomicU64,
    /// Forwarded-packet counts per analyzer id.
    tx_by_analyzer: Mutex<HashMap<String, u64>>,
}

impl StatsTracker {
    /// Create a new tracker with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one packet accepted on ingress.
    pub fn record_received(&self) {
        self.packets_rx.fetch_add(1, Ordering::Relaxed);
        counter!("packets_received_total").increment(1);
    }

    /// Record one packet successfully forwarded to `analyzer_id`.
    pub fn record_forwarded(&self, analyzer_id: &str) {
        self.packets_tx.fetch_add(1, Ordering::Relaxed);
        *self
            .tx_by_analyzer
            .lock()
            .entry(analyzer_id.to_string())
            .or_insert(0) += 1;
        counter!("packets_forwarded_total", "analyzer_id" => analyzer_id.to_string()).increment(1);
    }

    /// Total packets accepted so far.
    pub fn packets_rx(&self) -> u64 {
        self.packets_rx.load(Ordering::Relaxed)
    }

    /// Total packets forwarded so far.
    pub fn packets_tx(&self) -> u64 {
        self.packets_tx.load(Ordering::Relaxed)
    }

    /// Packets forwarded to one analyzer; zero if it never received any.
    pub fn tx_for(&self, analyzer_id: &str) -> u64 {
        self.tx_by_analyzer
            .lock()
            .get(analyzer_id)
            .copied()
            .unwrap_or(0)
    }
}

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!("packets_received_total", "Packets received from emitters");
    describe_counter!(
        "packets_forwarded_total",
        "Packets forwarded to analyzers, labeled by analyzer id"
    );
    describe_gauge!("queue_size", "Packets in the distributor queue");
}

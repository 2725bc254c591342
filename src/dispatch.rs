//! Dispatcher worker pool: drains the ingress queue and forwards each
//! packet to exactly one analyzer.
//!
//! Forwarding is at-most-once per packet: a failed POST is a per-packet
//! loss counted against the analyzer, never retried elsewhere. Only the
//! "no eligible analyzer" case feeds back into the queue, and only queue
//! exhaustion escalates to system-wide back-pressure.

use crate::emitter::EmitterController;
use crate::queue::IngressQueue;
use crate::registry::AnalyzerRegistry;
use crate::stats::StatsTracker;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, warn};

/// Pause between attempts while no analyzer is eligible, so workers do not
/// spin hot against an empty registry.
const NO_TARGET_BACKOFF: Duration = Duration::from_secs(1);

/// Forwards queued packets to analyzers selected by the registry.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<AnalyzerRegistry>,
    queue: Arc<IngressQueue>,
    controller: Arc<EmitterController>,
    stats: Arc<StatsTracker>,
    client: Client,
    no_target_backoff: Duration,
}

impl Dispatcher {
    /// Create a dispatcher over the shared application state.
    pub fn new(
        registry: Arc<AnalyzerRegistry>,
        queue: Arc<IngressQueue>,
        controller: Arc<EmitterController>,
        stats: Arc<StatsTracker>,
        client: Client,
    ) -> Self {
        Self {
            registry,
            queue,
            controller,
            stats,
            client,
            no_target_backoff: NO_TARGET_BACKOFF,
        }
    }

    /// Override the no-target back-off (shortened in tests).
    pub fn with_no_target_backoff(mut self, backoff: Duration) -> Self {
        self.no_target_backoff = backoff;
        self
    }

    /// Spawn `workers` forwarding tasks.
    pub fn spawn(self: Arc<Self>, workers: usize) -> Vec<JoinHandle<()>> {
        (0..workers)
            .map(|worker| {
                let dispatcher = Arc::clone(&self);
                tokio::spawn(async move {
                    debug!(worker, "dispatcher worker started");
                    dispatcher.run().await;
                    debug!(worker, "dispatcher worker stopped");
                })
            })
            .collect()
    }

    /// Forward packets until the queue shuts down.
    pub async fn run(&self) {
        while let Some(packet) = self.queue.pop().await {
            self.forward(packet).await;
        }
    }

    /// Route one packet: select a target and POST to it.
    pub async fn forward(&self, packet: Value) {
        let Some(target) = self.registry.choose() else {
            match self.queue.try_requeue(packet) {
                Ok(()) => warn!("no eligible analyzer, packet requeued"),
                Err(_) => {
                    error!("no eligible analyzer and queue full, dropping packet");
                    self.controller.pause_all().await;
                }
            }
            sleep(self.no_target_backoff).await;
            return;
        };

        match self.client.post(&target.url).json(&packet).send().await {
            Ok(response) if response.status() == StatusCode::OK => {
                self.stats.record_forwarded(&target.id);
                self.registry.mark_success(&target.id);
                if self.controller.is_paused() {
                    self.controller.resume_all().await;
                }
            }
            Ok(response) => {
                warn!(
                    analyzer = %target.id,
                    status = %response.status(),
                    "analyzer rejected packet"
                );
                self.registry.mark_failure(&target.id);
            }
            Err(err) => {
                warn!(analyzer = %target.id, error = %err, "forward failed");
                self.registry.mark_failure(&target.id);
            }
        }
    }
}

//! Periodic analyzer health probing.
//!
//! The prober independently re-asserts analyzer liveness: it is the only
//! path by which an unhealthy analyzer returns to service without carrying
//! dispatch traffic. Newly added analyzers are skipped until their grace
//! period elapses.

use crate::registry::AnalyzerRegistry;
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

/// Probes every analyzer's health endpoint on a fixed interval.
#[derive(Debug)]
pub struct HealthProber {
    registry: Arc<AnalyzerRegistry>,
    client: Client,
    interval: Duration,
}

impl HealthProber {
    /// Create a prober over the shared registry.
    pub fn new(registry: Arc<AnalyzerRegistry>, client: Client, interval: Duration) -> Self {
        Self {
            registry,
            client,
            interval,
        }
    }

    /// Spawn the probe loop as a background task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Probe forever at the configured interval.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.probe_all().await;
        }
    }

    /// Probe every analyzer that is due and feed the result into the registry.
    pub async fn probe_all(&self) {
        for (id, health_url) in self.registry.due_probes(Instant::now()) {
            let live = match self.client.get(&health_url).send().await {
                Ok(response) => response.status() == StatusCode::OK,
                Err(err) => {
                    debug!(analyzer = %id, error = %err, "health probe failed");
                    false
                }
            };

            if live {
                self.registry.mark_success(&id);
            } else {
                self.registry.mark_failure(&id);
            }
        }
    }
}

//! Emitter control and telemetry aggregation.
//!
//! The controller keeps a local view of every emitter's metrics and owns
//! the system-wide back-pressure state machine: when the dispatcher cannot
//! drain the queue it pauses all emitters, and on the next successful
//! forward it resumes them at the last rate they were observed running at.

use crate::config::EmitterConfig;
use crate::error::{FanoutError, Result};
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Last observed state of one emitter.
#[derive(Debug, Clone, Serialize)]
pub struct EmitterStatus {
    /// Packets buffered inside the emitter; `None` when unreachable.
    pub buffer_size: Option<u64>,
    /// Current emission rate.
    pub rate_rps: f64,
    /// Whether the emitter reports itself paused.
    pub paused: bool,
    /// Last non-zero rate seen, restored on resume.
    #[serde(skip)]
    pub prev_rate: f64,
}

/// Wire view of one emitter for the metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct EmitterSnapshot {
    /// Emitter id.
    pub emitter_id: String,
    /// Buffered packets, `null` when unknown.
    pub buffer_size: Option<u64>,
    /// Current emission rate.
    pub rate_rps: f64,
    /// Pause flag.
    pub paused: bool,
}

/// Body of an emitter's `GET /metrics` response. Unknown fields ignored.
#[derive(Debug, Deserialize)]
struct EmitterMetricsBody {
    buffer_size: Option<u64>,
    rate_rps: f64,
    paused: bool,
}

/// Polls emitters and drives pause-all / resume-all.
#[derive(Debug)]
pub struct EmitterController {
    emitters: Vec<EmitterConfig>,
    status: Mutex<HashMap<String, EmitterStatus>>,
    paused: AtomicBool,
    // Serializes pause/resume transitions across dispatcher workers.
    transition: tokio::sync::Mutex<()>,
    client: Client,
}

impl EmitterController {
    /// Create a controller for the configured emitter fleet.
    pub fn new(emitters: Vec<EmitterConfig>, client: Client) -> Self {
        let emitters: Vec<EmitterConfig> = emitters
            .into_iter()
            .map(|e| EmitterConfig {
                emitter_id: e.emitter_id,
                url: e.url.trim_end_matches('/').to_string(),
            })
            .collect();

        let status = emitters
            .iter()
            .map(|e| {
                (
                    e.emitter_id.clone(),
                    EmitterStatus {
                        buffer_size: Some(0),
                        rate_rps: 0.0,
                        paused: true,
                        prev_rate: 0.0,
                    },
                )
            })
            .collect();

        Self {
            emitters,
            status: Mutex::new(status),
            paused: AtomicBool::new(false),
            transition: tokio::sync::Mutex::new(()),
            client,
        }
    }

    /// Whether the system is currently holding all emitters paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Base URL for an emitter, if it is configured.
    pub fn url_for(&self, emitter_id: &str) -> Option<String> {
        self.emitters
            .iter()
            .find(|e| e.emitter_id == emitter_id)
            .map(|e| e.url.clone())
    }

    /// Pause every emitter. Idempotent; per-emitter failures are logged
    /// and skipped.
    pub async fn pause_all(&self) {
        let _guard = self.transition.lock().await;
        if self.paused.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("pausing all emitters");

        for emitter in &self.emitters {
            let url = format!("{}/pause", emitter.url);
            if let Err(err) = self.client.post(&url).send().await {
                warn!(emitter = %emitter.emitter_id, error = %err, "pause request failed");
            }
        }

        let mut status = self.status.lock();
        for record in status.values_mut() {
            record.paused = true;
        }
    }

    /// Resume every emitter and restore its last observed rate. Idempotent;
    /// per-emitter failures are logged and skipped.
    pub async fn resume_all(&self) {
        let _guard = self.transition.lock().await;
        if !self.paused.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("resuming all emitters");

        let targets: Vec<(String, String, f64)> = {
            let status = self.status.lock();
            self.emitters
                .iter()
                .map(|e| {
                    let prev_rate = status
                        .get(&e.emitter_id)
                        .map(|s| s.prev_rate)
                        .unwrap_or(0.0);
                    (e.emitter_id.clone(), e.url.clone(), prev_rate)
                })
                .collect()
        };

        for (emitter_id, base_url, prev_rate) in targets {
            if let Err(err) = self
                .client
                .post(format!("{base_url}/resume"))
                .send()
                .await
            {
                warn!(emitter = %emitter_id, error = %err, "resume request failed");
                continue;
            }

            if prev_rate > 0.0 {
                let body = json!({ "rps": prev_rate });
                if let Err(err) = self
                    .client
                    .post(format!("{base_url}/rate"))
                    .json(&body)
                    .send()
                    .await
                {
                    warn!(emitter = %emitter_id, error = %err, "rate restore failed");
                }
            } else {
                debug!(emitter = %emitter_id, "no previous rate to restore");
            }

            if let Some(record) = self.status.lock().get_mut(&emitter_id) {
                record.paused = false;
            }
        }
    }

    /// Refresh the local metrics view of every emitter once.
    pub async fn poll_once(&self) {
        for emitter in &self.emitters {
            let url = format!("{}/metrics", emitter.url);
            let fetched: Result<EmitterMetricsBody> = async {
                let response = self.client.get(&url).send().await?;
                Ok(response.json::<EmitterMetricsBody>().await?)
            }
            .await;

            let mut status = self.status.lock();
            let Some(record) = status.get_mut(&emitter.emitter_id) else {
                continue;
            };
            match fetched {
                Ok(body) => {
                    record.buffer_size = body.buffer_size;
                    record.rate_rps = body.rate_rps;
                    record.paused = body.paused;
                    if body.rate_rps > 0.0 {
                        record.prev_rate = body.rate_rps;
                    }
                }
                Err(err) => {
                    debug!(emitter = %emitter.emitter_id, error = %err, "metrics poll failed");
                    record.buffer_size = None;
                    record.rate_rps = 0.0;
                    record.paused = true;
                }
            }
        }
    }

    /// Poll emitter metrics forever at `poll_interval`.
    pub async fn run(self: Arc<Self>, poll_interval: Duration) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }

    /// Proxy a control POST (`pause`, `resume`, `rate`) to one emitter.
    pub async fn proxy_post(
        &self,
        emitter_id: &str,
        action: &str,
        body: Option<&Value>,
    ) -> Result<()> {
        let base_url = self
            .url_for(emitter_id)
            .ok_or_else(|| FanoutError::UnknownEmitter(emitter_id.to_string()))?;

        let mut request = self.client.post(format!("{base_url}/{action}"));
        if let Some(body) = body {
            request = request.json(body);
        }
        request.send().await?;
        Ok(())
    }

    /// Fetch one emitter's metrics for passthrough.
    pub async fn fetch_metrics(&self, emitter_id: &str) -> Result<Value> {
        let base_url = self
            .url_for(emitter_id)
            .ok_or_else(|| FanoutError::UnknownEmitter(emitter_id.to_string()))?;

        let response = self
            .client
            .get(format!("{base_url}/metrics"))
            .send()
            .await?;
        Ok(response.json().await?)
    }

    /// Copy out the emitter view in configuration order.
    pub fn snapshot(&self) -> Vec<EmitterSnapshot> {
        let status = self.status.lock();
        self.emitters
            .iter()
            .filter_map(|e| {
                status.get(&e.emitter_id).map(|s| EmitterSnapshot {
                    emitter_id: e.emitter_id.clone(),
                    buffer_size: s.buffer_size,
                    rate_rps: s.rate_rps,
                    paused: s.paused,
                })
            })
            .collect()
    }
}

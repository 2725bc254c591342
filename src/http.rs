//! HTTP and WebSocket surface of the distributor.
//!
//! Ingestion, admin operations on the analyzer registry, the emitter
//! control proxy, Prometheus exposition, and the per-second metrics push
//! channel all live here. Handlers stay thin: they translate wire shapes
//! into calls on the shared application state.

use crate::emitter::{EmitterController, EmitterSnapshot};
use crate::error::FanoutError;
use crate::queue::IngressQueue;
use crate::registry::{AnalyzerRegistry, AnalyzerSnapshot};
use crate::stats::StatsTracker;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::config::AnalyzerConfig;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Analyzer registry.
    pub registry: Arc<AnalyzerRegistry>,
    /// Bounded ingress queue.
    pub queue: Arc<IngressQueue>,
    /// Emitter controller.
    pub controller: Arc<EmitterController>,
    /// Packet-flow counters.
    pub stats: Arc<StatsTracker>,
    /// Prometheus render handle.
    pub prometheus: PrometheusHandle,
}

/// Build the distributor's router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/log-packet", post(ingest))
        .route("/registry", get(list_registry))
        .route("/registry/add", post(add_analyzer))
        .route("/registry/{id}", delete(remove_analyzer))
        .route("/analyzer/{id}/enable", post(enable_analyzer))
        .route("/analyzer/{id}/disable", post(disable_analyzer))
        .route("/emitter/{id}/rate", post(emitter_rate))
        .route("/emitter/{id}/pause", post(emitter_pause))
        .route("/emitter/{id}/resume", post(emitter_resume))
        .route("/emitter/{id}/metrics", get(emitter_metrics))
        .route("/metrics", get(prometheus_metrics))
        .route("/ws/metrics", get(ws_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for FanoutError {
    fn into_response(self) -> Response {
        let status = match &self {
            FanoutError::DuplicateAnalyzer(_)
            | FanoutError::MissingField(_)
            | FanoutError::InvalidWeight(_) => StatusCode::BAD_REQUEST,
            FanoutError::UnknownAnalyzer(_) | FanoutError::UnknownEmitter(_) => {
                StatusCode::NOT_FOUND
            }
            FanoutError::HttpRequest(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Emitters POST packets here. The payload is opaque; it is queued as-is.
async fn ingest(State(state): State<AppState>, Json(packet): Json<Value>) -> Response {
    match state.queue.push(packet).await {
        Ok(()) => {
            state.stats.record_received();
            (StatusCode::ACCEPTED, Json(json!({ "status": "queued" }))).into_response()
        }
        Err(err) => {
            error!(error = %err, "failed to enqueue packet");
            err.into_response()
        }
    }
}

async fn list_registry(State(state): State<AppState>) -> Json<Vec<AnalyzerSnapshot>> {
    Json(state.registry.snapshot())
}

#[derive(Debug, Deserialize)]
struct AddAnalyzerRequest {
    id: Option<String>,
    url: Option<String>,
    weight: Option<f64>,
}

async fn add_analyzer(
    State(state): State<AppState>,
    Json(request): Json<AddAnalyzerRequest>,
) -> Result<Json<Value>, FanoutError> {
    let id = request
        .id
        .filter(|id| !id.is_empty())
        .ok_or(FanoutError::MissingField("id"))?;
    let url = request
        .url
        .filter(|url| !url.is_empty())
        .ok_or(FanoutError::MissingField("url"))?;

    state.registry.add(AnalyzerConfig {
        id: id.clone(),
        url,
        weight: request.weight.unwrap_or(1.0),
    })?;
    Ok(Json(json!({ "added": id })))
}

async fn remove_analyzer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<Value> {
    state.registry.remove(&id);
    Json(json!({ "removed": id }))
}

async fn enable_analyzer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, FanoutError> {
    state.registry.set_admin(&id, true)?;
    Ok(Json(json!({ "status": "enabled", "analyzer_id": id })))
}

async fn disable_analyzer(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, FanoutError> {
    state.registry.set_admin(&id, false)?;
    Ok(Json(json!({ "status": "disabled", "analyzer_id": id })))
}

async fn emitter_rate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, FanoutError> {
    state.controller.proxy_post(&id, "rate", Some(&body)).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn emitter_pause(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, FanoutError> {
    state.controller.proxy_post(&id, "pause", None).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn emitter_resume(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, FanoutError> {
    state.controller.proxy_post(&id, "resume", None).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn emitter_metrics(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, FanoutError> {
    Ok(Json(state.controller.fetch_metrics(&id).await?))
}

async fn prometheus_metrics(State(state): State<AppState>) -> String {
    state.prometheus.render()
}

/// One per-second metrics snapshot pushed to each WebSocket subscriber.
#[derive(Debug, Serialize)]
struct MetricsSnapshot {
    ts: f64,
    queue_depth: usize,
    analyzers: Vec<AnalyzerWire>,
    emitters: Vec<EmitterSnapshot>,
    packets_rx: u64,
}

#[derive(Debug, Serialize)]
struct AnalyzerWire {
    id: String,
    effective_weight: f64,
    healthy: bool,
    admin_enabled: bool,
    tx_packets: u64,
}

fn build_snapshot(state: &AppState) -> MetricsSnapshot {
    let analyzers = state
        .registry
        .snapshot()
        .into_iter()
        .map(|a| AnalyzerWire {
            tx_packets: state.stats.tx_for(&a.id),
            id: a.id,
            effective_weight: a.effective_weight,
            healthy: a.healthy,
            admin_enabled: a.admin_enabled,
        })
        .collect();

    MetricsSnapshot {
        ts: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
        queue_depth: state.queue.depth(),
        analyzers,
        emitters: state.controller.snapshot(),
        packets_rx: state.stats.packets_rx(),
    }
}

async fn ws_metrics(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| push_snapshots(socket, state))
}

/// Push one snapshot per second until the client disconnects.
async fn push_snapshots(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut ticks = IntervalStream::new(tokio::time::interval(Duration::from_secs(1)));

    loop {
        tokio::select! {
            Some(_) = ticks.next() => {
                let snapshot = build_snapshot(&state);
                let payload = match serde_json::to_string(&snapshot) {
                    Ok(payload) => payload,
                    Err(err) => {
                        error!(error = %err, "failed to serialize metrics snapshot");
                        continue;
                    }
                };
                if sink.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    debug!("metrics subscriber disconnected");
}

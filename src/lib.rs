//! # Fanout
//!
//! Health-aware weighted log-packet distributor with emitter back-pressure.
//!
//! Fanout sits between upstream *emitters* and downstream *analyzers*: it
//! accepts JSON log packets over HTTP, holds them in a bounded queue, and
//! forwards each packet to exactly one analyzer chosen by smooth weighted
//! round-robin. Analyzers that keep failing are taken out of rotation and
//! re-admitted by an independent health prober; when the queue saturates
//! with nowhere to route, every emitter is paused until an analyzer
//! recovers.
//!
//! ## Features
//!
//! - **Smooth Weighted Round-Robin**: deterministic Nginx-style selection
//!   whose long-run pick frequencies match the configured weight ratios
//! - **Failure-Driven Health**: consecutive failures evict an analyzer;
//!   one successful probe or forward restores it
//! - **Weight Renormalization**: effective weights always sum to one over
//!   the analyzers that are actually usable
//! - **End-to-End Back-Pressure**: a full queue slows ingress callers and,
//!   when routing stalls entirely, pauses the emitter fleet
//! - **Live Operations**: runtime add/remove/enable/disable of analyzers,
//!   an emitter control proxy, Prometheus metrics, and a WebSocket
//!   snapshot channel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fanout::{AnalyzerConfig, AnalyzerRegistry};
//!
//! let registry = AnalyzerRegistry::new(
//!     vec![
//!         AnalyzerConfig {
//!             id: "a1".to_string(),
//!             url: "http://analyzer-1:9000/ingest".to_string(),
//!             weight: 0.6,
//!         },
//!         AnalyzerConfig {
//!             id: "a2".to_string(),
//!             url: "http://analyzer-2:9000/ingest".to_string(),
//!             weight: 0.4,
//!         },
//!     ],
//!     3,
//! );
//!
//! let target = registry.choose().expect("both analyzers eligible");
//! println!("next packet goes to {}", target.id);
//! ```
//!
//! ## Configuration
//!
//! Fanout is configured via command-line arguments and environment
//! variables. The analyzer and emitter fleets are required
//! (`ANALYZERS_JSON`, `EMITTERS_JSON`); queue capacity, worker count,
//! intervals, and timeouts are optional knobs. See [`Args`] for the full
//! set.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dispatch;
pub mod emitter;
pub mod error;
pub mod http;
pub mod probe;
pub mod queue;
pub mod registry;
pub mod stats;

// Re-exports for convenience
pub use config::{AnalyzerConfig, Args, Config, EmitterConfig};
pub use dispatch::Dispatcher;
pub use emitter::{EmitterController, EmitterSnapshot, EmitterStatus};
pub use error::{FanoutError, Result};
pub use http::AppState;
pub use probe::HealthProber;
pub use queue::IngressQueue;
pub use registry::{Analyzer, AnalyzerRegistry, AnalyzerSnapshot, Target};
pub use stats::StatsTracker;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

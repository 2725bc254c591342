//! Configuration management for the fanout distributor.
//!
//! Supports configuration via CLI arguments and environment variables
//! with sensible defaults. The analyzer and emitter fleets arrive as
//! JSON arrays (`ANALYZERS_JSON`, `EMITTERS_JSON`) and are fatal to
//! omit: a distributor with nothing to route to or from cannot start.

use crate::error::{FanoutError, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

/// CLI arguments for the fanout distributor.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "fanout",
    version,
    about = "Health-aware weighted log-packet distributor",
    long_about = "Fanout accepts JSON log packets from upstream emitters, holds them in a\n\
                  bounded queue, and forwards each packet to exactly one downstream analyzer\n\
                  using smooth weighted round-robin with failure-driven health tracking.\n\
                  When the queue saturates it pauses the emitters and resumes them once\n\
                  analyzers recover.",
    after_help = "EXAMPLES:\n    \
        ANALYZERS_JSON='[{\"id\":\"a1\",\"url\":\"http://a1:9000/ingest\",\"weight\":0.6}]' \\\n    \
        EMITTERS_JSON='[{\"emitter_id\":\"e1\",\"url\":\"http://e1:9100\"}]' fanout\n    \
        fanout --listen 0.0.0.0:8000 --workers 4 --queue-capacity 10000"
)]
pub struct Args {
    /// JSON array of analyzers: [{"id", "url", "weight"}]
    #[arg(long, env = "ANALYZERS_JSON")]
    pub analyzers: String,

    /// JSON array of emitters: [{"emitter_id", "url"}]
    #[arg(long, env = "EMITTERS_JSON")]
    pub emitters: String,

    /// Socket address to serve the HTTP/WS surface on
    #[arg(short, long, default_value = "0.0.0.0:8000", env = "FANOUT_LISTEN")]
    pub listen: SocketAddr,

    /// Maximum packets held in the ingress queue
    #[arg(short, long, default_value = "10000", env = "FANOUT_QUEUE_CAPACITY")]
    pub queue_capacity: usize,

    /// Number of dispatcher workers
    #[arg(short, long, default_value = "4", env = "FANOUT_WORKERS")]
    pub workers: usize,

    /// Seconds between health probes of each analyzer
    #[arg(long, default_value = "2", env = "FANOUT_PROBE_INTERVAL")]
    pub probe_interval: u64,

    /// Seconds between emitter metrics polls
    #[arg(long, default_value = "1", env = "FANOUT_POLL_INTERVAL")]
    pub poll_interval: u64,

    /// Consecutive failures before an analyzer is marked unhealthy
    #[arg(long, default_value = "3", env = "FANOUT_MAX_FAIL")]
    pub max_fail: u32,

    /// Total timeout for outbound HTTP requests, in seconds
    #[arg(short, long, default_value = "5", env = "FANOUT_TIMEOUT")]
    pub timeout: u64,

    /// Connect timeout for outbound HTTP requests, in seconds
    #[arg(long, default_value = "2", env = "FANOUT_CONNECT_TIMEOUT")]
    pub connect_timeout: u64,

    /// Enable verbose logging
    #[arg(short, long, env = "FANOUT_VERBOSE")]
    pub verbose: bool,

    /// Output logs as JSON
    #[arg(long, env = "FANOUT_JSON_LOGS")]
    pub json_logs: bool,
}

impl Args {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Configuration for a single downstream analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Stable identifier, unique within the registry.
    pub id: String,

    /// Absolute URL of the analyzer's ingest endpoint.
    pub url: String,

    /// Baseline routing weight (declared preference, renormalized at runtime).
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Configuration for a single upstream emitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitterConfig {
    /// Stable emitter identifier.
    pub emitter_id: String,

    /// Base URL of the emitter's control surface.
    pub url: String,
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Downstream analyzers to route packets to.
    pub analyzers: Vec<AnalyzerConfig>,

    /// Upstream emitters to poll and back-pressure.
    pub emitters: Vec<EmitterConfig>,

    /// Address the HTTP/WS surface binds to.
    pub listen: SocketAddr,

    /// Ingress queue capacity.
    pub queue_capacity: usize,

    /// Dispatcher pool size.
    pub workers: usize,

    /// Interval between analyzer health probes.
    pub probe_interval: Duration,

    /// Interval between emitter metrics polls.
    pub poll_interval: Duration,

    /// Consecutive failures before an analyzer turns unhealthy.
    pub max_fail: u32,

    /// Total timeout for outbound HTTP requests.
    pub timeout: Duration,

    /// Connect timeout for outbound HTTP requests.
    pub connect_timeout: Duration,
}

impl Config {
    /// Create configuration from CLI arguments.
    pub fn from_args(args: &Args) -> Result<Self> {
        let analyzers: Vec<AnalyzerConfig> = serde_json::from_str(&args.analyzers)
            .map_err(|e| FanoutError::ConfigParse {
                name: "ANALYZERS_JSON",
                source: e,
            })?;

        let emitters: Vec<EmitterConfig> = serde_json::from_str(&args.emitters)
            .map_err(|e| FanoutError::ConfigParse {
                name: "EMITTERS_JSON",
                source: e,
            })?;

        let config = Self {
            analyzers,
            emitters,
            listen: args.listen,
            queue_capacity: args.queue_capacity,
            workers: args.workers,
            probe_interval: Duration::from_secs(args.probe_interval),
            poll_interval: Duration::from_secs(args.poll_interval),
            max_fail: args.max_fail,
            timeout: Duration::from_secs(args.timeout),
            connect_timeout: Duration::from_secs(args.connect_timeout),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.analyzers.is_empty() {
            return Err(FanoutError::NoAnalyzers);
        }
        if self.emitters.is_empty() {
            return Err(FanoutError::NoEmitters);
        }

        let mut seen = HashSet::new();
        for analyzer in &self.analyzers {
            if analyzer.id.is_empty() {
                return Err(FanoutError::InvalidConfig(
                    "analyzer id cannot be empty".to_string(),
                ));
            }
            if analyzer.url.is_empty() {
                return Err(FanoutError::InvalidConfig(
                    "analyzer URL cannot be empty".to_string(),
                ));
            }
            if !seen.insert(analyzer.id.as_str()) {
                return Err(FanoutError::DuplicateAnalyzer(analyzer.id.clone()));
            }
            if !analyzer.weight.is_finite() || analyzer.weight < 0.0 {
                return Err(FanoutError::InvalidWeight(analyzer.weight));
            }
        }

        let mut seen = HashSet::new();
        for emitter in &self.emitters {
            if emitter.emitter_id.is_empty() || emitter.url.is_empty() {
                return Err(FanoutError::InvalidConfig(
                    "emitter id and URL cannot be empty".to_string(),
                ));
            }
            if !seen.insert(emitter.emitter_id.as_str()) {
                return Err(FanoutError::InvalidConfig(format!(
                    "duplicate emitter id '{}'",
                    emitter.emitter_id
                )));
            }
        }

        if self.workers == 0 {
            return Err(FanoutError::InvalidConfig(
                "workers must be greater than 0".to_string(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(FanoutError::InvalidConfig(
                "queue capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

//! Custom error types for the fanout distributor.
//!
//! This module defines all error types used throughout the application,
//! following Rust best practices with `thiserror` for library errors.

use thiserror::Error;

/// Errors that can occur while distributing packets.
#[derive(Error, Debug)]
pub enum FanoutError {
    /// Failed to parse a JSON configuration value.
    #[error("failed to parse {name}: {source}")]
    ConfigParse {
        /// Which configuration value could not be parsed.
        name: &'static str,
        /// The underlying JSON parsing error.
        #[source]
        source: serde_json::Error,
    },

    /// No analyzers configured.
    #[error("no analyzers configured - at least one analyzer is required")]
    NoAnalyzers,

    /// No emitters configured.
    #[error("no emitters configured - at least one emitter is required")]
    NoEmitters,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An analyzer with this id is already registered.
    #[error("analyzer '{0}' already exists")]
    DuplicateAnalyzer(String),

    /// No analyzer with this id is registered.
    #[error("unknown analyzer '{0}'")]
    UnknownAnalyzer(String),

    /// No emitter with this id is configured.
    #[error("unknown emitter '{0}'")]
    UnknownEmitter(String),

    /// A required admin-request field was absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A weight was negative or not a finite number.
    #[error("invalid weight: {0}")]
    InvalidWeight(f64),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// The ingress queue has shut down.
    #[error("ingress queue is closed")]
    QueueClosed,

    /// The ingress queue has no free capacity.
    #[error("ingress queue is full")]
    QueueFull,
}

/// Result type alias for fanout operations.
pub type Result<T> = std::result::Result<T, FanoutError>;

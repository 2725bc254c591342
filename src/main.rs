//! Fanout distributor daemon.
//!
//! Run `fanout --help` for usage information.

use anyhow::{Context, Result};
use console::style;
use fanout::http::AppState;
use fanout::{
    stats, AnalyzerRegistry, Args, Config, Dispatcher, EmitterController, HealthProber,
    IngressQueue, StatsTracker,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse_args();

    // Setup logging
    setup_logging(&args);

    // Print banner
    if !args.json_logs {
        print_banner();
    }

    // Load configuration
    let config = match Config::from_args(&args) {
        Ok(c) => c,
        Err(e) => {
            error!("Configuration error: {}", e);
            eprintln!("{} {}", style("Error:").red().bold(), e);
            std::process::exit(1);
        }
    };

    if args.verbose && !args.json_logs {
        print_config_summary(&config);
    }

    // Shared outbound HTTP client with the dispatch/probe timeouts
    let client = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout)
        .timeout(config.timeout)
        .build()
        .context("failed to build HTTP client")?;

    // Prometheus recorder backing GET /metrics
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus metrics recorder")?;
    stats::describe_metrics();

    // Core state
    let registry = Arc::new(AnalyzerRegistry::new(
        config.analyzers.clone(),
        config.max_fail,
    ));
    let queue = Arc::new(IngressQueue::new(config.queue_capacity));
    let controller = Arc::new(EmitterController::new(
        config.emitters.clone(),
        client.clone(),
    ));
    let tracker = Arc::new(StatsTracker::new());

    // Background tasks: dispatcher pool, health prober, emitter poller
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&queue),
        Arc::clone(&controller),
        Arc::clone(&tracker),
        client.clone(),
    ));
    dispatcher.spawn(config.workers);

    HealthProber::new(Arc::clone(&registry), client.clone(), config.probe_interval).spawn();
    tokio::spawn(Arc::clone(&controller).run(config.poll_interval));

    let state = AppState {
        registry,
        queue,
        controller,
        stats: tracker,
        prometheus,
    };
    let app = fanout::http::router(state);

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;

    info!(
        listen = %config.listen,
        analyzers = config.analyzers.len(),
        emitters = config.emitters.len(),
        workers = config.workers,
        queue_capacity = config.queue_capacity,
        "log distributor started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("log distributor stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

fn setup_logging(args: &Args) {
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("fanout={level}")));

    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .compact(),
            )
            .init();
    }
}

fn print_banner() {
    let banner = r#"
    ______                        __
   / ____/___ _____  ____  __  __/ /_
  / /_  / __ `/ __ \/ __ \/ / / / __/
 / __/ / /_/ / / / / /_/ / /_/ / /_
/_/    \__,_/_/ /_/\____/\__,_/\__/

    "#;

    println!("{}", style(banner).cyan().bold());
    println!(
        "    {}",
        style("Weighted Log-Packet Distributor").white().dim()
    );
    println!("    {}", style(format!("v{}", fanout::VERSION)).white().dim());
    println!();
}

fn print_config_summary(config: &Config) {
    println!("{}", style("Configuration:").bold());
    println!("  Listen:         {}", config.listen);
    println!("  Queue Capacity: {}", config.queue_capacity);
    println!("  Workers:        {}", config.workers);
    println!("  Probe Interval: {:?}", config.probe_interval);
    println!("  Poll Interval:  {:?}", config.poll_interval);
    println!("  Max Failures:   {}", config.max_fail);
    println!("  Timeout:        {:?}", config.timeout);
    println!("  Analyzers:      {}", config.analyzers.len());
    for (i, analyzer) in config.analyzers.iter().enumerate() {
        println!(
            "    {}. {} -> {} (weight: {})",
            i + 1,
            analyzer.id,
            analyzer.url,
            analyzer.weight
        );
    }
    println!("  Emitters:       {}", config.emitters.len());
    for (i, emitter) in config.emitters.iter().enumerate() {
        println!("    {}. {} -> {}", i + 1, emitter.emitter_id, emitter.url);
    }
    println!();
}

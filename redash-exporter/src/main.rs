//! Prometheus exporter for Redash.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use redash_exporter::config::{API_KEY_ENV, LogFormat};
use redash_exporter::{
    ExporterConfig, HttpServer, MetricRegistry, PollLoop, StatusFetcher, init_tracing,
};

/// Prometheus exporter for Redash.
///
/// Every flag can also be set through the environment variable shown.
/// The Redash flags also accept their underscore spelling (`--redash_host`).
#[derive(Parser, Debug)]
#[command(name = "redash-exporter")]
#[command(about = "Export Redash status as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// The address to listen HTTP requests (default ":9295").
    #[arg(long, alias = "listen_address", env = "LISTEN_ADDRESS")]
    listen_address: Option<String>,

    /// Interval to scrape status, in seconds (default 30).
    #[arg(long, alias = "metrics_interval", env = "METRICS_INTERVAL")]
    metrics_interval: Option<u64>,

    /// Target Redash scheme (default "http").
    #[arg(long, alias = "redash_scheme", env = "REDASH_SCHEME")]
    redash_scheme: Option<String>,

    /// Target Redash host (default "localhost").
    #[arg(long, alias = "redash_host", env = "REDASH_HOST")]
    redash_host: Option<String>,

    /// Target Redash port (default "5000").
    #[arg(long, alias = "redash_port", env = "REDASH_PORT")]
    redash_port: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (text, json).
    #[arg(long, env = "LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

impl Args {
    /// Apply command line overrides on top of a loaded configuration.
    fn apply(self, config: &mut ExporterConfig) {
        if let Some(listen) = self.listen_address {
            config.prometheus.listen = listen;
        }
        if let Some(interval) = self.metrics_interval {
            config.poll.interval_secs = interval;
        }
        if let Some(scheme) = self.redash_scheme {
            config.redash.scheme = scheme;
        }
        if let Some(host) = self.redash_host {
            config.redash.host = host;
        }
        if let Some(port) = self.redash_port {
            config.redash.port = port;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => ExporterConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => ExporterConfig::default(),
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    init_tracing(&config.logging)?;

    info!("Starting Redash exporter");

    let api_key = std::env::var(API_KEY_ENV).unwrap_or_default();
    if api_key.is_empty() {
        warn!("{} is not set; Redash will likely reject status requests", API_KEY_ENV);
    }

    let registry = Arc::new(
        MetricRegistry::with_redash_metrics().context("Failed to declare Redash metrics")?,
    );
    let fetcher = StatusFetcher::new(&config.redash, &api_key)?;
    let listen_addr = config.prometheus.listen_addr()?;

    info!(
        scheme = %config.redash.scheme,
        host = %config.redash.host,
        port = %config.redash.port,
        "Polling Redash status"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let poller = PollLoop::new(fetcher, registry.clone(), config.poll.interval());
    let poller_task = tokio::spawn(poller.run(shutdown_rx.clone()));

    let http_server = HttpServer::new(
        registry.clone(),
        listen_addr,
        config.prometheus.path.clone(),
    );
    let http_shutdown = shutdown_rx.clone();
    let mut http_task = tokio::spawn(async move { http_server.run(http_shutdown).await });

    // Wait for shutdown signal or a failing HTTP server
    let http_finished = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            false
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
            false
        }
        result = &mut http_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("HTTP server error: {}", e),
                Err(e) => error!("HTTP server task failed: {}", e),
            }
            true
        }
    };

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        if !http_finished {
            let _ = http_task.await;
        }
        if let Ok(stats) = poller_task.await {
            info!(
                polls = stats.polls,
                succeeded = stats.succeeded,
                failed = stats.failed,
                series_count = registry.series_count(),
                "Final statistics"
            );
        }
    })
    .await;

    info!("Exporter stopped");

    if http_finished {
        anyhow::bail!("HTTP server exited unexpectedly");
    }
    Ok(())
}

/// Resolve when SIGTERM is received.
async fn terminate() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_underscore_flag_aliases() {
        let args = Args::try_parse_from([
            "redash-exporter",
            "--listen_address",
            ":9999",
            "--metrics_interval",
            "15",
            "--redash_scheme",
            "https",
            "--redash_host",
            "redash.internal",
            "--redash_port",
            "443",
        ])
        .unwrap();

        let mut config = ExporterConfig::default();
        args.apply(&mut config);
        assert_eq!(config.prometheus.listen, ":9999");
        assert_eq!(config.poll.interval_secs, 15);
        assert_eq!(config.redash.scheme, "https");
        assert_eq!(config.redash.host, "redash.internal");
        assert_eq!(config.redash.port, "443");
    }

    #[test]
    fn test_kebab_case_flags() {
        let args = Args::try_parse_from([
            "redash-exporter",
            "--listen-address",
            "127.0.0.1:9295",
            "--metrics-interval",
            "60",
            "--redash-host",
            "redash.example.com",
        ])
        .unwrap();

        assert_eq!(args.listen_address.as_deref(), Some("127.0.0.1:9295"));
        assert_eq!(args.metrics_interval, Some(60));
        assert_eq!(args.redash_host.as_deref(), Some("redash.example.com"));
    }
}

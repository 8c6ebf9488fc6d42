//! Prometheus metrics exporter for Redash.
//!
//! This crate polls the Redash `/status.json` endpoint and exposes its
//! counters via an HTTP `/metrics` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │     Redash      │────>│    PollLoop     │────>│ MetricRegistry  │
//! │ (/status.json)  │     │ (fetch + map)   │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! REDASH_API_KEY=... redash-exporter --redash-host redash.internal
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod config;
pub mod http;
pub mod mapping;
pub mod poller;
pub mod registry;
pub mod status;

pub use config::{ConfigError, ExporterConfig, LogFormat, LoggingConfig};
pub use http::HttpServer;
pub use mapping::{MetricSampleSet, map_status};
pub use poller::{PollLoop, PollStats};
pub use registry::{MetricRegistry, RegistryError, SharedRegistry};
pub use status::{FetchError, StatusFetcher, StatusRecord, StatusSource};

/// Initialize tracing with the given configuration.
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ConfigError> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| ConfigError::Logging(e.to_string()))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| ConfigError::Logging(e.to_string()))?;
        }
    }

    Ok(())
}

//! Fetching and decoding the Redash `/status.json` document.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Url};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::trace;

use crate::config::RedashConfig;

/// Path of the status endpoint on the Redash server.
pub const STATUS_PATH: &str = "/status.json";

/// Errors produced while fetching Redash status.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid Redash URL: {0}")]
    InvalidUrl(String),
    #[error("Failed to reach Redash: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Failed to decode status response: {0}. Is the API key correct?")]
    Decode(#[from] serde_json::Error),
}

/// Status record decoded from one `/status.json` response.
///
/// Missing or `null` fields decode to zero. A field present with the wrong
/// type fails the whole decode.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StatusRecord {
    #[serde(deserialize_with = "null_as_default")]
    pub dashboards_count: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub database_metrics: DatabaseMetrics,
    #[serde(deserialize_with = "null_as_default")]
    pub manager: Manager,
    #[serde(deserialize_with = "null_as_default")]
    pub queries_count: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub query_results_count: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub redis_used_memory: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub unused_query_results_count: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub version: String,
    #[serde(deserialize_with = "null_as_default")]
    pub widgets_count: f64,
}

/// Freeform database metrics reported by Redash.
///
/// Entries are expected to be `[name, value]` pairs but are kept as raw JSON
/// so that unexpected shapes never fail the decode.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseMetrics {
    #[serde(deserialize_with = "null_as_default")]
    pub metrics: Vec<Value>,
}

/// Task manager section of the status document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Manager {
    /// Sent by Redash as a quoted number.
    #[serde(deserialize_with = "number_from_string")]
    pub outdated_queries_count: f64,
    #[serde(deserialize_with = "null_as_default")]
    pub queues: Queues,
}

/// Sizes of the Redash worker queues.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Queues {
    #[serde(deserialize_with = "null_as_default")]
    pub default: Queue,
    #[serde(deserialize_with = "null_as_default")]
    pub periodic: Queue,
    #[serde(deserialize_with = "null_as_default")]
    pub queries: Queue,
    #[serde(deserialize_with = "null_as_default")]
    pub scheduled_queries: Queue,
    #[serde(deserialize_with = "null_as_default")]
    pub schemas: Queue,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Queue {
    #[serde(deserialize_with = "null_as_default")]
    pub size: f64,
}

/// Decode `null` as the type's default, like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept `"7"`, `7` or `null`.
fn number_from_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        Text(String),
    }

    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(0.0),
        Some(NumberOrString::Number(n)) => Ok(n),
        Some(NumberOrString::Text(s)) => s.parse::<f64>().map_err(|_| {
            de::Error::custom(format!(
                "outdated_queries_count: invalid numeric string {:?}",
                s
            ))
        }),
    }
}

/// Decode a status document from a response body.
pub fn decode_status(body: &[u8]) -> Result<StatusRecord, FetchError> {
    Ok(serde_json::from_slice(body)?)
}

/// Source of Redash status records.
pub trait StatusSource {
    /// Fetch the current status.
    fn fetch(&self) -> impl Future<Output = Result<StatusRecord, FetchError>> + Send;
}

/// Fetches status from a Redash server over HTTP.
#[derive(Debug, Clone)]
pub struct StatusFetcher {
    client: Client,
    url: Url,
}

impl StatusFetcher {
    /// Create a fetcher for the configured Redash server.
    ///
    /// The API key is appended to the URL as the `api_key` query parameter.
    pub fn new(config: &RedashConfig, api_key: &str) -> Result<Self, FetchError> {
        let url = status_url(config, api_key)?;

        let mut builder = Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build()?;

        Ok(Self { client, url })
    }

    /// The full status URL, including the API key.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl StatusSource for StatusFetcher {
    async fn fetch(&self) -> Result<StatusRecord, FetchError> {
        let response = self.client.get(self.url.clone()).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        trace!(%status, bytes = body.len(), "Received Redash status response");

        decode_status(&body)
    }
}

/// Build `scheme://host:port/status.json?api_key=<key>`.
fn status_url(config: &RedashConfig, api_key: &str) -> Result<Url, FetchError> {
    let base = format!(
        "{}://{}:{}{}",
        config.scheme, config.host, config.port, STATUS_PATH
    );
    let mut url =
        Url::parse(&base).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", base, e)))?;
    url.query_pairs_mut().append_pair("api_key", api_key);
    Ok(url)
}

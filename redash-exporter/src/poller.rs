//! Periodic polling of Redash status into the metric registry.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::mapping::map_status;
use crate::registry::{RegistryError, SharedRegistry};
use crate::status::{FetchError, StatusSource};

/// Error type for a single poll cycle.
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("Failed to update registry: {0}")]
    Registry(#[from] RegistryError),
}

/// Poll cycle counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub polls: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Fetches status on a fixed interval and publishes it to the registry.
///
/// Polls never overlap: the next sleep only starts once the current fetch
/// has completed.
pub struct PollLoop<S> {
    source: S,
    registry: SharedRegistry,
    interval: Duration,
    stats: PollStats,
}

impl<S: StatusSource> PollLoop<S> {
    /// Create a new poll loop.
    pub fn new(source: S, registry: SharedRegistry, interval: Duration) -> Self {
        Self {
            source,
            registry,
            interval,
            stats: PollStats::default(),
        }
    }

    pub fn stats(&self) -> PollStats {
        self.stats
    }

    /// Perform a single poll cycle.
    ///
    /// On failure the registry is left untouched.
    pub async fn poll_once(&mut self) -> Result<usize, PollError> {
        self.stats.polls += 1;

        let result = match self.source.fetch().await {
            Ok(status) => self
                .registry
                .apply(&map_status(&status))
                .map_err(PollError::from),
            Err(e) => Err(e.into()),
        };

        match &result {
            Ok(_) => self.stats.succeeded += 1,
            Err(_) => self.stats.failed += 1,
        }

        result
    }

    /// Run the polling loop until the shutdown signal is received.
    ///
    /// Only the sleep between polls is interrupted by shutdown; a fetch in
    /// progress always runs to completion.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> PollStats {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting Redash status poller"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.poll_once().await {
                Ok(count) => {
                    debug!(samples = count, "Published Redash metrics");
                }
                Err(e) => {
                    error!("Redash polling error: {}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }

        info!(
            polls = self.stats.polls,
            succeeded = self.stats.succeeded,
            failed = self.stats.failed,
            "Redash status poller stopped"
        );

        self.stats
    }
}

/// Resolve once shutdown is requested or the sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{DASHBOARDS_COUNT, INFO};
    use crate::registry::MetricRegistry;
    use crate::status::StatusRecord;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Replays canned fetch results, failing once they run out.
    #[derive(Clone, Default)]
    struct ScriptedSource {
        responses: Arc<Mutex<VecDeque<Result<StatusRecord, String>>>>,
        calls: Arc<Mutex<u64>>,
    }

    impl ScriptedSource {
        fn push_ok(&self, status: StatusRecord) {
            self.responses.lock().push_back(Ok(status));
        }

        fn push_err(&self, body: &str) {
            self.responses.lock().push_back(Err(body.to_string()));
        }

        fn calls(&self) -> u64 {
            *self.calls.lock()
        }
    }

    impl StatusSource for ScriptedSource {
        async fn fetch(&self) -> Result<StatusRecord, FetchError> {
            *self.calls.lock() += 1;
            let next = self.responses.lock().pop_front();
            match next {
                Some(Ok(status)) => Ok(status),
                Some(Err(body)) => crate::status::decode_status(body.as_bytes()),
                None => crate::status::decode_status(b"not json"),
            }
        }
    }

    fn make_registry() -> SharedRegistry {
        Arc::new(MetricRegistry::with_redash_metrics().unwrap())
    }

    fn status(dashboards: f64) -> StatusRecord {
        StatusRecord {
            dashboards_count: dashboards,
            version: "10.1.0".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_poll_once_publishes() {
        let source = ScriptedSource::default();
        source.push_ok(status(12.0));
        let registry = make_registry();
        let mut poller = PollLoop::new(source, registry.clone(), Duration::from_secs(30));

        let count = poller.poll_once().await.unwrap();

        assert_eq!(count, crate::mapping::REDASH_METRICS.len());
        assert_eq!(registry.get(DASHBOARDS_COUNT, &[]), Some(12.0));
        assert_eq!(registry.get(INFO, &["10.1.0"]), Some(1.0));
        assert_eq!(
            poller.stats(),
            PollStats {
                polls: 1,
                succeeded: 1,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_values() {
        let source = ScriptedSource::default();
        source.push_ok(status(12.0));
        source.push_err("<html>Forbidden</html>");
        let registry = make_registry();
        let mut poller = PollLoop::new(source, registry.clone(), Duration::from_secs(30));

        poller.poll_once().await.unwrap();
        let before = registry.render();

        let result = poller.poll_once().await;
        assert!(matches!(
            result,
            Err(PollError::Fetch(FetchError::Decode(_)))
        ));
        assert_eq!(registry.render(), before);
        assert_eq!(poller.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_first_failure_leaves_registry_empty() {
        let registry = make_registry();
        let mut poller =
            PollLoop::new(ScriptedSource::default(), registry.clone(), Duration::from_secs(30));

        assert!(poller.poll_once().await.is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_keeps_polling_after_failures() {
        let source = ScriptedSource::default();
        source.push_err("oops");
        source.push_err("oops");
        source.push_ok(status(7.0));
        let registry = make_registry();
        let poller = PollLoop::new(source.clone(), registry.clone(), Duration::from_secs(30));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(shutdown_rx));

        // Three polls happen at t=0, t=30 and t=60.
        tokio::time::sleep(Duration::from_secs(61)).await;
        shutdown_tx.send(true).unwrap();
        let stats = handle.await.unwrap();

        assert_eq!(source.calls(), 3);
        assert_eq!(stats.polls, 3);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(registry.get(DASHBOARDS_COUNT, &[]), Some(7.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let source = ScriptedSource::default();
        let poller = PollLoop::new(source.clone(), make_registry(), Duration::from_secs(3600));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown_tx.send(true).unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.polls, 1);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_run_exits_immediately_when_already_shut_down() {
        let source = ScriptedSource::default();
        let poller = PollLoop::new(source.clone(), make_registry(), Duration::from_secs(30));

        let (_shutdown_tx, shutdown_rx) = watch::channel(true);
        let stats = poller.run(shutdown_rx).await;

        assert_eq!(stats.polls, 0);
        assert_eq!(source.calls(), 0);
    }
}

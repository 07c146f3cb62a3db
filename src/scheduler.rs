//! Periodic monitor: invokes the engine on an interval and applies the
//! retry/alert policy around its outcomes.
//!
//! The engine reports outcomes and attempt counts; backoff lives here.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::PortalConfig;
use crate::cookies::CookieStore;
use crate::credentials::CredentialStore;
use crate::engine::UsageEngine;
use crate::outcome::Outcome;
use crate::progress::ProgressSender;
use crate::store::{ReadingStore, StoredReading};
use crate::transport::direct::DirectTransport;
use crate::transport::Transport;

/// User-facing notification surface.
pub trait Notifier: Send + Sync {
    /// A fresh reading was persisted.
    fn reading(&self, reading: &StoredReading);

    /// Re-authentication is needed; automatic retries stop until then.
    fn login_required(&self);
}

/// Default surface: structured log lines only.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn reading(&self, reading: &StoredReading) {
        info!(
            gigabytes = reading.gigabytes,
            fetched_at = %reading.fetched_at,
            "usage reading updated"
        );
    }

    fn login_required(&self) {
        warn!("再ログインが必要です — run `rakumon login` and restart the monitor");
    }
}

/// Builds a fresh transport per tick; also the network-available
/// precondition hook.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn Transport>>;

    /// Precondition checked before each tick.
    fn available(&self) -> bool {
        true
    }
}

/// Factory for the direct HTTP transport. Each fetch gets its own cookie
/// store: sessions are not reused across transports here, the portal is
/// logged into per fetch.
pub struct DirectFactory {
    config: PortalConfig,
}

impl DirectFactory {
    pub fn new(config: PortalConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportFactory for DirectFactory {
    async fn create(&self) -> Result<Box<dyn Transport>> {
        let transport = DirectTransport::new(&self.config, Arc::new(CookieStore::default()))?;
        Ok(Box::new(transport))
    }
}

/// Factory for the rendered-browser transport.
#[cfg(feature = "browser")]
pub struct BrowserFactory {
    config: PortalConfig,
}

#[cfg(feature = "browser")]
impl BrowserFactory {
    pub fn new(config: PortalConfig) -> Self {
        Self { config }
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl TransportFactory for BrowserFactory {
    async fn create(&self) -> Result<Box<dyn Transport>> {
        let transport = crate::transport::browser::BrowserTransport::launch(&self.config).await?;
        Ok(Box::new(transport))
    }
}

pub struct Monitor {
    engine: UsageEngine,
    credentials: Arc<dyn CredentialStore>,
    readings: Arc<dyn ReadingStore>,
    notifier: Arc<dyn Notifier>,
    factory: Arc<dyn TransportFactory>,
    clock: Arc<dyn Clock>,
}

impl Monitor {
    pub fn new(
        config: PortalConfig,
        credentials: Arc<dyn CredentialStore>,
        readings: Arc<dyn ReadingStore>,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            engine: UsageEngine::new(config),
            credentials,
            readings,
            notifier: Arc::new(LogNotifier),
            factory,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// One fetch: resolve credentials, build a transport, run the engine,
    /// persist/notify per outcome.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<Outcome> {
        let Some(credentials) = self.credentials.get().await? else {
            self.notifier.login_required();
            return Ok(Outcome::LoginRequired);
        };

        let transport = self.factory.create().await?;
        let report = self
            .engine
            .fetch_usage(
                transport.as_ref(),
                &credentials,
                &ProgressSender::disabled(),
                cancel,
            )
            .await;

        match &report.outcome {
            Outcome::Success(reading) => {
                let stored = StoredReading {
                    gigabytes: reading.gigabytes,
                    fetched_at: self.clock.now(),
                };
                self.readings.append(*reading, stored.fetched_at).await?;
                self.notifier.reading(&stored);
            }
            Outcome::LoginRequired => self.notifier.login_required(),
            // ParseFailure is retryable like the network failures but must
            // stay distinguishable in logs.
            Outcome::ParseFailure(raw) => {
                warn!(raw = %raw, attempts = report.attempts, "usage text not in expected shape")
            }
            Outcome::Timeout | Outcome::TransportFailure(_) => {
                warn!(outcome = ?report.outcome, attempts = report.attempts, "fetch failed; will retry")
            }
            Outcome::Cancelled => {}
        }

        Ok(report.outcome)
    }

    /// Fetch on an interval until cancelled or until the portal demands
    /// re-authentication. Retryable failures double the wait, capped at
    /// eight intervals.
    pub async fn run(&self, interval: Duration, cancel: &CancellationToken) -> Result<()> {
        let mut delay = interval;

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            if !self.factory.available() {
                warn!("network unavailable; skipping tick");
            } else {
                match self.tick(cancel).await? {
                    Outcome::LoginRequired => return Ok(()),
                    Outcome::Cancelled => return Ok(()),
                    outcome if outcome.is_retryable() => {
                        delay = (delay * 2).min(interval * 8);
                        info!(next_attempt_in = ?delay, "backing off");
                    }
                    _ => delay = interval,
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credentials, MemoryCredentialStore};
    use crate::heuristics::PortalForm;
    use crate::store::JsonFileStore;
    use crate::transport::{PageSnapshot, TransportError};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticTransport {
        html: String,
        url: String,
    }

    #[async_trait]
    impl Transport for StaticTransport {
        async fn navigate(&self, _url: &str) -> Result<PageSnapshot, TransportError> {
            self.snapshot().await
        }

        async fn snapshot(&self) -> Result<PageSnapshot, TransportError> {
            Ok(PageSnapshot {
                url: self.url.clone(),
                title: String::new(),
                html: self.html.clone(),
            })
        }

        async fn evaluate(&self, _expression: &str) -> Result<Option<String>, TransportError> {
            Err(TransportError::Unsupported)
        }

        async fn submit(
            &self,
            _form: &PortalForm,
            _credentials: Option<&Credentials>,
        ) -> Result<PageSnapshot, TransportError> {
            self.snapshot().await
        }

        async fn close(&self) {}
    }

    struct StaticFactory {
        html: String,
        url: String,
    }

    #[async_trait]
    impl TransportFactory for StaticFactory {
        async fn create(&self) -> Result<Box<dyn Transport>> {
            Ok(Box::new(StaticTransport {
                html: self.html.clone(),
                url: self.url.clone(),
            }))
        }
    }

    #[derive(Default)]
    struct CountingNotifier {
        readings: AtomicUsize,
        login_alerts: AtomicUsize,
    }

    impl Notifier for CountingNotifier {
        fn reading(&self, _reading: &StoredReading) {
            self.readings.fetch_add(1, Ordering::SeqCst);
        }

        fn login_required(&self) {
            self.login_alerts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn test_config() -> PortalConfig {
        PortalConfig {
            dashboard_url: "https://portal.test/dashboard".to_string(),
            dashboard_marker: "portal.test/dashboard".to_string(),
            max_poll_attempts: 2,
            max_page_attempts: 2,
            poll_interval: Duration::from_millis(1),
            ..PortalConfig::default()
        }
    }

    #[tokio::test]
    async fn tick_persists_successful_reading() {
        let dir = tempfile::tempdir().unwrap();
        let readings = Arc::new(JsonFileStore::with_path(dir.path().join("r.json")));
        let notifier = Arc::new(CountingNotifier::default());

        let monitor = Monitor::new(
            test_config(),
            Arc::new(MemoryCredentialStore::with_credentials(Credentials::new(
                "alice", "pw",
            ))),
            readings.clone(),
            Arc::new(StaticFactory {
                html: r#"<div class="title__data">7.1 GB</div>"#.to_string(),
                url: "https://portal.test/dashboard".to_string(),
            }),
        )
        .with_notifier(notifier.clone());

        let outcome = monitor.tick(&CancellationToken::new()).await.unwrap();
        assert!(matches!(outcome, Outcome::Success(_)));
        assert_eq!(readings.latest().await.unwrap().unwrap().gigabytes, 7.1);
        assert_eq!(notifier.readings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_credentials_raise_the_alert_and_stop_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = Arc::new(CountingNotifier::default());

        let monitor = Monitor::new(
            test_config(),
            Arc::new(MemoryCredentialStore::default()),
            Arc::new(JsonFileStore::with_path(dir.path().join("r.json"))),
            Arc::new(StaticFactory {
                html: String::new(),
                url: "https://portal.test/dashboard".to_string(),
            }),
        )
        .with_notifier(notifier.clone());

        // run() returns instead of retrying: re-auth needs the user.
        monitor
            .run(Duration::from_millis(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(notifier.login_alerts.load(Ordering::SeqCst), 1);
    }
}

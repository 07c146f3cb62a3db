//! The login state machine and usage poll loop.
//!
//! One fetch at a time: navigate to the dashboard URL, work through however
//! many login/consent pages the portal serves, then sample the dashboard for
//! the usage element. Every exit path maps to exactly one [`Outcome`].

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PortalConfig;
use crate::credentials::Credentials;
use crate::extract::{fallback_scan, normalize_usage};
use crate::heuristics::scan_form;
use crate::outcome::{FetchReport, Outcome, UsageReading};
use crate::progress::ProgressSender;
use crate::transport::{Transport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageClass {
    Login,
    Dashboard,
    Other,
}

pub struct UsageEngine {
    config: PortalConfig,
}

impl UsageEngine {
    pub fn new(config: PortalConfig) -> Self {
        Self { config }
    }

    /// Drive one fetch to a terminal outcome.
    ///
    /// The transport is closed before returning, on every path including
    /// cancellation.
    pub async fn fetch_usage(
        &self,
        transport: &dyn Transport,
        credentials: &Credentials,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> FetchReport {
        let started = Instant::now();
        let mut attempts = 0u32;

        let outcome = self
            .run(transport, credentials, progress, cancel, &mut attempts)
            .await;
        transport.close().await;

        match &outcome {
            Outcome::Success(reading) => {
                info!(gigabytes = reading.gigabytes, attempts, "usage fetched")
            }
            other => warn!(outcome = ?other, attempts, "fetch did not succeed"),
        }

        FetchReport {
            outcome,
            attempts,
            elapsed: started.elapsed(),
        }
    }

    fn classify(&self, url: &str) -> PageClass {
        if url.contains(&self.config.dashboard_marker) {
            PageClass::Dashboard
        } else if self.config.login_markers.iter().any(|m| url.contains(m)) {
            PageClass::Login
        } else {
            PageClass::Other
        }
    }

    /// Map a transport error to its terminal outcome, preferring the
    /// cancellation signal when both raced (closing the transport surfaces
    /// as connection errors).
    fn fail(&self, err: TransportError, cancel: &CancellationToken) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }
        Outcome::TransportFailure(err.to_string())
    }

    async fn run(
        &self,
        transport: &dyn Transport,
        credentials: &Credentials,
        progress: &ProgressSender,
        cancel: &CancellationToken,
        attempts: &mut u32,
    ) -> Outcome {
        progress.send("Connecting...");
        let mut snapshot = match transport.navigate(&self.config.dashboard_url).await {
            Ok(s) => s,
            Err(e) => return self.fail(e, cancel),
        };

        let mut login_attempted = false;
        let mut page_attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Outcome::Cancelled;
            }

            let class = self.classify(&snapshot.url);
            debug!(url = %snapshot.url, ?class, "page loaded");

            if class == PageClass::Dashboard {
                // Single handoff point: duplicate load signals for the same
                // navigation cannot restart the poll loop.
                progress.send("Dashboard access...");
                return self.poll_usage(transport, progress, cancel, attempts).await;
            }

            if class == PageClass::Login && login_attempted {
                // Credentials rejected or an unhandled interstitial; retrying
                // indefinitely would mask it.
                warn!(url = %snapshot.url, "login page reached again after a completed attempt");
                return Outcome::LoginRequired;
            }

            match scan_form(&snapshot.html) {
                Some(form) if form.is_login() => {
                    progress.send("Logging in...");
                    info!(url = %snapshot.url, "submitting credentials");
                    login_attempted = true;
                    *attempts += 1;
                    page_attempts = 0;
                    snapshot = match transport.submit(&form, Some(credentials)).await {
                        Ok(s) => s,
                        Err(e) => return self.fail(e, cancel),
                    };
                }
                Some(form) => {
                    // No input fields but a submit-like control: a
                    // consent/interstitial page.
                    progress.send("Confirming...");
                    info!(url = %snapshot.url, "submitting consent page");
                    *attempts += 1;
                    page_attempts += 1;
                    if page_attempts >= self.config.max_page_attempts {
                        progress.send("Timeout!");
                        return Outcome::Timeout;
                    }
                    snapshot = match transport.submit(&form, None).await {
                        Ok(s) => s,
                        Err(e) => return self.fail(e, cancel),
                    };
                }
                None => {
                    // Neither fields nor a submit control; the page may still
                    // be loading asynchronous content.
                    *attempts += 1;
                    page_attempts += 1;
                    if page_attempts >= self.config.max_page_attempts {
                        progress.send("Timeout!");
                        return Outcome::Timeout;
                    }
                    if sleep_or_cancelled(self.config.poll_interval, cancel).await {
                        return Outcome::Cancelled;
                    }
                    snapshot = match transport.snapshot().await {
                        Ok(s) => s,
                        Err(e) => return self.fail(e, cancel),
                    };
                }
            }
        }
    }

    /// Sample the dashboard for the usage element, bounded by
    /// `max_poll_attempts`. Unparseable non-null text means the element is
    /// still rendering a placeholder, so retry rather than fail.
    async fn poll_usage(
        &self,
        transport: &dyn Transport,
        progress: &ProgressSender,
        cancel: &CancellationToken,
        attempts: &mut u32,
    ) -> Outcome {
        let probe = usage_probe_script(&self.config.usage_selector);
        let max = self.config.max_poll_attempts;
        let mut last_raw: Option<String> = None;

        for attempt in 1..=max {
            if cancel.is_cancelled() {
                return Outcome::Cancelled;
            }
            *attempts += 1;
            progress.send(format!("Reading data... ({attempt}/{max})"));

            let text = match transport.evaluate(&probe).await {
                Ok(text) => text,
                Err(TransportError::Unsupported) => match transport.snapshot().await {
                    Ok(snap) => structured_text(&snap.html, &self.config.usage_selector),
                    Err(e) => return self.fail(e, cancel),
                },
                Err(e) => return self.fail(e, cancel),
            };

            if let Some(raw) = text {
                if let Some(value) = normalize_usage(&raw, &self.config.usage_unit) {
                    progress.send("Success!");
                    return Outcome::Success(UsageReading::new(value));
                }
                debug!(raw = %raw, attempt, "usage element not yet parseable");
                last_raw = Some(raw);
            }

            if attempt < max && sleep_or_cancelled(self.config.poll_interval, cancel).await {
                return Outcome::Cancelled;
            }
        }

        // Structured extraction never produced a value; scan the raw markup
        // before giving up.
        if let Ok(snap) = transport.snapshot().await {
            if let Some(value) = fallback_scan(&snap.html, &self.config.usage_unit) {
                info!(gigabytes = value, "fallback extractor recovered the reading");
                progress.send("Success!");
                return Outcome::Success(UsageReading::new(value));
            }
        }

        match last_raw {
            Some(raw) => Outcome::ParseFailure(raw),
            None => {
                progress.send("Timeout!");
                Outcome::Timeout
            }
        }
    }
}

/// Probe expression for the rendered transport: the usage element's text, or
/// null when absent.
fn usage_probe_script(selector: &str) -> String {
    format!(
        r#"(function() {{
            var el = document.querySelector({selector});
            return el ? el.innerText : null;
        }})()"#,
        selector = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string()),
    )
}

/// Structured extraction over raw markup for the direct transport.
fn structured_text(html: &str, selector: &str) -> Option<String> {
    let document = scraper::Html::parse_document(html);
    let selector = scraper::Selector::parse(selector).ok()?;
    let text = document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())?;
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Sleep for `duration` unless the cancellation signal fires first.
async fn sleep_or_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::PortalForm;
    use crate::progress::ProgressSender;
    use crate::transport::PageSnapshot;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted transport: serves a fixed sequence of snapshots, one per
    /// page-producing call.
    struct ScriptedTransport {
        pages: Mutex<Vec<PageSnapshot>>,
        submissions: AtomicUsize,
        closed: AtomicBool,
    }

    impl ScriptedTransport {
        fn new(pages: Vec<PageSnapshot>) -> Self {
            Self {
                pages: Mutex::new(pages),
                submissions: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }
        }

        fn next_page(&self) -> PageSnapshot {
            let mut pages = self.pages.lock().unwrap();
            if pages.len() > 1 {
                pages.remove(0)
            } else {
                pages[0].clone()
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn navigate(&self, _url: &str) -> Result<PageSnapshot, TransportError> {
            Ok(self.next_page())
        }

        async fn snapshot(&self) -> Result<PageSnapshot, TransportError> {
            Ok(self.next_page())
        }

        async fn evaluate(&self, _expression: &str) -> Result<Option<String>, TransportError> {
            Err(TransportError::Unsupported)
        }

        async fn submit(
            &self,
            _form: &PortalForm,
            _credentials: Option<&Credentials>,
        ) -> Result<PageSnapshot, TransportError> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            Ok(self.next_page())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn page(url: &str, html: &str) -> PageSnapshot {
        PageSnapshot {
            url: url.to_string(),
            title: String::new(),
            html: html.to_string(),
        }
    }

    fn test_config() -> PortalConfig {
        PortalConfig {
            dashboard_url: "https://portal.test/dashboard".to_string(),
            dashboard_marker: "portal.test/dashboard".to_string(),
            login_markers: vec!["login.test".to_string()],
            max_page_attempts: 3,
            max_poll_attempts: 3,
            poll_interval: Duration::from_millis(1),
            settle_delay: Duration::from_millis(1),
            ..PortalConfig::default()
        }
    }

    const LOGIN_HTML: &str = r#"
        <form action="/auth" method="post">
            <input type="text" name="username">
            <input type="password" name="passwd">
            <input type="submit" value="ログイン">
        </form>
    "#;

    const DASHBOARD_HTML: &str = r#"<div class="title__data">19.5 GB</div>"#;

    async fn fetch(engine: &UsageEngine, transport: &ScriptedTransport) -> FetchReport {
        engine
            .fetch_usage(
                transport,
                &Credentials::new("alice", "pw"),
                &ProgressSender::disabled(),
                &CancellationToken::new(),
            )
            .await
    }

    #[tokio::test]
    async fn already_authenticated_dashboard_succeeds() {
        let engine = UsageEngine::new(test_config());
        let transport = ScriptedTransport::new(vec![page(
            "https://portal.test/dashboard",
            DASHBOARD_HTML,
        )]);

        let report = fetch(&engine, &transport).await;
        assert_eq!(
            report.outcome,
            Outcome::Success(UsageReading::new(19.5))
        );
        assert!(transport.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn login_roundtrip_reaches_dashboard() {
        let engine = UsageEngine::new(test_config());
        let transport = ScriptedTransport::new(vec![
            page("https://login.test/signin", LOGIN_HTML),
            page("https://portal.test/dashboard", DASHBOARD_HTML),
        ]);

        let report = fetch(&engine, &transport).await;
        assert_eq!(report.outcome, Outcome::Success(UsageReading::new(19.5)));
        assert_eq!(transport.submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_login_page_is_login_required() {
        let engine = UsageEngine::new(test_config());
        // The portal bounces the submission straight back to the login page.
        let transport = ScriptedTransport::new(vec![
            page("https://login.test/signin", LOGIN_HTML),
            page("https://login.test/signin?error=1", LOGIN_HTML),
        ]);

        let report = fetch(&engine, &transport).await;
        assert_eq!(report.outcome, Outcome::LoginRequired);
        assert_eq!(transport.submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blank_page_times_out_after_bound() {
        let engine = UsageEngine::new(test_config());
        let transport =
            ScriptedTransport::new(vec![page("https://login.test/loading", "<p>wait</p>")]);

        let report = fetch(&engine, &transport).await;
        assert_eq!(report.outcome, Outcome::Timeout);
    }

    #[tokio::test]
    async fn consent_page_is_clicked_through() {
        let engine = UsageEngine::new(test_config());
        let transport = ScriptedTransport::new(vec![
            page("https://login.test/terms", "<button>同意</button>"),
            page("https://portal.test/dashboard", DASHBOARD_HTML),
        ]);

        let report = fetch(&engine, &transport).await;
        assert_eq!(report.outcome, Outcome::Success(UsageReading::new(19.5)));
        assert_eq!(transport.submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn placeholder_text_yields_parse_failure_after_fallback() {
        let engine = UsageEngine::new(test_config());
        let transport = ScriptedTransport::new(vec![page(
            "https://portal.test/dashboard",
            r#"<div class="title__data">データ使用量</div>"#,
        )]);

        let report = fetch(&engine, &transport).await;
        assert_eq!(
            report.outcome,
            Outcome::ParseFailure("データ使用量".to_string())
        );
    }

    #[tokio::test]
    async fn fallback_extractor_recovers_shifted_markup() {
        // Selector misses, but the textual convention holds.
        let engine = UsageEngine::new(test_config());
        let transport = ScriptedTransport::new(vec![page(
            "https://portal.test/dashboard",
            r#"<span class="renamed">3.2 GB</span>"#,
        )]);

        let report = fetch(&engine, &transport).await;
        assert_eq!(report.outcome, Outcome::Success(UsageReading::new(3.2)));
    }

    #[tokio::test]
    async fn cancellation_wins_over_polling() {
        let engine = UsageEngine::new(test_config());
        let transport = ScriptedTransport::new(vec![page(
            "https://portal.test/dashboard",
            r#"<div class="title__data">...</div>"#,
        )]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = engine
            .fetch_usage(
                &transport,
                &Credentials::new("alice", "pw"),
                &ProgressSender::disabled(),
                &cancel,
            )
            .await;
        assert_eq!(report.outcome, Outcome::Cancelled);
        assert!(transport.closed.load(Ordering::SeqCst));
    }
}

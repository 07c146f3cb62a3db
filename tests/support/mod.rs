#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rakumon::config::PortalConfig;
use rakumon::cookies::CookieStore;
use rakumon::credentials::Credentials;
use rakumon::engine::UsageEngine;
use rakumon::outcome::FetchReport;
use rakumon::progress::ProgressSender;
use rakumon::transport::direct::DirectTransport;
use tokio_util::sync::CancellationToken;

pub const DASHBOARD_HTML: &str =
    r#"<html><head><title>my 楽天モバイル</title></head><body><div class="title__data">19.5 GB</div></body></html>"#;

pub const LOGIN_HTML: &str = r#"
    <html><body>
        <form action="/auth" method="post">
            <input type="hidden" name="token" value="tok-1">
            <input type="text" name="username">
            <input type="password" name="passwd">
            <input type="submit" name="submit" value="ログイン">
        </form>
    </body></html>
"#;

/// Portal layout pointed at a mock server, with attempt bounds small enough
/// for tests to finish quickly.
pub fn portal_config(base: &str) -> PortalConfig {
    PortalConfig {
        dashboard_url: format!("{base}/dashboard"),
        dashboard_marker: "/dashboard".to_string(),
        login_markers: vec!["/login".to_string()],
        max_page_attempts: 3,
        max_poll_attempts: 2,
        poll_interval: Duration::from_millis(1),
        ..PortalConfig::default()
    }
}

pub fn credentials() -> Credentials {
    Credentials::new("alice@example.com", "hunter2")
}

/// Run one fetch over the direct transport against the given config.
pub async fn fetch_direct(config: PortalConfig) -> FetchReport {
    fetch_direct_with(config, &CancellationToken::new()).await
}

pub async fn fetch_direct_with(config: PortalConfig, cancel: &CancellationToken) -> FetchReport {
    let transport = DirectTransport::new(&config, Arc::new(CookieStore::default()))
        .expect("transport should build");
    let engine = UsageEngine::new(config);
    engine
        .fetch_usage(
            &transport,
            &credentials(),
            &ProgressSender::disabled(),
            cancel,
        )
        .await
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::duration::deserialize_duration;

fn default_dashboard_url() -> String {
    "https://portal.mobile.rakuten.co.jp/dashboard".to_string()
}

fn default_dashboard_marker() -> String {
    "portal.mobile.rakuten.co.jp/dashboard".to_string()
}

fn default_login_markers() -> Vec<String> {
    vec![
        "login.account.rakuten.com".to_string(),
        "id.rakuten.co.jp".to_string(),
        // Generic catch for member-login style paths.
        "member/login".to_string(),
    ]
}

fn default_usage_selector() -> String {
    "div.title__data".to_string()
}

fn default_usage_unit() -> String {
    "GB".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Linux; Android 10; K) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/131.0.0.0 Mobile Safari/537.36"
        .to_string()
}

fn default_max_page_attempts() -> u32 {
    10
}

fn default_max_poll_attempts() -> u32 {
    30
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_settle_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_redirects() -> u32 {
    10
}

/// Portal constants and engine bounds.
///
/// The defaults describe the Rakuten Mobile portal; tests point the URLs at a
/// mock server and shrink the delays.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Entry URL. When a session is live this lands on the dashboard
    /// directly; otherwise the portal redirects into its login flow.
    pub dashboard_url: String,

    /// URL substring identifying the dashboard page.
    pub dashboard_marker: String,

    /// URL substrings identifying the portal's authentication domains.
    pub login_markers: Vec<String>,

    /// CSS selector for the usage display element.
    pub usage_selector: String,

    /// Unit token rendered next to the usage figure.
    pub usage_unit: String,

    /// User-Agent sent by both transports.
    pub user_agent: String,

    /// Attempts before giving up on a page that exposes neither login fields
    /// nor a submit control.
    pub max_page_attempts: u32,

    /// Attempts before giving up on the dashboard's usage element.
    pub max_poll_attempts: u32,

    /// Delay between attempts in both loops.
    #[serde(deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,

    /// Pause between populating login fields and invoking the submit
    /// control, so client-side validation can observe the values.
    #[serde(deserialize_with = "deserialize_duration")]
    pub settle_delay: Duration,

    /// Redirect-chain cap for the direct transport.
    pub max_redirects: u32,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            dashboard_url: default_dashboard_url(),
            dashboard_marker: default_dashboard_marker(),
            login_markers: default_login_markers(),
            usage_selector: default_usage_selector(),
            usage_unit: default_usage_unit(),
            user_agent: default_user_agent(),
            max_page_attempts: default_max_page_attempts(),
            max_poll_attempts: default_max_poll_attempts(),
            poll_interval: default_poll_interval(),
            settle_delay: default_settle_delay(),
            max_redirects: default_max_redirects(),
        }
    }
}

impl PortalConfig {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    /// Default config file location (`~/.config/rakumon/config.toml`).
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("Could not find config directory")?;
        Ok(dir.join("rakumon").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_the_portal() {
        let config = PortalConfig::default();
        assert!(config.dashboard_url.contains("portal.mobile.rakuten.co.jp"));
        assert_eq!(config.max_poll_attempts, 30);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn partial_toml_overrides_keep_defaults() {
        let config: PortalConfig = toml::from_str(
            r#"
            dashboard_url = "http://localhost:9000/dashboard"
            dashboard_marker = "localhost:9000/dashboard"
            poll_interval = "2s"
            "#,
        )
        .unwrap();
        assert_eq!(config.dashboard_url, "http://localhost:9000/dashboard");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.usage_selector, "div.title__data");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = PortalConfig::load(Path::new("/nonexistent/rakumon.toml")).unwrap();
        assert_eq!(config.usage_unit, "GB");
    }
}

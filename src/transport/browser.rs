//! Rendered transport: a headless Chromium instance driven over the Chrome
//! DevTools Protocol.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use secrecy::ExposeSecret;
use tokio::task::JoinHandle;

use super::{page_title, PageSnapshot, Transport, TransportError};
use crate::config::PortalConfig;
use crate::credentials::Credentials;
use crate::heuristics::{PortalForm, Submit};

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

fn cdp<E: std::fmt::Display>(err: E) -> TransportError {
    TransportError::Browser(err.to_string())
}

pub struct BrowserTransport {
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler_task: JoinHandle<()>,
    settle_delay: Duration,
}

impl BrowserTransport {
    /// Launch a headless browser and open a blank page carrying the portal
    /// User-Agent.
    pub async fn launch(config: &PortalConfig) -> Result<Self, TransportError> {
        let chrome_path = find_chrome().ok_or_else(|| {
            TransportError::Browser(
                "Chrome/Chromium not found. Install Chrome or use the direct transport."
                    .to_string(),
            )
        })?;

        let browser_config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .build()
            .map_err(TransportError::Browser)?;

        let (browser, mut handler) = Browser::launch(browser_config).await.map_err(cdp)?;
        let handler_task = tokio::spawn(async move { while (handler.next().await).is_some() {} });

        let page = browser.new_page("about:blank").await.map_err(cdp)?;
        page.set_user_agent(&config.user_agent).await.map_err(cdp)?;

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            page,
            handler_task,
            settle_delay: config.settle_delay,
        })
    }

    async fn read_page(&self) -> Result<PageSnapshot, TransportError> {
        let url = self
            .page
            .url()
            .await
            .map_err(cdp)?
            .unwrap_or_default();
        let html = self.page.content().await.map_err(cdp)?;
        Ok(PageSnapshot {
            url,
            title: page_title(&html),
            html,
        })
    }

    async fn wait_for_load(&self) {
        // A consent click may mutate the page without a navigation; don't
        // hang on one that never comes.
        let _ = tokio::time::timeout(NAVIGATION_TIMEOUT, self.page.wait_for_navigation()).await;
    }
}

#[async_trait]
impl Transport for BrowserTransport {
    async fn navigate(&self, url: &str) -> Result<PageSnapshot, TransportError> {
        self.page.goto(url).await.map_err(cdp)?;
        self.page.wait_for_navigation().await.map_err(cdp)?;
        self.read_page().await
    }

    async fn snapshot(&self) -> Result<PageSnapshot, TransportError> {
        self.read_page().await
    }

    async fn evaluate(&self, expression: &str) -> Result<Option<String>, TransportError> {
        let result = self.page.evaluate(expression).await.map_err(cdp)?;
        Ok(match result.value() {
            None | Some(serde_json::Value::Null) => None,
            // Script evaluators hand back textual encodings of null/undefined.
            Some(serde_json::Value::String(s)) if s == "null" || s == "undefined" => None,
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        })
    }

    async fn submit(
        &self,
        form: &PortalForm,
        credentials: Option<&Credentials>,
    ) -> Result<PageSnapshot, TransportError> {
        if let Some(creds) = credentials {
            let fill = fill_script(form, creds);
            self.page.evaluate(fill).await.map_err(cdp)?;
            // Let client-side validation observe the programmatic values.
            tokio::time::sleep(self.settle_delay).await;
        }

        self.page.evaluate(submit_script(form)).await.map_err(cdp)?;
        self.wait_for_load().await;
        self.read_page().await
    }

    async fn close(&self) {
        let taken = self.browser.lock().expect("browser lock poisoned").take();
        if let Some(mut browser) = taken {
            let _ = browser.close().await;
        }
        self.handler_task.abort();
    }
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

/// JS that populates the detected fields and dispatches the notification
/// events client-side frameworks listen for.
fn fill_script(form: &PortalForm, credentials: &Credentials) -> String {
    let fill_username = form
        .username_field
        .as_deref()
        .map(|name| {
            let selector = format!("input[name={}]", js_string(name));
            format!(
                "fill(document.querySelector({}), {});",
                js_string(&selector),
                js_string(&credentials.identifier),
            )
        })
        .unwrap_or_default();

    format!(
        r#"(function() {{
            function fill(el, value) {{
                if (!el) return;
                el.focus();
                el.value = value;
                ['input', 'change', 'blur'].forEach(function(type) {{
                    el.dispatchEvent(new Event(type, {{ bubbles: true }}));
                }});
            }}
            {fill_username}
            fill(document.querySelector('input[type=password]'), {password});
        }})()"#,
        password = js_string(credentials.secret.expose_secret()),
    )
}

/// JS that invokes the detected submit control, falling back to a
/// programmatic `form.submit()`.
fn submit_script(form: &PortalForm) -> String {
    let find_form = r#"
        var pw = document.querySelector('input[type=password]');
        var form = pw ? pw.form : document.forms[0];
    "#;

    match &form.submit {
        Submit::Control { name, .. } => {
            let by_name = name
                .as_deref()
                .map(|n| format!("form.querySelector('[name=' + {} + ']') || ", js_string(n)))
                .unwrap_or_default();
            format!(
                r#"(function() {{
                    {find_form}
                    if (!form) return;
                    var control = {by_name}form.querySelector('[type=submit], button:not([type])');
                    if (control) {{ control.click(); }} else {{ form.submit(); }}
                }})()"#
            )
        }
        Submit::Labelled { label } => format!(
            r#"(function() {{
                var label = {label};
                var candidates = document.querySelectorAll('button, a, input[type=button], input[type=submit], div[role=button]');
                for (var i = 0; i < candidates.length; i++) {{
                    var text = (candidates[i].innerText || candidates[i].value || '').trim().toLowerCase();
                    if (text.indexOf(label) !== -1) {{ candidates[i].click(); return; }}
                }}
            }})()"#,
            label = js_string(label),
        ),
        Submit::Programmatic => format!(
            r#"(function() {{
                {find_form}
                if (form) form.submit();
            }})()"#
        ),
    }
}

/// Find a Chrome/Chromium executable.
fn find_chrome() -> Option<String> {
    for name in ["google-chrome", "chromium"] {
        if let Ok(output) = std::process::Command::new("which").arg(name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(path);
                }
            }
        }
    }

    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // NixOS
        "/run/current-system/sw/bin/google-chrome",
        "/run/current-system/sw/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    candidates
        .into_iter()
        .find(|candidate| std::path::Path::new(candidate).exists())
        .map(str::to_string)
}

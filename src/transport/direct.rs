//! Direct HTTP transport: plain GET/POST plus HTML parsing, no renderer.
//!
//! Redirects are followed manually so every hop's `Set-Cookie` feeds the
//! cookie store and every outgoing request carries the store's cookies.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::header::{COOKIE, LOCATION, SET_COOKIE};
use reqwest::Method;
use url::Url;

use super::{page_title, PageSnapshot, Transport, TransportError};
use crate::clock::{Clock, SystemClock};
use crate::config::PortalConfig;
use crate::cookies::{parse_set_cookie, CookieStore};
use crate::credentials::Credentials;
use crate::heuristics::{form_payload, PortalForm};

pub struct DirectTransport {
    client: reqwest::Client,
    cookies: Arc<CookieStore>,
    clock: Arc<dyn Clock>,
    max_redirects: u32,
    current_url: Mutex<Option<Url>>,
}

impl DirectTransport {
    pub fn new(config: &PortalConfig, cookies: Arc<CookieStore>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            cookies,
            clock: Arc::new(SystemClock),
            max_redirects: config.max_redirects,
            current_url: Mutex::new(None),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn current(&self) -> Result<Url, TransportError> {
        self.current_url
            .lock()
            .expect("url lock poisoned")
            .clone()
            .ok_or(TransportError::NoPage)
    }

    /// One logical page load: issue the request, harvest cookies on every
    /// hop, follow redirects (downgrading to GET, as browsers do) up to the
    /// configured cap.
    async fn run(
        &self,
        mut method: Method,
        mut url: Url,
        mut body: Option<Vec<(String, String)>>,
    ) -> Result<PageSnapshot, TransportError> {
        let mut hops = 0u32;

        loop {
            let mut request = self.client.request(method.clone(), url.clone());
            if let Some(header) = self.cookies.header_for(&url) {
                request = request.header(COOKIE, header);
            }
            if let Some(fields) = &body {
                request = request.form(fields);
            }

            let response = request.send().await?;

            let now = self.clock.now();
            let harvested: Vec<_> = response
                .headers()
                .get_all(SET_COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .filter_map(|s| parse_set_cookie(s, &url, now))
                .collect();
            if !harvested.is_empty() {
                self.cookies.save(harvested);
            }

            let status = response.status();
            if status.is_redirection() {
                hops += 1;
                if hops > self.max_redirects {
                    return Err(TransportError::TooManyRedirects(self.max_redirects));
                }
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or(TransportError::Status {
                        status: status.as_u16(),
                        url: url.to_string(),
                    })?;
                tracing::debug!(from = %url, to = location, "following redirect");
                url = url.join(location)?;
                method = Method::GET;
                body = None;
                continue;
            }

            if !status.is_success() {
                return Err(TransportError::Status {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            let html = response.text().await?;
            *self.current_url.lock().expect("url lock poisoned") = Some(url.clone());

            return Ok(PageSnapshot {
                url: url.to_string(),
                title: page_title(&html),
                html,
            });
        }
    }
}

#[async_trait]
impl Transport for DirectTransport {
    async fn navigate(&self, url: &str) -> Result<PageSnapshot, TransportError> {
        let url = Url::parse(url)?;
        self.run(Method::GET, url, None).await
    }

    async fn snapshot(&self) -> Result<PageSnapshot, TransportError> {
        let url = self.current()?;
        self.run(Method::GET, url, None).await
    }

    async fn evaluate(&self, _expression: &str) -> Result<Option<String>, TransportError> {
        Err(TransportError::Unsupported)
    }

    async fn submit(
        &self,
        form: &PortalForm,
        credentials: Option<&Credentials>,
    ) -> Result<PageSnapshot, TransportError> {
        let base = self.current()?;
        let target = match &form.action {
            Some(action) => base.join(action)?,
            None => base,
        };

        let payload = form_payload(form, credentials);

        if form.method == "post" {
            self.run(Method::POST, target, Some(payload)).await
        } else {
            let mut target = target;
            target
                .query_pairs_mut()
                .extend_pairs(payload.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            self.run(Method::GET, target, None).await
        }
    }

    async fn close(&self) {
        // Connections are pooled by the client and dropped with it.
    }
}

//! In-memory session cookie store shared by the direct transport's
//! request/response hooks.
//!
//! Scoped to one engine instance; nothing is persisted across runs.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use url::Url;

use crate::clock::{Clock, SystemClock};

/// A single session cookie.
#[derive(Debug, Clone, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Session cookies carry no expiry.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Cookie {
    fn key_matches(&self, other: &Cookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }

    fn matches_url(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let domain_ok =
            host == self.domain || host.ends_with(&format!(".{}", self.domain.trim_start_matches('.')));
        let path_ok = url.path().starts_with(&self.path);
        domain_ok && path_ok
    }

    fn expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at < now)
    }
}

/// Thread-safe cookie cache with replace-on-match semantics.
///
/// At most one cookie is kept per (name, domain, path); saving a cookie with
/// a matching key replaces the prior one. Expired cookies are purged lazily
/// on load.
pub struct CookieStore {
    cookies: Mutex<Vec<Cookie>>,
    clock: Arc<dyn Clock>,
}

impl Default for CookieStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl CookieStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            cookies: Mutex::new(Vec::new()),
            clock,
        }
    }

    /// Merge cookies from a response, replacing any stored cookie that shares
    /// (name, domain, path).
    pub fn save(&self, cookies: Vec<Cookie>) {
        let mut store = self.cookies.lock().expect("cookie store lock poisoned");
        for new_cookie in cookies {
            store.retain(|current| !current.key_matches(&new_cookie));
            store.push(new_cookie);
        }
    }

    /// All non-expired cookies matching `url`'s host and path. Expired
    /// entries are dropped as a side effect.
    pub fn load(&self, url: &Url) -> Vec<Cookie> {
        let now = self.clock.now();
        let mut store = self.cookies.lock().expect("cookie store lock poisoned");
        store.retain(|c| !c.expired(now));
        store.iter().filter(|c| c.matches_url(url)).cloned().collect()
    }

    /// Format the matching cookies as a `Cookie` request header value.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        let cookies = self.load(url);
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Parse one `Set-Cookie` response header against the request URL.
///
/// Honors `Domain`, `Path`, `Max-Age` and `Expires` (`Max-Age` wins per
/// RFC 6265). Unparseable expiry dates degrade to session cookies.
pub fn parse_set_cookie(header: &str, url: &Url, now: DateTime<Utc>) -> Option<Cookie> {
    let mut parts = header.split(';');

    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = Cookie {
        name: name.to_string(),
        value: value.trim().to_string(),
        domain: url.host_str()?.to_string(),
        path: "/".to_string(),
        expires_at: None,
    };

    let mut max_age_seen = false;
    for attr in parts {
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (k.trim().to_ascii_lowercase(), v.trim()),
            None => (attr.trim().to_ascii_lowercase(), ""),
        };
        match key.as_str() {
            "domain" if !val.is_empty() => {
                cookie.domain = val.trim_start_matches('.').to_string();
            }
            "path" if val.starts_with('/') => {
                cookie.path = val.to_string();
            }
            "max-age" => {
                if let Ok(secs) = val.parse::<i64>() {
                    cookie.expires_at = Some(now + chrono::Duration::seconds(secs));
                    max_age_seen = true;
                }
            }
            "expires" if !max_age_seen => {
                if let Ok(at) = DateTime::parse_from_rfc2822(val) {
                    cookie.expires_at = Some(at.with_timezone(&Utc));
                }
            }
            _ => {}
        }
    }

    Some(cookie)
}

//! Document access layer: two interchangeable ways to load the portal's
//! pages and read their content.

pub mod direct;

#[cfg(feature = "browser")]
pub mod browser;

use async_trait::async_trait;
use thiserror::Error;

use crate::credentials::Credentials;
use crate::heuristics::PortalForm;

/// The page state produced by one navigation event. Never mutated; the state
/// machine consumes it and moves on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    pub html: String,
}

/// Network and protocol errors below the outcome taxonomy. The engine folds
/// every variant except `Unsupported` into `Outcome::TransportFailure`.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status} for {url}")]
    Status { status: u16, url: String },

    #[error("redirect chain exceeded {0} hops")]
    TooManyRedirects(u32),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("no page has been loaded yet")]
    NoPage,

    #[error("script evaluation is not supported by this transport")]
    Unsupported,

    #[error("browser error: {0}")]
    Browser(String),
}

/// A strategy for loading pages and reading their content.
///
/// The login state machine is written once against this interface; the
/// rendered and direct variants differ only in how they honor it.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Load `url`, following whatever redirects the portal issues, and
    /// return the resulting page state once loading completes.
    async fn navigate(&self, url: &str) -> Result<PageSnapshot, TransportError>;

    /// Re-read the current page without a navigation. Rendered pages fill in
    /// asynchronously; the direct variant re-fetches the current URL.
    async fn snapshot(&self) -> Result<PageSnapshot, TransportError>;

    /// Evaluate a script expression against the live page and return its
    /// string result. `None` stands for the evaluator's textual
    /// null/undefined. The direct variant returns
    /// [`TransportError::Unsupported`].
    async fn evaluate(&self, expression: &str) -> Result<Option<String>, TransportError>;

    /// Submit a scraped form. With credentials, the detected username and
    /// password fields are populated first; without, the form is submitted
    /// as-is (consent pages).
    async fn submit(
        &self,
        form: &PortalForm,
        credentials: Option<&Credentials>,
    ) -> Result<PageSnapshot, TransportError>;

    /// Release underlying resources (connections, renderer). Idempotent;
    /// called on completion and on cancellation.
    async fn close(&self);
}

/// Extract `<title>` text from raw markup.
pub(crate) fn page_title(html: &str) -> String {
    let document = scraper::Html::parse_document(html);
    let selector = scraper::Selector::parse("title").expect("static selector");
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

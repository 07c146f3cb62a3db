//! Terminal outcomes of a fetch.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A successfully extracted usage figure, normalized to gigabytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageReading {
    pub gigabytes: f64,
}

impl UsageReading {
    pub fn new(gigabytes: f64) -> Self {
        debug_assert!(gigabytes >= 0.0);
        Self { gigabytes }
    }
}

/// Exactly one variant terminates each fetch.
///
/// Everything except `Success` and `LoginRequired` is retryable by the
/// scheduler; `LoginRequired` needs user action first.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Dashboard reached and the usage figure parsed.
    Success(UsageReading),
    /// Credentials rejected or an unhandled interstitial: the login page came
    /// back after a completed login attempt.
    LoginRequired,
    /// An attempt bound was exhausted while the portal was slow or
    /// unresponsive.
    Timeout,
    /// Dashboard reached but no parseable value after structured and
    /// fallback extraction; carries the raw text last seen.
    ParseFailure(String),
    /// Network or HTTP-level error.
    TransportFailure(String),
    /// The caller's cancellation signal fired mid-fetch.
    Cancelled,
}

impl Outcome {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Outcome::Timeout | Outcome::ParseFailure(_) | Outcome::TransportFailure(_)
        )
    }
}

/// Outcome plus what it cost; backoff policy is the caller's concern.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchReport {
    pub outcome: Outcome,
    /// Page-load and poll attempts consumed, combined.
    pub attempts: u32,
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_matches_the_taxonomy() {
        assert!(Outcome::Timeout.is_retryable());
        assert!(Outcome::ParseFailure("...".into()).is_retryable());
        assert!(Outcome::TransportFailure("connection refused".into()).is_retryable());
        assert!(!Outcome::LoginRequired.is_retryable());
        assert!(!Outcome::Success(UsageReading::new(1.0)).is_retryable());
        assert!(!Outcome::Cancelled.is_retryable());
    }
}

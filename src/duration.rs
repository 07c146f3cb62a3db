//! Parsing for human-readable durations like "30m" or "12h".

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{de, Deserialize, Deserializer};

/// Parse a duration string like "1d", "12h", "30m", "45s".
///
/// Case-insensitive; surrounding whitespace is trimmed.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    let (num, unit) = match s.chars().last() {
        Some(u @ ('d' | 'h' | 'm' | 's')) => (&s[..s.len() - 1], u),
        _ => anyhow::bail!("Duration must end with d, h, m, or s"),
    };

    let num: u64 = num.parse().context("Invalid number in duration")?;

    let per_unit = match unit {
        'd' => 24 * 60 * 60,
        'h' => 60 * 60,
        'm' => 60,
        _ => 1,
    };
    let secs = num.checked_mul(per_unit).context("Duration is too large")?;

    Ok(Duration::from_secs(secs))
}

/// Serde deserializer for duration strings.
///
/// Use with `#[serde(deserialize_with = "deserialize_duration")]`.
pub fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(de::Error::custom)
}

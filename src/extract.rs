//! Usage-text normalization and the raw-markup fallback extractor.

use regex::RegexBuilder;

/// Normalize the usage element's text into gigabytes.
///
/// Handles the shapes the portal renders: `"19.5 GB"`, `"3.0GB"`,
/// `"  12.0 GB "`, a bare `"7.5"`, and the quoted strings a script evaluator
/// returns. Loading placeholders (`"..."`, `"データ使用量"`) fail the parse and
/// are treated by the caller as "not yet rendered".
pub fn normalize_usage(text: &str, unit: &str) -> Option<f64> {
    let cleaned = text
        .trim()
        .trim_matches('"')
        .trim()
        .to_lowercase()
        .replace(&unit.to_lowercase(), "")
        .replace(' ', "");

    let value: f64 = cleaned.parse().ok()?;
    if value.is_finite() && value >= 0.0 {
        Some(value)
    } else {
        None
    }
}

/// Scan raw page markup for a decimal number immediately followed by the
/// unit token, taking the first match.
///
/// Used when structured extraction fails: the markup structure may shift
/// while the `"<number> <unit>"` rendering convention stays stable.
pub fn fallback_scan(html: &str, unit: &str) -> Option<f64> {
    let pattern = format!(r"(\d+(?:\.\d+)?)\s*{}", regex::escape(unit));
    let re = RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .ok()?;
    re.captures(html)?.get(1)?.as_str().parse().ok()
}

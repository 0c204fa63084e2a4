//! Utility functions for clusterize

use rand::Rng;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Quote a value for safe interpolation into a bash script.
///
/// Wraps in single quotes; embedded single quotes become `'\''`.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'/' | b':' | b'@' | b','))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Make text safe to embed in a quoted heredoc terminated by `terminator`.
pub fn heredoc_safe(text: &str, terminator: &str) -> String {
    text.lines()
        .map(|line| {
            if line.trim() == terminator {
                format!(" {}", line)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Exponential backoff with up to 50% random jitter
pub fn backoff_with_jitter(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << attempt.min(10));
    let jitter_ms = exp.as_millis() as u64 / 2;
    if jitter_ms == 0 {
        return exp;
    }
    exp + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
}

/// Get current Unix timestamp (seconds)
pub fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

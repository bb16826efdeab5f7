//! Scan interval parsing and the adaptive target-list poll interval.

use std::time::Duration;

use thiserror::Error;
use uplink::Target;

/// Shortest period between target list polls
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Longest period between target list polls, also used when no target has a
/// usable interval
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Poll this many times per fastest scan period
const POLL_DIVISOR: u32 = 4;

#[derive(Debug, Error, PartialEq)]
pub enum IntervalError {
    #[error("invalid interval format: {0:?}")]
    Format(String),

    #[error("interval out of range: {0:?}")]
    OutOfRange(String),
}

/// Parse a scan interval such as `30s`, `2.5m` or `1h`.
///
/// Accepts a decimal magnitude (`\d+(\.\d+)?`) followed by exactly one of
/// `s`, `m` or `h`, nothing else.
pub fn parse_scan_interval(raw: &str) -> Result<Duration, IntervalError> {
    let format_error = || IntervalError::Format(raw.to_string());

    let Some(unit) = raw.chars().last() else {
        return Err(format_error());
    };
    let factor = match unit {
        's' => 1.0,
        'm' => 60.0,
        'h' => 3600.0,
        _ => return Err(format_error()),
    };
    let magnitude = &raw[..raw.len() - unit.len_utf8()];

    let (whole, fraction) = match magnitude.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (magnitude, None),
    };
    let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !fraction.map(all_digits).unwrap_or(true) {
        return Err(format_error());
    }

    let value: f64 = magnitude.parse().map_err(|_| format_error())?;
    Duration::try_from_secs_f64(value * factor)
        .map_err(|_| IntervalError::OutOfRange(raw.to_string()))
}

/// Poll interval for the given target list: a quarter of the fastest parseable
/// scan interval, clamped to [`MIN_POLL_INTERVAL`, `MAX_POLL_INTERVAL`]
pub fn adaptive_poll_interval(targets: &[Target]) -> Duration {
    targets
        .iter()
        .filter_map(|target| parse_scan_interval(&target.scan_interval).ok())
        .map(|interval| interval / POLL_DIVISOR)
        .min()
        .unwrap_or(MAX_POLL_INTERVAL)
        .clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
}

//! Parsing helpers for human-written configuration values
//!
//! Durations may be given either as a plain number of seconds or as a number
//! followed by a unit suffix (`ms`, `s`, `m`, `h`, `d`, `w`, `M`, `y`).

use crate::{ConfigError, Result};
use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Parse a duration such as `"500ms"`, `"20m"`, `"3h"` or `"1.5"` (seconds)
///
/// # Example
///
/// ```rust
/// use eventpump_config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("20m").unwrap(), Duration::from_secs(1200));
/// assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
/// ```
pub fn parse_duration(value: &str) -> Result<Duration> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();

    // `ms` has to be checked before `m` and `s`
    let (number, multiplier) = if let Some(n) = compact.strip_suffix("ms") {
        (n, 0.001)
    } else if let Some(n) = compact.strip_suffix(['y', 'Y']) {
        (n, 86_400.0 * 365.0)
    } else if let Some(n) = compact.strip_suffix('M') {
        (n, 86_400.0 * 31.0)
    } else if let Some(n) = compact.strip_suffix(['w', 'W']) {
        (n, 86_400.0 * 7.0)
    } else if let Some(n) = compact.strip_suffix(['d', 'D']) {
        (n, 86_400.0)
    } else if let Some(n) = compact.strip_suffix('h') {
        (n, 3_600.0)
    } else if let Some(n) = compact.strip_suffix('m') {
        (n, 60.0)
    } else if let Some(n) = compact.strip_suffix('s') {
        (n, 1.0)
    } else {
        (compact.as_str(), 1.0)
    };

    let parsed: f64 = number.parse().map_err(|e| {
        ConfigError::ValidationError(format!(
            "'{}' is not a valid time specification: {}",
            value, e
        ))
    })?;

    seconds_to_duration(parsed * multiplier)
        .map_err(|reason| ConfigError::ValidationError(format!("'{}' {}", value, reason)))
}

/// Parse common boolean spellings (`yes`/`no`, `on`/`off`, `true`/`false`, `1`/`0`)
pub fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "yes" | "true" | "on" => Ok(true),
        "0" | "no" | "false" | "off" => Ok(false),
        _ => Err(ConfigError::ValidationError(format!(
            "Not a boolean: {}",
            value
        ))),
    }
}

fn seconds_to_duration(seconds: f64) -> std::result::Result<Duration, &'static str> {
    if !seconds.is_finite() {
        return Err("is not a finite duration");
    }
    if seconds < 0.0 {
        return Err("must not be negative");
    }
    Ok(Duration::from_secs_f64(seconds))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(f64),
    Text(String),
}

/// Serde adapter accepting either seconds or a unit-suffixed string
///
/// Use with `#[serde(deserialize_with = "eventpump_config::duration::deserialize")]`.
pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(seconds) => seconds_to_duration(seconds).map_err(D::Error::custom),
        RawDuration::Text(text) => parse_duration(&text).map_err(D::Error::custom),
    }
}

//! Duration parsing for configuration fields.
//!
//! Workflow configs express durations as a number with an optional unit
//! suffix (`250ms`, `30s`, `1m`); a bare number counts as milliseconds.
//! Parsing is table-driven over the known suffixes.

use crate::error::Error;
use std::time::Duration;

/// Known unit suffixes and their millisecond multipliers. `ms` must sit
/// before `m` and `s`, which would otherwise shadow it.
const UNIT_TABLE: &[(&str, u64)] = &[("ms", 1), ("s", 1_000), ("m", 60_000)];

/// Parses a duration string like `250ms`, `30s`, `1m`, or a bare
/// millisecond count.
///
/// # Errors
///
/// Returns an error when the string is empty, the numeric part does not
/// parse, or the value overflows.
pub fn parse_duration(s: &str) -> Result<Duration, Error> {
    let text = s.trim();
    if text.is_empty() {
        return Err(Error::invalid_config("duration cannot be empty"));
    }

    let (number, unit_millis) = split_unit(text);
    let value: u64 = number.trim().parse().map_err(|_| {
        Error::invalid_config(format!(
            "invalid duration '{text}': expected a number with an optional ms/s/m suffix"
        ))
    })?;
    let millis = value
        .checked_mul(unit_millis)
        .ok_or_else(|| Error::invalid_config(format!("duration '{text}' is out of range")))?;
    Ok(Duration::from_millis(millis))
}

/// Splits off a trailing unit, yielding the numeric part and the unit's
/// millisecond multiplier. No recognized suffix means milliseconds.
fn split_unit(text: &str) -> (&str, u64) {
    for &(suffix, millis) in UNIT_TABLE {
        if let Some(number) = text.strip_suffix(suffix) {
            return (number, millis);
        }
    }
    (text, 1)
}

/// Parses a duration string, falling back to `default` when the string is
/// absent or unparseable.
///
/// Several configuration fields (`timeoutDuration`, retry `backoff`) keep
/// their defaults silently on a malformed value rather than failing the run.
#[must_use]
pub fn parse_duration_or(s: Option<&str>, default: Duration) -> Duration {
    s.and_then(|raw| parse_duration(raw).ok()).unwrap_or(default)
}

//! ISO-8601 durations (`PnDTnHnMn.nS`).
//!
//! Delays, rates, and the poll interval are written in this form in
//! declarations and configuration, and persisted in it as well.

use std::fmt::Write as _;
use std::time::Duration;
use thiserror::Error;

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 3600;
const SECS_PER_DAY: u64 = 86_400;

/// Error returned for text that is not a non-negative ISO-8601 duration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid ISO-8601 duration '{text}': {reason}")]
pub struct DurationError {
    text: String,
    reason: &'static str,
}

impl DurationError {
    fn new(text: &str, reason: &'static str) -> Self {
        Self {
            text: text.to_string(),
            reason,
        }
    }
}

/// Parse an ISO-8601 duration such as `PT1M`, `P1DT12H` or `PT0.5S`.
///
/// Only the day, hour, minute and second designators are accepted, each at
/// most once and in that order. Negative durations are rejected.
pub fn parse(text: &str) -> Result<Duration, DurationError> {
    let upper = text.trim().to_ascii_uppercase();
    let body = upper.strip_prefix('+').unwrap_or(&upper);
    if body.starts_with('-') {
        return Err(DurationError::new(text, "negative durations are not supported"));
    }
    let body = body
        .strip_prefix('P')
        .ok_or_else(|| DurationError::new(text, "must start with 'P'"))?;

    let (date_part, time_part) = match body.split_once('T') {
        Some((date, time)) => {
            if time.is_empty() {
                return Err(DurationError::new(
                    text,
                    "'T' must be followed by a time component",
                ));
            }
            (date, Some(time))
        }
        None => (body, None),
    };

    let mut total = Duration::ZERO;
    let mut components = 0;

    if !date_part.is_empty() {
        let days = date_part
            .strip_suffix('D')
            .ok_or_else(|| DurationError::new(text, "only days are allowed before 'T'"))?;
        total = add(text, total, whole_units(text, days, SECS_PER_DAY)?)?;
        components += 1;
    }

    if let Some(time) = time_part {
        // Designators must appear in H, M, S order.
        let mut rest = time;
        let mut allowed = ['H', 'M', 'S'].as_slice();
        while !rest.is_empty() {
            let pos = rest
                .find(|c: char| c.is_ascii_alphabetic())
                .ok_or_else(|| DurationError::new(text, "number without designator"))?;
            let (number, tail) = rest.split_at(pos);
            let designator = tail.as_bytes()[0] as char;
            let index = allowed
                .iter()
                .position(|d| *d == designator)
                .ok_or_else(|| DurationError::new(text, "unexpected or repeated designator"))?;
            allowed = &allowed[index + 1..];
            let component = match designator {
                'H' => whole_units(text, number, SECS_PER_HOUR)?,
                'M' => whole_units(text, number, SECS_PER_MINUTE)?,
                _ => parse_seconds(text, number)?,
            };
            total = add(text, total, component)?;
            components += 1;
            rest = &tail[1..];
        }
    }

    if components == 0 {
        return Err(DurationError::new(text, "no components"));
    }
    Ok(total)
}

fn add(text: &str, total: Duration, component: Duration) -> Result<Duration, DurationError> {
    total
        .checked_add(component)
        .ok_or_else(|| DurationError::new(text, "duration out of range"))
}

fn whole_units(text: &str, number: &str, unit_secs: u64) -> Result<Duration, DurationError> {
    parse_whole(text, number)?
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| DurationError::new(text, "duration out of range"))
}

fn parse_whole(text: &str, number: &str) -> Result<u64, DurationError> {
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DurationError::new(text, "expected a whole number"));
    }
    number
        .parse()
        .map_err(|_| DurationError::new(text, "number out of range"))
}

fn parse_seconds(text: &str, number: &str) -> Result<Duration, DurationError> {
    let (whole, fraction) = match number.split_once(['.', ',']) {
        Some((whole, fraction)) => (whole, fraction),
        None => (number, ""),
    };
    let secs = parse_whole(text, whole)?;
    if fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DurationError::new(text, "fraction must have at most 9 digits"));
    }
    let nanos = if fraction.is_empty() {
        0
    } else {
        format!("{:0<9}", fraction)
            .parse::<u32>()
            .map_err(|_| DurationError::new(text, "invalid fraction"))?
    };
    Ok(Duration::new(secs, nanos))
}

/// Format a duration the way it is persisted: hours, minutes and seconds
/// (`PT36H`, `PT1M30S`, `PT0.25S`), with `PT0S` for zero.
pub fn format(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let nanos = duration.subsec_nanos();
    if total_secs == 0 && nanos == 0 {
        return "PT0S".to_string();
    }

    let hours = total_secs / SECS_PER_HOUR;
    let minutes = (total_secs % SECS_PER_HOUR) / SECS_PER_MINUTE;
    let secs = total_secs % SECS_PER_MINUTE;

    let mut out = String::from("PT");
    if hours > 0 {
        let _ = write!(out, "{}H", hours);
    }
    if minutes > 0 {
        let _ = write!(out, "{}M", minutes);
    }
    if secs > 0 || nanos > 0 {
        if nanos > 0 {
            let fraction = format!("{:09}", nanos);
            let _ = write!(out, "{}.{}S", secs, fraction.trim_end_matches('0'));
        } else {
            let _ = write!(out, "{}S", secs);
        }
    }
    out
}

/// Serde adapter persisting a `Duration` as its ISO-8601 text.
pub mod iso8601 {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        super::parse(&text).map_err(serde::de::Error::custom)
    }
}

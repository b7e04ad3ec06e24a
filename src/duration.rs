//! Human-readable durations for config values such as `poll_interval = "5s"`
//! or `timeout = "15m"`.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{de, Deserialize, Deserializer};

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 60 * SECS_PER_MINUTE;
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;

/// Parse a duration string like `"90s"`, `"5m"`, `"1h"` or `"1d"`.
///
/// Units are case-insensitive and surrounding whitespace is ignored.
///
/// ```
/// use accesskeep::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
/// assert_eq!(parse_duration(" 2H ").unwrap(), Duration::from_secs(7200));
/// ```
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_ascii_lowercase();
    let unit = s.chars().last().context("Duration is empty")?;
    let multiplier = match unit {
        'd' => SECS_PER_DAY,
        'h' => SECS_PER_HOUR,
        'm' => SECS_PER_MINUTE,
        's' => 1,
        _ => anyhow::bail!("Duration must end with d, h, m, or s"),
    };

    let num: u64 = s[..s.len() - 1]
        .trim()
        .parse()
        .with_context(|| format!("Invalid number in duration: {s:?}"))?;
    let secs = num
        .checked_mul(multiplier)
        .context("Duration is too large")?;

    Ok(Duration::from_secs(secs))
}

/// Render a duration using the largest unit that divides it evenly.
///
/// ```
/// use accesskeep::duration::format_duration;
/// use std::time::Duration;
///
/// assert_eq!(format_duration(Duration::from_secs(900)), "15m");
/// assert_eq!(format_duration(Duration::from_secs(45)), "45s");
/// ```
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    for (unit, size) in [('d', SECS_PER_DAY), ('h', SECS_PER_HOUR), ('m', SECS_PER_MINUTE)] {
        if secs >= size && secs % size == 0 {
            return format!("{}{unit}", secs / size);
        }
    }
    format!("{secs}s")
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

/// Serde deserializer for optional duration strings.
pub fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    opt.map(|s| parse_duration(&s).map_err(de::Error::custom))
        .transpose()
}

/// Serde serializer pairing with [`deserialize_duration`].
pub fn serialize_duration<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format_duration(*d))
}

//! Schedule-string parsing.
//!
//! Schedules resolve to a fixed repeat interval. Three forms are accepted,
//! tried in this order:
//!
//! 1. Named shortcuts: `hourly`, `daily`, `weekly`.
//! 2. Simple durations: `N` followed by `s`, `m`, `h`, or `d` (`30m`, `6h`).
//! 3. A fixed whitelist of five-field cron patterns, each mapped to an
//!    interval (see [`CRON_WHITELIST`]).
//!
//! This is not a cron engine. Any cron expression outside the whitelist is
//! rejected rather than approximated, and whitelisted patterns run on an
//! interval measured from process start, not aligned to wall-clock minutes.

use std::time::Duration;

use crate::error::{SyncError, SyncResult};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;

/// Supported cron patterns and the interval (in seconds) each stands for.
pub const CRON_WHITELIST: &[(&str, u64)] = &[
    ("0 * * * *", HOUR),
    ("0 0 * * *", DAY),
    ("0 */2 * * *", 2 * HOUR),
    ("0 */4 * * *", 4 * HOUR),
    ("0 */6 * * *", 6 * HOUR),
    ("0 */12 * * *", 12 * HOUR),
];

/// Parse a schedule string into its repeat interval.
///
/// ```rust
/// use std::time::Duration;
/// use ragbox_core::schedule::parse_schedule;
///
/// assert_eq!(parse_schedule("daily").unwrap(), Duration::from_secs(86_400));
/// assert_eq!(parse_schedule("5m").unwrap(), Duration::from_secs(300));
/// assert!(parse_schedule("*/5 * * * *").is_err());
/// ```
pub fn parse_schedule(spec: &str) -> SyncResult<Duration> {
    let normalized = spec.split_whitespace().collect::<Vec<_>>().join(" ");
    let lowered = normalized.to_ascii_lowercase();

    let secs = named_shortcut(&lowered)
        .or_else(|| simple_duration(&lowered))
        .or_else(|| {
            CRON_WHITELIST
                .iter()
                .find(|(pattern, _)| *pattern == normalized)
                .map(|(_, secs)| *secs)
        })
        .ok_or_else(|| {
            SyncError::Configuration(format!(
                "unsupported schedule '{}': use hourly, daily, weekly, N[smhd], or one of: {}",
                spec,
                CRON_WHITELIST
                    .iter()
                    .map(|(p, _)| *p)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })?;

    Ok(Duration::from_secs(secs))
}

fn named_shortcut(spec: &str) -> Option<u64> {
    match spec {
        "hourly" => Some(HOUR),
        "daily" => Some(DAY),
        "weekly" => Some(WEEK),
        _ => None,
    }
}

fn simple_duration(spec: &str) -> Option<u64> {
    let unit = spec.chars().last()?;
    let multiplier = match unit {
        's' => 1,
        'm' => MINUTE,
        'h' => HOUR,
        'd' => DAY,
        _ => return None,
    };
    let digits = &spec[..spec.len() - unit.len_utf8()];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let n: u64 = digits.parse().ok()?;
    if n == 0 {
        return None;
    }
    n.checked_mul(multiplier)
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-now with an override hook for deterministic scheduling.
//!
//! All schedule computation goes through [`now_in`] so that tests (and
//! the validate tooling) can pin the clock, either with an explicit
//! as-of string or via the `RPEAT_NOW` environment variable.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Timestamp format accepted by as-of overrides: `YYYYMMDDhhmmss`.
pub const ASOF_FORMAT: &str = "%Y%m%d%H%M%S";

/// Resolve a timezone name, falling back to UTC for unknown names.
pub fn load_tz(name: &str) -> Tz {
    match name {
        "" | "Local" => Tz::UTC,
        other => other.parse().unwrap_or(Tz::UTC),
    }
}

/// Current server time in `tz`.
///
/// Resolution order: explicit `asof` string, then `RPEAT_NOW`, then the
/// system clock. An unparsable override is ignored rather than trusted.
pub fn now_in(tz: Tz, asof: Option<&str>) -> DateTime<Tz> {
    let overridden = match asof {
        Some(s) if !s.is_empty() => Some(s.to_string()),
        _ => std::env::var("RPEAT_NOW").ok(),
    };
    if let Some(stamp) = overridden {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&stamp, ASOF_FORMAT) {
            if let Some(t) = tz.from_local_datetime(&naive).earliest() {
                return t;
            }
        }
        tracing::warn!(stamp = %stamp, "unparsable as-of override, using system clock");
    }
    Utc::now().with_timezone(&tz)
}

/// Server time in the named timezone (UTC fallback).
pub fn now_in_name(tz_name: &str, asof: Option<&str>) -> DateTime<Tz> {
    now_in(load_tz(tz_name), asof)
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;

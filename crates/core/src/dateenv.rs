// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Date-env templates.
//!
//! A template is `TOKENS[,±N{Y|Q|M|W|D}[,CAL]]` where TOKENS may use
//! each of `CC YY MM DD hh mm ss QTR` at most once, e.g.
//! `CCYY-MM-DD,-1D,MF` evaluates to the prior business day in dashed
//! form. Values are evaluated against server-now in the job timezone
//! (or an explicit as-of), shifted, then formatted.

use crate::calendar::{date_as_int, int_as_date, Calendar, Direction};
use crate::clock::now_in_name;
use chrono::{Datelike, Months, TimeZone};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DateEnvError {
    #[error("only one magic var per type processed: {0}")]
    DuplicateMagicVar(String),

    #[error("malformed shift component: {0}")]
    MalformedShift(String),

    #[error("unknown shift unit '{0}' (expected Y, Q, M, W or D)")]
    UnknownShiftUnit(String),

    #[error("unknown calendar: {0}")]
    UnknownCalendar(String),
}

const TOKENS: [(&str, &str); 7] = [
    ("CC", "%C"),
    ("YY", "%y"),
    ("MM", "%m"),
    ("DD", "%d"),
    ("hh", "%H"),
    ("mm", "%M"),
    ("ss", "%S"),
];

/// Expand a date template. `asof` pins the evaluation instant
/// (falling back to `RPEAT_NOW`, then the system clock).
pub fn convert_date(
    template: &str,
    timezone: &str,
    calendar_dirs: &[PathBuf],
    asof: Option<&str>,
) -> Result<String, DateEnvError> {
    let mut parts = template.splitn(3, ',');
    let tokens = parts.next().unwrap_or_default();
    let shift = parts.next();
    let cal_name = parts.next();

    // Single left-to-right pass so a substitution cannot fabricate a
    // later token; each magic var may appear at most once.
    let mut format = String::with_capacity(tokens.len() + 8);
    let mut seen = [false; TOKENS.len()];
    let bytes = tokens.as_bytes();
    let mut i = 0;
    'scan: while i < bytes.len() {
        for (t, (token, repl)) in TOKENS.iter().enumerate() {
            if tokens[i..].starts_with(token) {
                if seen[t] {
                    return Err(DateEnvError::DuplicateMagicVar(format!(
                        "{} repeats in {}",
                        token, template
                    )));
                }
                seen[t] = true;
                format.push_str(repl);
                i += token.len();
                continue 'scan;
            }
        }
        let ch = tokens[i..].chars().next().unwrap_or('\0');
        format.push(ch);
        i += ch.len_utf8();
    }

    let mut shift_n: i64 = 0;
    let mut shift_unit = "";
    if let Some(shift) = shift {
        if shift.len() < 2 {
            return Err(DateEnvError::MalformedShift(shift.to_string()));
        }
        let (n, unit) = shift.split_at(shift.len() - 1);
        shift_n = n
            .parse()
            .map_err(|_| DateEnvError::MalformedShift(shift.to_string()))?;
        shift_unit = unit;
        if !matches!(shift_unit, "Y" | "Q" | "M" | "W" | "D") {
            return Err(DateEnvError::UnknownShiftUnit(unit.to_string()));
        }
    }

    let cal = match cal_name {
        None => None,
        Some("") => return Err(DateEnvError::UnknownCalendar("empty calendar".into())),
        Some(name) => Some(
            Calendar::load(name, calendar_dirs)
                .map_err(|e| DateEnvError::UnknownCalendar(e.to_string()))?,
        ),
    };

    let mut t = now_in_name(timezone, asof);
    if shift.is_some() {
        t = match shift_unit {
            "Y" => shift_months(t, shift_n * 12),
            "Q" => shift_months(t, shift_n * 3),
            "M" => shift_months(t, shift_n),
            "W" => t + chrono::Duration::days(shift_n * 7),
            "D" => match &cal {
                // Business-day arithmetic when a calendar is given.
                Some(cal) => shift_with_cal(t, shift_n, cal)?,
                None => t + chrono::Duration::days(shift_n),
            },
            _ => t,
        };
    }
    if let Some(cal) = &cal {
        // Settle on a valid day even for non-D shifts.
        t = shift_with_cal(t, 0, cal)?;
    }

    let mut out = t.format(&format).to_string();
    if out.contains("QTR") {
        let qtr = (t.month() - 1) / 3 + 1;
        out = out.replace("QTR", &qtr.to_string());
    }
    Ok(out)
}

fn shift_months(
    t: chrono::DateTime<chrono_tz::Tz>,
    months: i64,
) -> chrono::DateTime<chrono_tz::Tz> {
    if months >= 0 {
        t.checked_add_months(Months::new(months as u32)).unwrap_or(t)
    } else {
        t.checked_sub_months(Months::new((-months) as u32)).unwrap_or(t)
    }
}

fn shift_with_cal(
    t: chrono::DateTime<chrono_tz::Tz>,
    days: i64,
    cal: &Calendar,
) -> Result<chrono::DateTime<chrono_tz::Tz>, DateEnvError> {
    let shifted = cal
        .shift(date_as_int(&t), days, Direction::Backward)
        .map_err(|e| DateEnvError::UnknownCalendar(e.to_string()))?;
    let date = int_as_date(shifted)
        .ok_or_else(|| DateEnvError::UnknownCalendar(cal.name.clone()))?;
    let naive = date.and_time(t.time());
    t.timezone()
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| DateEnvError::UnknownCalendar(cal.name.clone()))
}

#[cfg(test)]
#[path = "dateenv_tests.rs"]
mod tests;

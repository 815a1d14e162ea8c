// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cron expressions.
//!
//! A schedule is either an `@` shortcut (`@daily`, `@every 25m`,
//! `@eom`, `@depends`, ...) or a 5/6-field numeric expression with the
//! usual `*`, ranges, lists and steps, plus weekday/month names, the
//! `WEEKDAYS`/`WEEKEND`/`EVERYDAY` aliases and an `R` prefix that picks
//! one random value from the field at parse time and freezes it.
//!
//! The parsed form is a tagged [`CronKind`] with a single next-fire
//! dispatch in [`next`]. Start/end expressions may be arrays; the
//! effective next fire of an array is the minimum over its elements.

mod next;

pub use next::{next_cron_start, parse_day_and_time, FOREVER};

use crate::clock::load_tz;
use chrono_tz::Tz;
use rand::Rng;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Which schedule an expression belongs to, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CronSchedule {
    #[default]
    Start,
    End,
    Restart,
}

impl std::fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CronSchedule::Start => write!(f, "CronStart"),
            CronSchedule::End => write!(f, "CronEnd"),
            CronSchedule::Restart => write!(f, "CronRestart"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CronError {
    #[error("{schedule} [ {spec} ] requires 5 or 6 fields, {found} found")]
    FieldCount {
        schedule: CronSchedule,
        spec: String,
        found: usize,
    },

    #[error("malformed @at in [ {0} ]: requires a YYYYMMDDhhmmss timestamp")]
    MalformedAt(String),

    #[error("malformed @every in [ {0} ]: requires a valid duration")]
    MalformedEvery(String),

    #[error("unrecognized @ spec [ {0} ]")]
    UnrecognizedAt(String),

    #[error("cannot expand {field} field [ {value} ]")]
    Expansion { field: &'static str, value: String },

    #[error("@at {0} has passed")]
    AtPassed(String),

    #[error("non-triggering cron")]
    NonTriggering,

    #[error("missing calendar: {0}")]
    MissingCalendar(#[from] crate::calendar::CalendarError),

    #[error("insufficient calendar days in {0}")]
    CalendarExhausted(String),
}

/// The schedule kind; everything dispatches through this.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CronKind {
    /// Numeric field sets; fires per [`Cron::next_start`].
    Numeric,
    /// Absolute one-shot fire at a `YYYYMMDDhhmmss` local stamp.
    At(String),
    /// Periodic: fires `every` after each evaluation point.
    Every(Duration),
    /// Never fires on its own (`@manual`, `@never`, unset).
    #[default]
    Null,
    /// Fires only via a dependency evaluator (`@depends`).
    Dependent,
}

/// Expanded numeric field sets. `mday`/`wday` use the `-1` sentinel for
/// "do not filter" when only the other of the pair is specified.
/// Candidate enumeration runs from the current month across the
/// five-year window in [`next`].
#[derive(Debug, Clone, PartialEq)]
pub struct CronFields {
    pub sec: Vec<i32>,
    pub min: Vec<i32>,
    pub hour: Vec<i32>,
    pub mday: Vec<i32>,
    pub mon: Vec<i32>,
    pub wday: Vec<i32>,
}

impl CronFields {
    fn wide_open() -> Self {
        Self {
            sec: (0..=59).collect(),
            min: (0..=59).collect(),
            hour: (0..=23).collect(),
            mday: (1..=31).collect(),
            mon: (1..=12).collect(),
            wday: (0..=6).collect(),
        }
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Cron {
    pub kind: CronKind,
    pub fields: CronFields,
    pub timezone: Tz,
    pub calendar: String,
    pub calendar_dirs: Vec<PathBuf>,
    /// Error (instead of passing through) when candidates outrun the calendar.
    pub require_cal: bool,
    /// Shift a candidate back to the prior calendar day.
    pub rollback: bool,
    /// Last in-calendar day of the period (`@eow`/`@eom`/`@eoq`/`@eoy`).
    pub end_of: bool,
    /// This cron is one element of a union array.
    pub array: bool,
    /// Upper bound (exclusive, seconds) for uniform random fire delay.
    pub jitter: u32,
    /// Source text, kept for display and reload diffing.
    pub spec: String,
}

impl Default for Cron {
    fn default() -> Self {
        Self {
            kind: CronKind::Null,
            fields: CronFields::wide_open(),
            timezone: Tz::UTC,
            calendar: String::new(),
            calendar_dirs: Vec::new(),
            require_cal: false,
            rollback: false,
            end_of: false,
            array: false,
            jitter: 0,
            spec: String::new(),
        }
    }
}

/// Shared parse context: per-job schedule modifiers.
#[derive(Debug, Clone, Default)]
pub struct CronContext {
    pub timezone: String,
    pub calendar: String,
    pub calendar_dirs: Vec<PathBuf>,
    pub rollback: bool,
    pub require_cal: bool,
    pub jitter: u32,
}

impl Cron {
    /// A cron that never fires.
    pub fn null() -> Self {
        Self::default()
    }

    /// A cron fired only through a dependency evaluator.
    pub fn dependent() -> Self {
        Self {
            kind: CronKind::Dependent,
            spec: "@depends".to_string(),
            ..Self::default()
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, CronKind::Null) && !self.array
    }

    pub fn is_dependent(&self) -> bool {
        matches!(self.kind, CronKind::Dependent)
    }

    pub fn is_every(&self) -> bool {
        matches!(self.kind, CronKind::Every(_))
    }

    /// Parse a start-schedule expression.
    pub fn parse(spec: &str, ctx: &CronContext) -> Result<Self, CronError> {
        Self::parse_schedule(spec, ctx, CronSchedule::Start)
    }

    /// Parse an expression, labelling errors with which schedule
    /// (start/end/restart) it belongs to.
    pub fn parse_schedule(
        spec: &str,
        ctx: &CronContext,
        schedule: CronSchedule,
    ) -> Result<Self, CronError> {
        let spec = spec.trim();
        let tz = load_tz(&ctx.timezone);

        if spec.is_empty() {
            let mut cron = Self::null();
            cron.timezone = tz;
            return Ok(cron);
        }

        let mut cron = if spec.starts_with('@') {
            parse_shortcut(spec)?
        } else {
            parse_numeric(spec, schedule)?
        };

        cron.timezone = tz;
        cron.calendar = ctx.calendar.clone();
        cron.calendar_dirs = ctx.calendar_dirs.clone();
        cron.rollback = cron.rollback || ctx.rollback;
        cron.require_cal = ctx.require_cal;
        cron.jitter = ctx.jitter;
        cron.spec = spec.to_string();
        Ok(cron)
    }

    /// Parse every element of a start/end array; the first element's
    /// kind is used for the null/dependent classification of the union.
    pub fn parse_array(specs: &[String], ctx: &CronContext) -> Result<Vec<Self>, CronError> {
        Self::parse_array_schedule(specs, ctx, CronSchedule::Start)
    }

    /// Array form of [`Cron::parse_schedule`].
    pub fn parse_array_schedule(
        specs: &[String],
        ctx: &CronContext,
        schedule: CronSchedule,
    ) -> Result<Vec<Self>, CronError> {
        let mut crons = Vec::with_capacity(specs.len());
        for spec in specs {
            let mut cron = Self::parse_schedule(spec, ctx, schedule)?;
            cron.array = specs.len() > 1;
            crons.push(cron);
        }
        Ok(crons)
    }
}

impl std::fmt::Display for Cron {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.spec)
    }
}

fn parse_shortcut(spec: &str) -> Result<Cron, CronError> {
    let fields: Vec<&str> = spec.split_whitespace().collect();
    let name = fields[0];

    if name == "@at" {
        if fields.len() != 2 || fields[1].len() != 14 || fields[1].parse::<u64>().is_err() {
            return Err(CronError::MalformedAt(spec.to_string()));
        }
        return Ok(Cron {
            kind: CronKind::At(fields[1].to_string()),
            ..Cron::default()
        });
    }
    if name == "@every" {
        if fields.len() != 2 {
            return Err(CronError::MalformedEvery(spec.to_string()));
        }
        let every = humantime::parse_duration(fields[1])
            .map_err(|_| CronError::MalformedEvery(spec.to_string()))?;
        return Ok(Cron {
            kind: CronKind::Every(every),
            ..Cron::default()
        });
    }

    let mut cron = Cron {
        kind: CronKind::Numeric,
        fields: CronFields::wide_open(),
        ..Cron::default()
    };
    // Period shortcuts take an optional "min hour" adjustment pair.
    let adjust = |c: &mut Cron| -> Result<(), CronError> {
        if fields.len() == 3 {
            c.fields.min = expand_field(fields[1], 0, 59, "min")?;
            c.fields.hour = expand_field(fields[2], 0, 23, "hour")?;
        }
        Ok(())
    };

    match name {
        "@minutely" | "@always" => {
            cron.fields.sec = vec![0];
        }
        "@hourly" => {
            cron.fields.sec = vec![0];
            cron.fields.min = vec![0];
        }
        "@daily" | "@midnight" => {
            cron.fields.sec = vec![0];
            cron.fields.min = vec![0];
            cron.fields.hour = vec![0];
            cron.fields.wday = vec![-1];
        }
        "@weekly" | "@eow" => {
            cron.fields.sec = vec![0];
            cron.fields.min = vec![0];
            cron.fields.hour = vec![0];
            cron.fields.mday = vec![-1];
            cron.fields.wday = vec![0];
            adjust(&mut cron)?;
            if name == "@eow" {
                cron.rollback = true;
                cron.end_of = true;
            }
        }
        "@monthly" | "@eom" => {
            cron.fields.sec = vec![0];
            cron.fields.min = vec![0];
            cron.fields.hour = vec![0];
            cron.fields.mday = vec![1];
            cron.fields.wday = vec![-1];
            adjust(&mut cron)?;
            if name == "@eom" {
                cron.rollback = true;
                cron.end_of = true;
            }
        }
        "@quarterly" | "@eoq" => {
            cron.fields.sec = vec![0];
            cron.fields.min = vec![0];
            cron.fields.hour = vec![0];
            cron.fields.mday = vec![1];
            cron.fields.mon = vec![1, 4, 7, 10];
            cron.fields.wday = vec![-1];
            adjust(&mut cron)?;
            if name == "@eoq" {
                cron.rollback = true;
                cron.end_of = true;
            }
        }
        "@yearly" | "@annual" | "@eoy" => {
            cron.fields.sec = vec![0];
            cron.fields.min = vec![0];
            cron.fields.hour = vec![0];
            cron.fields.mday = vec![1];
            cron.fields.mon = vec![1];
            cron.fields.wday = vec![-1];
            adjust(&mut cron)?;
            if name == "@eoy" {
                cron.rollback = true;
                cron.end_of = true;
            }
        }
        "@depends" => return Ok(Cron::dependent()),
        "@manual" | "@never" => return Ok(Cron::null()),
        _ => return Err(CronError::UnrecognizedAt(spec.to_string())),
    }
    Ok(cron)
}

fn parse_numeric(spec: &str, schedule: CronSchedule) -> Result<Cron, CronError> {
    let fields: Vec<&str> = spec.split_whitespace().collect();
    if fields.len() != 5 && fields.len() != 6 {
        return Err(CronError::FieldCount {
            schedule,
            spec: spec.to_string(),
            found: fields.len(),
        });
    }

    let mut f = CronFields::wide_open();

    let off = if fields.len() == 6 {
        if fields[0] != "*" {
            f.sec = expand_field(fields[0], 0, 59, "sec")?;
        }
        1
    } else {
        f.sec = vec![0];
        0
    };
    if fields[off] != "*" {
        f.min = expand_field(fields[off], 0, 59, "min")?;
    }
    if fields[off + 1] != "*" {
        f.hour = expand_field(fields[off + 1], 0, 23, "hour")?;
    }
    if fields[off + 3] != "*" {
        f.mon = expand_field(fields[off + 3], 1, 12, "mon")?;
    }

    // mday/wday compose: when exactly one is given, the other becomes
    // the -1 do-not-filter sentinel; when both are given, a day matches
    // if either constraint matches.
    let mday = fields[off + 2];
    let wday = fields[off + 4];
    if mday != "*" && wday == "*" {
        f.mday = expand_field(mday, 1, 31, "mday")?;
        f.wday = vec![-1];
    } else if mday == "*" && wday != "*" {
        f.wday = expand_field(wday, 0, 6, "wday")?;
        f.mday = vec![-1];
    } else if mday != "*" {
        f.mday = expand_field(mday, 1, 31, "mday")?;
        f.wday = expand_field(wday, 0, 6, "wday")?;
    }

    Ok(Cron {
        kind: CronKind::Numeric,
        fields: f,
        ..Cron::default()
    })
}

const WDAY_NAMES: [(&str, &str); 7] = [
    ("SUNDAY", "0"),
    ("MONDAY", "1"),
    ("TUESDAY", "2"),
    ("WEDNESDAY", "3"),
    ("THURSDAY", "4"),
    ("FRIDAY", "5"),
    ("SATURDAY", "6"),
];
const WDAY_ABBR: [(&str, &str); 7] = [
    ("SUN", "0"),
    ("MON", "1"),
    ("TUE", "2"),
    ("WED", "3"),
    ("THU", "4"),
    ("FRI", "5"),
    ("SAT", "6"),
];
const MON_NAMES: [(&str, &str); 12] = [
    ("JANUARY", "1"),
    ("FEBRUARY", "2"),
    ("MARCH", "3"),
    ("APRIL", "4"),
    ("MAY", "5"),
    ("JUNE", "6"),
    ("JULY", "7"),
    ("AUGUST", "8"),
    ("SEPTEMBER", "9"),
    ("OCTOBER", "10"),
    ("NOVEMBER", "11"),
    ("DECEMBER", "12"),
];
const MON_ABBR: [(&str, &str); 12] = [
    ("JAN", "1"),
    ("FEB", "2"),
    ("MAR", "3"),
    ("APR", "4"),
    ("MAY", "5"),
    ("JUN", "6"),
    ("JUL", "7"),
    ("AUG", "8"),
    ("SEP", "9"),
    ("OCT", "10"),
    ("NOV", "11"),
    ("DEC", "12"),
];

/// Expand one cron field into a sorted value set.
///
/// Grammar per field: `*`, `a`, `a-b`, `a,b,c`, `*/n`, `a-b/n`, names
/// and aliases (case-insensitive). A leading `R` freezes one uniformly
/// random member of the expanded set.
pub fn expand_field(
    field: &str,
    start: i32,
    end: i32,
    name: &'static str,
) -> Result<Vec<i32>, CronError> {
    let err = || CronError::Expansion {
        field: name,
        value: field.to_string(),
    };

    let mut field = field.to_uppercase();
    let randomize = field.starts_with('R');
    if randomize {
        field = field[1..].to_string();
    }

    field = match field.as_str() {
        "M-F" | "MF" | "WEEKDAYS" | "WEEKDAY" => "1-5".to_string(),
        "WEEKEND" | "WEEKENDS" => "6,0".to_string(),
        "EVERYDAY" => "*".to_string(),
        _ => field,
    };
    if field.bytes().any(|b| b.is_ascii_uppercase()) {
        // Long names first so the short forms do not clobber them.
        for (from, to) in WDAY_NAMES.iter().chain(&WDAY_ABBR).chain(&MON_NAMES).chain(&MON_ABBR) {
            field = field.replace(from, to);
        }
    }

    let (list, step) = match field.split_once('/') {
        Some((l, s)) => (l.to_string(), s.parse::<usize>().map_err(|_| err())?),
        None => (field.clone(), 1),
    };
    if step == 0 {
        return Err(err());
    }

    let mut expanded: Vec<i32> = Vec::new();
    if list == "*" {
        expanded.extend((start..=end).step_by(step));
    } else {
        for part in list.split(',') {
            if let Some((a, b)) = part.split_once('-') {
                let a: i32 = a.parse().map_err(|_| err())?;
                let b: i32 = b.parse().map_err(|_| err())?;
                if a > b {
                    return Err(err());
                }
                expanded.extend((a..=b).step_by(step));
            } else {
                expanded.push(part.parse().map_err(|_| err())?);
            }
        }
    }
    if expanded.is_empty() {
        return Err(err());
    }
    expanded.sort_unstable();
    expanded.dedup();

    if randomize {
        let pick = expanded[rand::thread_rng().gen_range(0..expanded.len())];
        expanded = vec![pick];
    }
    Ok(expanded)
}

#[cfg(test)]
#[path = "parse_tests.rs"]
mod tests;

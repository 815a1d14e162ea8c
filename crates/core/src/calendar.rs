// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Business-day calendars.
//!
//! A calendar file is an ordered list of valid dates, one `YYYYMMDD`
//! integer per line (e.g. every weekday that is not a holiday). Crons
//! use calendars to filter candidate dates; date-env shifts use them
//! for business-day arithmetic.

use chrono::{Datelike, NaiveDate};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A date key in `YYYYMMDD` form.
pub type DateInt = i32;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar search path not found: {0}")]
    DirNotFound(PathBuf),

    #[error("calendar '{name}' not found in {dirs:?}")]
    NotFound { name: String, dirs: Vec<PathBuf> },

    #[error("calendar '{name}' line {line}: unparsable date '{text}'")]
    Parse {
        name: String,
        line: usize,
        text: String,
    },

    #[error("error reading calendar '{name}': {source}")]
    Read {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("date {0} is outside the range of calendar '{1}'")]
    OutOfRange(DateInt, String),
}

/// Direction for nearest-valid-day searches and business-day shifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// An in-memory calendar: the name it was loaded under and its sorted
/// set of valid dates.
#[derive(Debug, Clone, Default)]
pub struct Calendar {
    pub name: String,
    pub dates: Vec<DateInt>,
}

impl Calendar {
    /// Load a named calendar, searching `dirs` in order; the first
    /// directory containing the file wins.
    pub fn load(name: &str, dirs: &[PathBuf]) -> Result<Self, CalendarError> {
        let mut file = None;
        for dir in dirs {
            if !dir.is_dir() {
                return Err(CalendarError::DirNotFound(dir.clone()));
            }
            let candidate = dir.join(name);
            if candidate.is_file() {
                file = Some(candidate);
                break;
            }
        }
        let Some(path) = file else {
            return Err(CalendarError::NotFound {
                name: name.to_string(),
                dirs: dirs.to_vec(),
            });
        };
        Self::load_file(name, &path)
    }

    fn load_file(name: &str, path: &Path) -> Result<Self, CalendarError> {
        let text = std::fs::read_to_string(path).map_err(|e| CalendarError::Read {
            name: name.to_string(),
            source: e,
        })?;
        let mut dates = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let date: DateInt = line.parse().map_err(|_| CalendarError::Parse {
                name: name.to_string(),
                line: i + 1,
                text: line.to_string(),
            })?;
            dates.push(date);
        }
        dates.sort_unstable();
        Ok(Self {
            name: name.to_string(),
            dates,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Nearest valid day: smallest date `>= date` going forward, or the
    /// largest date `<= date` going backward.
    pub fn nearest(&self, date: DateInt, dir: Direction) -> Result<DateInt, CalendarError> {
        let idx = self.dates.partition_point(|&d| d < date);
        match dir {
            Direction::Forward => self
                .dates
                .get(idx)
                .copied()
                .ok_or(CalendarError::OutOfRange(date, self.name.clone())),
            Direction::Backward => {
                if idx < self.dates.len() && self.dates[idx] == date {
                    return Ok(date);
                }
                if idx == 0 {
                    return Err(CalendarError::OutOfRange(date, self.name.clone()));
                }
                Ok(self.dates[idx - 1])
            }
        }
    }

    /// Advance `n` business days from `date`. The anchor is the nearest
    /// valid day in the shift direction; `n == 0` returns the anchor.
    pub fn shift(
        &self,
        date: DateInt,
        n: i64,
        dir: Direction,
    ) -> Result<DateInt, CalendarError> {
        let anchor = self.nearest(date, dir)?;
        let idx = self.dates.partition_point(|&d| d < anchor);
        let target = idx as i64 + n;
        if target < 0 || target >= self.dates.len() as i64 {
            return Err(CalendarError::OutOfRange(date, self.name.clone()));
        }
        Ok(self.dates[target as usize])
    }
}

/// Convert a chrono date to its `YYYYMMDD` key.
pub fn date_as_int(d: &impl Datelike) -> DateInt {
    d.year() * 10000 + d.month() as i32 * 100 + d.day() as i32
}

/// Convert a `YYYYMMDD` key back to a `NaiveDate`.
pub fn int_as_date(d: DateInt) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(d / 10000, (d / 100 % 100) as u32, (d % 100) as u32)
}

#[cfg(test)]
#[path = "calendar_tests.rs"]
mod tests;

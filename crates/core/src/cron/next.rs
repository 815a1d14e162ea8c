// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Next-fire computation.
//!
//! Candidate dates are enumerated as `YYYYMMDD` integers from the
//! current month across a five-year window, filtered by the month,
//! month-day and weekday sets, optionally intersected with a business
//! calendar, then the earliest instant strictly after the reference
//! time is selected. Rollback/end-of shift the chosen date back to the
//! prior calendar day.

use super::{Cron, CronError, CronKind};
use crate::calendar::{date_as_int, int_as_date, Calendar, DateInt};
use crate::clock::now_in;
use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Timelike};
use chrono_tz::Tz;
use rand::Rng;
use std::time::Duration;

/// Sentinel wait for crons that never fire on their own.
pub const FOREVER: Duration = Duration::from_secs(u64::MAX / 4);

/// Years of candidate dates enumerated beyond the current one.
const YEAR_WINDOW: i32 = 5;

impl Cron {
    /// Compute the next fire strictly after server-now (or `asof`).
    ///
    /// Null and dependent crons and an `@at` in the past are errors;
    /// array evaluation maps those to the [`FOREVER`] sentinel.
    pub fn next_start(&self, asof: Option<&str>) -> Result<(Duration, DateTime<Tz>), CronError> {
        match &self.kind {
            CronKind::Every(every) => {
                let next = now_in(self.timezone, asof)
                    + chrono::Duration::from_std(*every).unwrap_or(chrono::Duration::zero());
                Ok((*every, next))
            }
            CronKind::At(stamp) => {
                let naive =
                    chrono::NaiveDateTime::parse_from_str(stamp, crate::clock::ASOF_FORMAT)
                        .map_err(|_| CronError::MalformedAt(stamp.clone()))?;
                let next = self
                    .timezone
                    .from_local_datetime(&naive)
                    .earliest()
                    .ok_or_else(|| CronError::MalformedAt(stamp.clone()))?;
                let now = now_in(self.timezone, asof);
                let wait = (next - now).to_std().map_err(|_| CronError::AtPassed(stamp.clone()))?;
                Ok((wait, next))
            }
            CronKind::Null | CronKind::Dependent => Err(CronError::NonTriggering),
            CronKind::Numeric => self.next_numeric(asof),
        }
    }

    fn next_numeric(&self, asof: Option<&str>) -> Result<(Duration, DateTime<Tz>), CronError> {
        let f = &self.fields;
        let current = now_in(self.timezone, asof) + chrono::Duration::milliseconds(1);
        let cur_date = date_as_int(&current);

        let raw = next_year_dates(
            current.year(),
            current.month() as i32,
            &f.mday,
            &f.mon,
            &f.wday,
        );
        if raw.is_empty() {
            return Err(CronError::NonTriggering);
        }

        let use_cal = !self.calendar.is_empty() && self.calendar != "ALL";
        let cal = if use_cal {
            Some(Calendar::load(&self.calendar, &self.calendar_dirs)?)
        } else if self.rollback || self.end_of {
            // Backshifting needs a complete day set even without a
            // business calendar attached.
            Some(Calendar {
                name: String::new(),
                dates: next_year_dates(
                    current.year() - 1,
                    current.month() as i32,
                    &(1..=31).collect::<Vec<_>>(),
                    &(1..=12).collect::<Vec<_>>(),
                    &(0..=6).collect::<Vec<_>>(),
                ),
            })
        } else {
            None
        };
        let last_cal_date = cal.as_ref().and_then(|c| c.dates.last().copied());

        // Map raw candidates through the calendar. Forward snap by
        // default; rollback snaps backward; end-of takes the last
        // calendar day strictly before the candidate (so the first of
        // a period maps to the end of the prior period). Candidates
        // beyond the calendar range pass through unchanged.
        let mut dates: Vec<DateInt> = Vec::with_capacity(raw.len());
        for dt in raw {
            let snapped = match &cal {
                None => dt,
                Some(cal) => {
                    let idx = cal.dates.partition_point(|&d| d < dt);
                    if self.end_of {
                        if idx == 0 {
                            continue;
                        }
                        cal.dates[idx - 1]
                    } else if self.rollback {
                        match cal.dates.get(idx) {
                            Some(&d) if d == dt => d,
                            Some(_) if idx > 0 => cal.dates[idx - 1],
                            Some(_) => continue,
                            // beyond the calendar range: pass through
                            None => dt,
                        }
                    } else {
                        cal.dates.get(idx).copied().unwrap_or(dt)
                    }
                }
            };
            dates.push(snapped);
        }
        dates.sort_unstable();
        dates.dedup();
        if dates.is_empty() {
            return Err(CronError::CalendarExhausted(self.calendar.clone()));
        }

        let last_time = f.hour[f.hour.len() - 1] * 10000
            + f.min[f.min.len() - 1] * 100
            + f.sec[f.sec.len() - 1];

        let i = dates.partition_point(|&d| d < cur_date);
        let (run_date, time_of_day) =
            if dates.get(i) == Some(&cur_date) && time_as_float(&current) <= last_time as f64 {
                // Today is scheduled and a slot is still ahead of us.
                (cur_date, next_time_of_day(&current, &f.hour, &f.min, &f.sec))
            } else {
                let next_idx = if dates.get(i) == Some(&cur_date) { i + 1 } else { i };
                let run = dates.get(next_idx).copied().ok_or_else(|| {
                    CronError::CalendarExhausted(self.calendar.clone())
                })?;
                (run, f.hour[0] * 10000 + f.min[0] * 100 + f.sec[0])
            };

        if self.require_cal {
            if let Some(last) = last_cal_date {
                if run_date > last {
                    return Err(CronError::CalendarExhausted(self.calendar.clone()));
                }
            }
        }

        let mut next = local_at(self.timezone, run_date, time_of_day)
            .ok_or(CronError::NonTriggering)?;
        if self.jitter > 0 {
            let extra = rand::thread_rng().gen_range(0..self.jitter);
            next += chrono::Duration::seconds(extra as i64);
        }
        let wait = (next - current).to_std().unwrap_or(Duration::ZERO);
        Ok((wait, next))
    }
}

/// Array form for disjoint schedules: the minimum next fire over all
/// elements. Null/dependent elements contribute the sentinel.
pub fn next_cron_start(crons: &[Cron], asof: Option<&str>) -> (Duration, Option<DateTime<Tz>>) {
    let mut best: (Duration, Option<DateTime<Tz>>) = (FOREVER, None);
    for cron in crons {
        match cron.next_start(asof) {
            Ok((d, next)) if d < best.0 => best = (d, Some(next)),
            _ => {}
        }
    }
    best
}

/// Compile the human `StartDay`/`StartTime` form (`"M-F"`, `"9:00,15:30"`)
/// into a cron array plus its canonical spec string.
pub fn parse_day_and_time(
    days: &str,
    times: &str,
    ctx: &super::CronContext,
) -> Result<(Vec<Cron>, String), CronError> {
    let days = if days.is_empty() { "*" } else { days };
    let mut specs = Vec::new();
    for t in times.split(',') {
        let t = t.replace(' ', "");
        let mut parts = t.split(':');
        let hh = parts.next().unwrap_or("0");
        let mm = parts.next().unwrap_or("0");
        let ss = parts.next().unwrap_or("0");
        specs.push(format!("{} {} {} * * {}", ss, mm, hh, days));
    }
    let crons = Cron::parse_array(&specs, ctx)?;
    Ok((crons, specs.join(",")))
}

/// All candidate dates from `(y0, m0)` through the five-year window.
fn next_year_dates(y0: i32, m0: i32, mday: &[i32], mon: &[i32], wday: &[i32]) -> Vec<DateInt> {
    let mut dates = Vec::new();
    for m in m0..=12 {
        if value_in(m, mon) {
            dates.extend(all_dates_in_month(y0, m, mday, wday));
        }
    }
    for y in 1..YEAR_WINDOW {
        for m in 1..=12 {
            if value_in(m, mon) {
                dates.extend(all_dates_in_month(y0 + y, m, mday, wday));
            }
        }
    }
    for m in 1..=m0 {
        if value_in(m, mon) {
            dates.extend(all_dates_in_month(y0 + YEAR_WINDOW, m, mday, wday));
        }
    }
    dates
}

fn all_dates_in_month(year: i32, mon: i32, mday: &[i32], wday: &[i32]) -> Vec<DateInt> {
    let Some(last) = last_day_of_month(year, mon) else {
        return Vec::new();
    };
    // Both sets unfiltered: every day matches. Otherwise a day matches
    // if either its month-day or its weekday is selected.
    let all_days = mday.first() == Some(&-1) && wday.first() == Some(&-1);
    let mut dates = Vec::new();
    for d in 1..=last {
        if all_days || day_in(d, mday) || weekday_in(year, mon, d, wday) {
            dates.push(year * 10000 + mon * 100 + d);
        }
    }
    dates
}

fn last_day_of_month(year: i32, mon: i32) -> Option<i32> {
    let first = NaiveDate::from_ymd_opt(year, mon as u32, 1)?;
    let next_month = if mon == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, mon as u32 + 1, 1)?
    };
    Some((next_month - first).num_days() as i32)
}

fn value_in(v: i32, set: &[i32]) -> bool {
    set.first() != Some(&-1) && set.contains(&v)
}

fn day_in(d: i32, days: &[i32]) -> bool {
    value_in(d, days)
}

fn weekday_in(year: i32, mon: i32, day: i32, wdays: &[i32]) -> bool {
    if wdays.first() == Some(&-1) {
        return false;
    }
    let Some(date) = NaiveDate::from_ymd_opt(year, mon as u32, day as u32) else {
        return false;
    };
    let wd = date.weekday().num_days_from_sunday() as i32;
    wdays.contains(&wd)
}

/// Time-of-day as `HHMMSS` plus a fractional nanosecond component, so
/// equality at the exact scheduled second still reads as "past it".
fn time_as_float(t: &DateTime<Tz>) -> f64 {
    let whole = t.hour() * 10000 + t.minute() * 100 + t.second();
    whole as f64 + t.nanosecond() as f64 / 1e9
}

/// Smallest `(h, m, s)` in the sets strictly after `t`'s time of day,
/// in lexicographic order; falls back to the first slot.
fn next_time_of_day(t: &DateTime<Tz>, hours: &[i32], mins: &[i32], secs: &[i32]) -> i32 {
    let (ch, cm, cs) = (t.hour() as i32, t.minute() as i32, t.second() as i32);
    for &h in hours {
        if h > ch {
            return h * 10000 + mins[0] * 100 + secs[0];
        }
        if h == ch {
            for &m in mins {
                if m > cm {
                    return h * 10000 + m * 100 + secs[0];
                }
                if m == cm {
                    for &s in secs {
                        if s > cs {
                            return h * 10000 + m * 100 + s;
                        }
                    }
                }
            }
        }
    }
    hours[0] * 10000 + mins[0] * 100 + secs[0]
}

/// Build a zoned instant from a `YYYYMMDD` key and an `HHMMSS` value.
fn local_at(tz: Tz, date: DateInt, hhmmss: i32) -> Option<DateTime<Tz>> {
    let date = int_as_date(date)?;
    let time = NaiveTime::from_hms_opt(
        (hhmmss / 10000) as u32,
        (hhmmss / 100 % 100) as u32,
        (hhmmss % 100) as u32,
    )?;
    let naive = date.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&naive).latest())
}

#[cfg(test)]
#[path = "next_tests.rs"]
mod tests;

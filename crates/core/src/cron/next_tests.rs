// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::super::{Cron, CronContext, CronError};
use super::*;
use std::io::Write;
use std::path::Path;

fn ctx() -> CronContext {
    CronContext {
        timezone: "UTC".into(),
        ..CronContext::default()
    }
}

fn fire(spec: &str, asof: &str) -> DateTime<Tz> {
    let cron = Cron::parse(spec, &ctx()).unwrap();
    cron.next_start(Some(asof)).unwrap().1
}

fn fmt(t: DateTime<Tz>) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[test]
fn every_is_periodic() {
    let cron = Cron::parse("@every 25m", &ctx()).unwrap();
    let (wait, next) = cron.next_start(Some("20240101000000")).unwrap();
    assert_eq!(wait, Duration::from_secs(1500));
    assert_eq!(fmt(next), "2024-01-01 00:25:00");
}

#[test]
fn at_fires_once_then_errors() {
    let cron = Cron::parse("@at 20240601120000", &ctx()).unwrap();
    let (_, next) = cron.next_start(Some("20240101000000")).unwrap();
    assert_eq!(fmt(next), "2024-06-01 12:00:00");
    assert!(matches!(
        cron.next_start(Some("20250101000000")),
        Err(CronError::AtPassed(_))
    ));
}

#[test]
fn null_and_dependent_never_fire() {
    assert!(matches!(
        Cron::parse("@manual", &ctx()).unwrap().next_start(Some("20240101000000")),
        Err(CronError::NonTriggering)
    ));
    assert!(matches!(
        Cron::parse("@depends", &ctx()).unwrap().next_start(Some("20240101000000")),
        Err(CronError::NonTriggering)
    ));
}

#[test]
fn five_minute_cron_same_day() {
    // Server starts at 00:00:02; first fire is 00:05:00.
    assert_eq!(fmt(fire("*/5 * * * *", "20240101000002")), "2024-01-01 00:05:00");
    assert_eq!(fmt(fire("*/5 * * * *", "20240101000500")), "2024-01-01 00:10:00");
}

#[test]
fn next_fire_is_strictly_after_now() {
    for asof in ["20240101000000", "20240101235959", "20240630120000"] {
        for spec in ["* * * * *", "0 0 * * *", "@hourly", "0 30 9 * * M-F"] {
            let cron = Cron::parse(spec, &ctx()).unwrap();
            let now = crate::clock::now_in(cron.timezone, Some(asof));
            let (_, next) = cron.next_start(Some(asof)).unwrap();
            assert!(next > now, "{} at {}: {} !> {}", spec, asof, next, now);
        }
    }
}

#[test]
fn rolls_to_next_day_after_last_slot() {
    assert_eq!(fmt(fire("0 30 9 * * *", "20240101100000")), "2024-01-02 09:30:00");
}

#[test]
fn weekday_cron_skips_weekend() {
    // 2024-01-05 is a Friday; after its slot the next weekday is Monday.
    assert_eq!(fmt(fire("0 0 8 * * M-F", "20240105090000")), "2024-01-08 08:00:00");
}

#[test]
fn mday_and_wday_union_when_both_given() {
    // the 15th OR any Friday; from Sat Jan 6 the next Friday is Jan 12.
    assert_eq!(fmt(fire("0 0 0 15 * FRI", "20240106010000")), "2024-01-12 00:00:00");
    // from Jan 13 the 15th (Monday) comes before Friday the 19th.
    assert_eq!(fmt(fire("0 0 0 15 * FRI", "20240113010000")), "2024-01-15 00:00:00");
}

#[test]
fn timezone_is_respected() {
    let ctx = CronContext {
        timezone: "America/Chicago".into(),
        ..CronContext::default()
    };
    let cron = Cron::parse("0 0 9 * * *", &ctx).unwrap();
    // 13:00 UTC in January is 07:00 in Chicago: fire is 09:00 local.
    let (_, next) = cron.next_start(Some("20240115070000")).unwrap();
    assert_eq!(fmt(next), "2024-01-15 09:00:00");
    assert_eq!(next.timezone(), chrono_tz::Tz::America__Chicago);
}

#[test]
fn array_takes_the_minimum() {
    let crons = Cron::parse_array(
        &["0 0 12 * * *".to_string(), "0 0 9 * * *".to_string()],
        &ctx(),
    )
    .unwrap();
    let (_, next) = next_cron_start(&crons, Some("20240101060000"));
    assert_eq!(fmt(next.unwrap()), "2024-01-01 09:00:00");
}

#[test]
fn array_of_non_triggering_crons_is_the_sentinel() {
    let crons = Cron::parse_array(&["@depends".to_string()], &ctx()).unwrap();
    let (wait, next) = next_cron_start(&crons, Some("20240101060000"));
    assert_eq!(wait, FOREVER);
    assert!(next.is_none());
}

#[test]
fn jitter_stays_within_bound() {
    let mut ctx = ctx();
    ctx.jitter = 30;
    let cron = Cron::parse("0 0 9 * * *", &ctx).unwrap();
    let base = fire("0 0 9 * * *", "20240101060000");
    for _ in 0..20 {
        let (_, next) = cron.next_start(Some("20240101060000")).unwrap();
        let skew = (next - base).num_seconds();
        assert!((0..30).contains(&skew), "jitter {} out of bound", skew);
    }
}

fn write_calendar(dir: &Path, name: &str, dates: &[i32]) {
    let mut f = std::fs::File::create(dir.join(name)).unwrap();
    for d in dates {
        writeln!(f, "{}", d).unwrap();
    }
}

#[test]
fn calendar_filters_candidates_forward() {
    let dir = tempfile::tempdir().unwrap();
    // Only two valid days in the window.
    write_calendar(dir.path(), "special", &[20240110, 20240217]);
    let ctx = CronContext {
        timezone: "UTC".into(),
        calendar: "special".into(),
        calendar_dirs: vec![dir.path().to_path_buf()],
        ..CronContext::default()
    };
    let cron = Cron::parse("0 0 9 * * *", &ctx).unwrap();
    let (_, next) = cron.next_start(Some("20240101060000")).unwrap();
    assert_eq!(fmt(next), "2024-01-10 09:00:00");
    let (_, next) = cron.next_start(Some("20240110100000")).unwrap();
    assert_eq!(fmt(next), "2024-02-17 09:00:00");
}

#[test]
fn missing_calendar_is_an_error() {
    let ctx = CronContext {
        timezone: "UTC".into(),
        calendar: "ghost".into(),
        calendar_dirs: vec![std::env::temp_dir()],
        ..CronContext::default()
    };
    let cron = Cron::parse("0 0 9 * * *", &ctx).unwrap();
    assert!(matches!(
        cron.next_start(Some("20240101060000")),
        Err(CronError::MissingCalendar(_))
    ));
}

#[test]
fn require_cal_errors_when_exhausted() {
    let dir = tempfile::tempdir().unwrap();
    write_calendar(dir.path(), "short", &[20240102, 20240103]);
    let ctx = CronContext {
        timezone: "UTC".into(),
        calendar: "short".into(),
        calendar_dirs: vec![dir.path().to_path_buf()],
        require_cal: true,
        ..CronContext::default()
    };
    let cron = Cron::parse("0 0 9 * * *", &ctx).unwrap();
    // Past the calendar's last day, candidates outrun the calendar.
    assert!(matches!(
        cron.next_start(Some("20240110060000")),
        Err(CronError::CalendarExhausted(_))
    ));
    // Without require_cal the date passes through unchanged.
    let mut loose = cron.clone();
    loose.require_cal = false;
    let (_, next) = loose.next_start(Some("20240110060000")).unwrap();
    assert_eq!(fmt(next), "2024-01-10 09:00:00");
}

#[test]
fn eom_fires_on_last_day_of_month() {
    assert_eq!(fmt(fire("@eom", "20240115120000")), "2024-01-31 00:00:00");
    // February 2024 is a leap month.
    assert_eq!(fmt(fire("@eom", "20240201120000")), "2024-02-29 00:00:00");
    // On the eom day itself (past midnight) the next fire is next month's end.
    assert_eq!(fmt(fire("@eom", "20240131120000")), "2024-02-29 00:00:00");
}

#[test]
fn eom_with_calendar_uses_last_valid_day() {
    let dir = tempfile::tempdir().unwrap();
    // M-F days around end of March 2024: the 31st is a Sunday, 30th a
    // Saturday, so the last business day is Friday the 29th.
    let mut days = Vec::new();
    for d in 1..=31 {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, d).unwrap();
        if date.weekday().number_from_monday() <= 5 {
            days.push(20240300 + d as i32);
        }
    }
    for d in 1..=30 {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 4, d).unwrap();
        if date.weekday().number_from_monday() <= 5 {
            days.push(20240400 + d as i32);
        }
    }
    write_calendar(dir.path(), "mf", &days);
    let ctx = CronContext {
        timezone: "UTC".into(),
        calendar: "mf".into(),
        calendar_dirs: vec![dir.path().to_path_buf()],
        ..CronContext::default()
    };
    let cron = Cron::parse("@eom", &ctx).unwrap();
    let (_, next) = cron.next_start(Some("20240315120000")).unwrap();
    assert_eq!(fmt(next), "2024-03-29 00:00:00");
}

#[test]
fn eow_fires_on_saturday_without_calendar() {
    // @weekly anchors Sundays; end-of rolls back one day to Saturday.
    assert_eq!(fmt(fire("@eow", "20240103120000")), "2024-01-06 00:00:00");
}

#[test]
fn rollback_shifts_invalid_dates_backward() {
    let dir = tempfile::tempdir().unwrap();
    // The 15th of Jan 2024 (a Monday) is excluded; nearest prior valid
    // day is Friday the 12th.
    let mut days: Vec<i32> = Vec::new();
    for d in 1..=31 {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 1, d).unwrap();
        if date.weekday().number_from_monday() <= 5 && d != 15 {
            days.push(20240100 + d as i32);
        }
    }
    write_calendar(dir.path(), "mf-hol", &days);
    let ctx = CronContext {
        timezone: "UTC".into(),
        calendar: "mf-hol".into(),
        calendar_dirs: vec![dir.path().to_path_buf()],
        rollback: true,
        ..CronContext::default()
    };
    let cron = Cron::parse("0 0 9 15 * *", &ctx).unwrap();
    let (_, next) = cron.next_start(Some("20240105060000")).unwrap();
    assert_eq!(fmt(next), "2024-01-12 09:00:00");
    // A valid 15th stays put: without the holiday the date is unchanged.
    let ctx2 = CronContext {
        rollback: true,
        timezone: "UTC".into(),
        ..CronContext::default()
    };
    let cron = Cron::parse("0 0 9 15 * *", &ctx2).unwrap();
    let (_, next) = cron.next_start(Some("20240105060000")).unwrap();
    assert_eq!(fmt(next), "2024-01-15 09:00:00");
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn ctx() -> CronContext {
    CronContext {
        timezone: "UTC".into(),
        ..CronContext::default()
    }
}

#[test]
fn empty_spec_is_null() {
    let cron = Cron::parse("", &ctx()).unwrap();
    assert!(cron.is_null());
}

#[test]
fn manual_and_never_are_null() {
    assert!(Cron::parse("@manual", &ctx()).unwrap().is_null());
    assert!(Cron::parse("@never", &ctx()).unwrap().is_null());
}

#[test]
fn depends_is_dependent() {
    let cron = Cron::parse("@depends", &ctx()).unwrap();
    assert!(cron.is_dependent());
    assert!(!cron.is_null());
}

#[test]
fn at_requires_a_full_timestamp() {
    let cron = Cron::parse("@at 20990101120000", &ctx()).unwrap();
    assert_eq!(cron.kind, CronKind::At("20990101120000".into()));
    assert!(matches!(
        Cron::parse("@at tomorrow", &ctx()),
        Err(CronError::MalformedAt(_))
    ));
    assert!(matches!(
        Cron::parse("@at", &ctx()),
        Err(CronError::MalformedAt(_))
    ));
}

#[test]
fn every_parses_durations() {
    let cron = Cron::parse("@every 1m30s", &ctx()).unwrap();
    assert_eq!(cron.kind, CronKind::Every(std::time::Duration::from_secs(90)));
    assert!(cron.is_every());
    assert!(matches!(
        Cron::parse("@every soon", &ctx()),
        Err(CronError::MalformedEvery(_))
    ));
}

#[test]
fn daily_shortcut_fields() {
    let cron = Cron::parse("@daily", &ctx()).unwrap();
    assert_eq!(cron.fields.sec, vec![0]);
    assert_eq!(cron.fields.min, vec![0]);
    assert_eq!(cron.fields.hour, vec![0]);
    assert_eq!(cron.fields.wday, vec![-1]);
    assert_eq!(cron.fields.mday, (1..=31).collect::<Vec<_>>());
}

#[test]
fn eom_implies_rollback_and_end_of() {
    let cron = Cron::parse("@eom", &ctx()).unwrap();
    assert!(cron.rollback);
    assert!(cron.end_of);
    assert_eq!(cron.fields.mday, vec![1]);
    let monthly = Cron::parse("@monthly", &ctx()).unwrap();
    assert!(!monthly.rollback);
    assert!(!monthly.end_of);
}

#[test]
fn quarterly_months() {
    let cron = Cron::parse("@quarterly", &ctx()).unwrap();
    assert_eq!(cron.fields.mon, vec![1, 4, 7, 10]);
}

#[test]
fn monthly_accepts_min_hour_adjustment() {
    let cron = Cron::parse("@monthly 30 17", &ctx()).unwrap();
    assert_eq!(cron.fields.min, vec![30]);
    assert_eq!(cron.fields.hour, vec![17]);
}

#[test]
fn unknown_shortcut_is_an_error() {
    assert!(matches!(
        Cron::parse("@fortnightly", &ctx()),
        Err(CronError::UnrecognizedAt(_))
    ));
}

#[test]
fn five_field_form_has_implicit_second_zero() {
    let cron = Cron::parse("*/5 * * * *", &ctx()).unwrap();
    assert_eq!(cron.fields.sec, vec![0]);
    assert_eq!(cron.fields.min, (0..60).step_by(5).collect::<Vec<_>>());
}

#[test]
fn six_field_form_parses_seconds() {
    let cron = Cron::parse("15 0 8 * * 3", &ctx()).unwrap();
    assert_eq!(cron.fields.sec, vec![15]);
    assert_eq!(cron.fields.min, vec![0]);
    assert_eq!(cron.fields.hour, vec![8]);
    assert_eq!(cron.fields.wday, vec![3]);
    assert_eq!(cron.fields.mday, vec![-1]);
}

#[test]
fn wrong_field_count_is_an_error() {
    assert!(matches!(
        Cron::parse("1 2 3 4", &ctx()),
        Err(CronError::FieldCount { found: 4, .. })
    ));
    assert!(matches!(
        Cron::parse("1 2 3 4 5 6 7", &ctx()),
        Err(CronError::FieldCount { found: 7, .. })
    ));
}

#[test]
fn mday_wday_sentinels() {
    // only mday given: wday unfiltered
    let c = Cron::parse("0 0 15 * *", &ctx()).unwrap();
    assert_eq!(c.fields.mday, vec![15]);
    assert_eq!(c.fields.wday, vec![-1]);
    // only wday given: mday unfiltered
    let c = Cron::parse("0 0 * * 1-5", &ctx()).unwrap();
    assert_eq!(c.fields.mday, vec![-1]);
    assert_eq!(c.fields.wday, vec![1, 2, 3, 4, 5]);
    // both given: both kept
    let c = Cron::parse("0 0 15 * 5", &ctx()).unwrap();
    assert_eq!(c.fields.mday, vec![15]);
    assert_eq!(c.fields.wday, vec![5]);
}

#[test]
fn expand_ranges_lists_and_steps() {
    assert_eq!(expand_field("1,2-21/2", 0, 59, "min").unwrap(), vec![
        1, 2, 4, 6, 8, 10, 12, 14, 16, 18, 20
    ]);
    assert_eq!(expand_field("*/15", 0, 59, "min").unwrap(), vec![0, 15, 30, 45]);
    assert_eq!(expand_field("7", 0, 59, "min").unwrap(), vec![7]);
}

#[test]
fn expand_names_and_aliases() {
    assert_eq!(expand_field("M-F", 0, 6, "wday").unwrap(), vec![1, 2, 3, 4, 5]);
    assert_eq!(expand_field("weekend", 0, 6, "wday").unwrap(), vec![0, 6]);
    assert_eq!(expand_field("mon-fri", 0, 6, "wday").unwrap(), vec![1, 2, 3, 4, 5]);
    assert_eq!(expand_field("SUNDAY", 0, 6, "wday").unwrap(), vec![0]);
    assert_eq!(expand_field("jan,jul", 1, 12, "mon").unwrap(), vec![1, 7]);
    assert_eq!(expand_field("December", 1, 12, "mon").unwrap(), vec![12]);
    assert_eq!(expand_field("everyday", 0, 6, "wday").unwrap(), (0..=6).collect::<Vec<_>>());
}

#[test]
fn expand_r_prefix_freezes_one_value() {
    let picked = expand_field("R10-19", 0, 59, "min").unwrap();
    assert_eq!(picked.len(), 1);
    assert!((10..=19).contains(&picked[0]));
}

#[test]
fn expand_rejects_garbage() {
    assert!(expand_field("1-", 0, 59, "min").is_err());
    assert!(expand_field("5-1", 0, 59, "min").is_err());
    assert!(expand_field("*/0", 0, 59, "min").is_err());
    assert!(expand_field("x", 0, 59, "min").is_err());
}

#[test]
fn array_elements_are_marked() {
    let crons = Cron::parse_array(
        &["0 8 * * 3".to_string(), "5 30 16 * * 5".to_string()],
        &ctx(),
    )
    .unwrap();
    assert_eq!(crons.len(), 2);
    assert!(crons.iter().all(|c| c.array));
    // a single-element array is not an "array" cron
    let one = Cron::parse_array(&["@manual".to_string()], &ctx()).unwrap();
    assert!(one[0].is_null());
}

#[test]
fn context_applies_timezone_calendar_and_jitter() {
    let ctx = CronContext {
        timezone: "America/New_York".into(),
        calendar: "mf".into(),
        rollback: true,
        require_cal: true,
        jitter: 30,
        ..CronContext::default()
    };
    let cron = Cron::parse("@daily", &ctx).unwrap();
    assert_eq!(cron.timezone, chrono_tz::Tz::America__New_York);
    assert_eq!(cron.calendar, "mf");
    assert!(cron.rollback);
    assert!(cron.require_cal);
    assert_eq!(cron.jitter, 30);
}

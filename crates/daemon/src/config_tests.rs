// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn minimal_config_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rpeat.json");
    std::fs::write(
        &path,
        format!(
            r#"{{"HOME": "{}", "JobsFiles": ["jobs.json"]}}"#,
            dir.path().display()
        ),
    )
    .unwrap();

    let config = ServerConfig::load(&path).unwrap();
    assert_eq!(config.max_history, 10);
    assert_eq!(config.tick_interval_secs, 30);
    assert_eq!(config.tick_missed_threshold_secs, 15);
    assert!(config.keep_history);
    assert_eq!(config.port, "8080");
    // relative job files resolve under HOME
    assert_eq!(config.jobs_files[0], dir.path().join("jobs.json"));
    assert_eq!(
        config.pidfile(),
        dir.path().join("rpeat-8080")
    );
}

#[test]
fn missing_jobs_files_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rpeat.json");
    std::fs::write(&path, r#"{"HOME": "/tmp/x"}"#).unwrap();
    assert!(matches!(
        ServerConfig::load(&path),
        Err(ServerConfigError::NoJobsFiles)
    ));
}

#[test]
fn explicit_values_survive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rpeat.json");
    std::fs::write(
        &path,
        format!(
            r#"{{"Name": "prod", "HOME": "{}", "PORT": "9999",
                 "JobsFiles": ["/abs/jobs.xml"], "MaxHistory": 50,
                 "TickIntervalSecs": 10, "TickMissedThresholdSecs": 5,
                 "Logging": {{"Purge": "72h"}}}}"#,
            dir.path().display()
        ),
    )
    .unwrap();
    let config = ServerConfig::load(&path).unwrap();
    assert_eq!(config.name, "prod");
    assert_eq!(config.max_history, 50);
    assert_eq!(config.jobs_files[0], PathBuf::from("/abs/jobs.xml"));
    let defaults = config.load_defaults();
    assert_eq!(defaults.max_history, 50);
    assert_eq!(defaults.tick_interval_secs, 10);
    assert_eq!(defaults.log_purge, "72h");
}

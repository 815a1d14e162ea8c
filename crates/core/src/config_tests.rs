// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::depend::DepAction;
use std::path::Path;

fn defaults() -> LoadDefaults {
    LoadDefaults::default()
}

fn write(path: &Path, text: &str) {
    std::fs::write(path, text).unwrap();
}

#[test]
fn slugify_lowercases_and_hyphenates() {
    assert_eq!(slugify("Nightly Backup Job"), "nightly-backup-job");
    assert_eq!(slugify("etl"), "etl");
}

#[test]
fn load_assigns_ids_and_writes_them_back() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("jobs.json");
    write(&file, r#"[{"Name": "a", "Cmd": "/bin/true"}]"#);

    let out = load_config(&[file.clone()], &defaults()).unwrap();
    assert_eq!(out.jobs.len(), 1);
    assert!(!out.jobs[0].id.is_zero());

    // The id must persist across loads.
    let again = load_config(&[file], &defaults()).unwrap();
    assert_eq!(again.jobs[0].id, out.jobs[0].id);
}

#[test]
fn template_inheritance_resolves_root_down() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("jobs.json");
    write(
        &file,
        r#"[
        {"Name": "base", "Type": "template", "Cmd": "/bin/base", "Retry": 3,
         "Env": ["ROOT=/data"]},
        {"Name": "mid", "Type": "template", "Inherits": "base", "Retry": 5,
         "Env": ["SUB=$ROOT/sub"]},
        {"Name": "leaf", "Inherits": "mid", "CronStart": ["@daily"]}
    ]"#,
    );

    let out = load_config(&[file], &defaults()).unwrap();
    assert_eq!(out.jobs.len(), 1, "templates are never jobs");
    let cfg = &out.jobs[0].cfg;
    assert_eq!(cfg.name, "leaf");
    assert_eq!(cfg.cmd.as_deref(), Some("/bin/base"));
    assert_eq!(cfg.retry, 5, "closer template wins");
    assert_eq!(cfg.env, vec!["ROOT=/data".to_string(), "SUB=$ROOT/sub".to_string()]);
    assert_eq!(cfg.inheritance_chain, vec!["base".to_string(), "mid".to_string()]);
}

#[test]
fn duplicate_template_keeps_first_and_warns() {
    let parsed = vec![(
        PathBuf::from("a.json"),
        vec![
            JobSpec {
                name: "t".into(),
                kind: Some("template".into()),
                retry: Some(1),
                ..JobSpec::default()
            },
            JobSpec {
                name: "t".into(),
                kind: Some("template".into()),
                retry: Some(9),
                ..JobSpec::default()
            },
        ],
    )];
    let (templates, warnings) = load_templates(&parsed);
    assert_eq!(templates["t"].retry, Some(1));
    assert_eq!(warnings.len(), 1);
}

#[test]
fn cyclic_inherits_is_a_warning_not_a_hang() {
    let parsed = vec![(
        PathBuf::from("a.json"),
        vec![
            JobSpec {
                name: "x".into(),
                kind: Some("template".into()),
                inherits: Some("y".into()),
                ..JobSpec::default()
            },
            JobSpec {
                name: "y".into(),
                kind: Some("template".into()),
                inherits: Some("x".into()),
                ..JobSpec::default()
            },
        ],
    )];
    let (_, warnings) = load_templates(&parsed);
    assert!(warnings.iter().any(|w| w.contains("cyclic")));
}

#[test]
fn bad_cron_demotes_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("jobs.json");
    write(&file, r#"[{"Name": "broken", "CronStart": ["not a cron"]}]"#);

    let out = load_config(&[file], &defaults()).unwrap();
    assert!(out.jobs[0].disabled);
    assert!(out.jobs[0].issues.iter().any(|i| i.error));
}

#[test]
fn bad_durations_are_validation_errors() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("jobs.json");
    write(
        &file,
        r#"[{"Name": "j", "MaxDuration": "whenever",
            "Dependency": [{"Dependencies": {"x": "success"}, "Delay": "eventually"}]}]"#,
    );
    let out = load_config(&[file], &defaults()).unwrap();
    let messages: Vec<_> = out.jobs[0].issues.iter().map(|i| i.message.clone()).collect();
    assert!(messages.iter().any(|m| m.contains("MaxDuration")));
    assert!(messages.iter().any(|m| m.contains("Dependency.Delay")));
}

#[test]
fn duplicate_job_names_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("jobs.json");
    write(&file, r#"[{"Name": "twin"}, {"Name": "twin"}]"#);
    assert!(matches!(
        load_config(&[file], &defaults()),
        Err(ConfigError::DuplicateName(_))
    ));
}

#[test]
fn controller_synthesis_wires_children() {
    let mut parent: JobSpec = serde_json::from_str(
        r#"{"Name": "pipeline", "CronStart": ["@daily"], "User": "ops",
            "Jobs": [{"Name": "extract"}, {"Name": "load"}]}"#,
    )
    .unwrap();
    let children = synthesize_controller(&mut parent);

    assert_eq!(parent.kind.as_deref(), Some("CONTROLLER"));
    assert_eq!(children.len(), 2);
    let parent_id = parent.job_uuid.to_string();

    // Every child runs on @depends and inherits the parent's user.
    for child in &children {
        assert_eq!(child.cron_start.as_ref().unwrap(), &vec!["@depends".to_string()]);
        assert_eq!(child.kind.as_deref(), Some("JOJ"));
        assert_eq!(child.user.as_deref(), Some("ops"));
    }

    // First child starts when the parent runs; second follows the first.
    let first_start = &children[0].dependency.as_ref().unwrap()[0];
    assert_eq!(first_start.action, DepAction::Start);
    assert_eq!(first_start.dependencies[&parent_id], "running");
    assert_eq!(first_start.dependencies.len(), 1);

    let second_start = &children[1].dependency.as_ref().unwrap()[0];
    assert_eq!(second_start.dependencies.len(), 2);
    assert_eq!(
        second_start.dependencies[&children[0].job_uuid.to_string()],
        "success|end"
    );

    // Children stop when the parent stops and reset when it completes.
    let stop = &children[0].dependency.as_ref().unwrap()[1];
    assert_eq!(stop.action, DepAction::Stop);
    assert_eq!(stop.dependencies[&parent_id], "stopped");

    // Parent rollups: all-success, any-stopped, any-failed with budget.
    let rollups = parent.dependency.as_ref().unwrap();
    assert_eq!(rollups.len(), 3);
    assert_eq!(rollups[0].action, DepAction::CompletedSuccess);
    assert_eq!(rollups[0].dependencies.len(), 2);
    assert_eq!(rollups[1].action, DepAction::CompletedStopped);
    assert_eq!(rollups[1].n, 1);
    assert_eq!(rollups[2].action, DepAction::CompletedFailed);
    assert_eq!(rollups[2].n, 1);
}

#[test]
fn controller_children_load_as_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("jobs.json");
    write(
        &file,
        r#"[{"Name": "p", "CronStart": ["@manual"],
            "Jobs": [{"Name": "c1", "Cmd": "/bin/true"}, {"Name": "c2", "Cmd": "/bin/true"}]}]"#,
    );
    let out = load_config(&[file], &defaults()).unwrap();
    assert_eq!(out.jobs.len(), 3);
    let names: Vec<_> = out.jobs.iter().map(|j| j.cfg.name.clone()).collect();
    assert_eq!(names, vec!["p", "c1", "c2"]);
    assert!(out.jobs[0].cfg.is_controller());
    assert!(out.jobs[1].cfg.is_child());
    assert!(out.jobs[1].cfg.cron_is_dependent());
}

#[test]
fn spec_equal_detects_reloadable_changes() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("jobs.json");
    write(&file, r#"[{"Name": "a", "Cmd": "/bin/true", "CronStart": ["@daily"]}]"#);
    let a = load_config(&[file.clone()], &defaults()).unwrap();

    let b = load_config(&[file.clone()], &defaults()).unwrap();
    assert!(spec_equal(&a.jobs[0].cfg, &b.jobs[0].cfg));

    write(
        &file,
        &std::fs::read_to_string(&file)
            .unwrap()
            .replace("@daily", "@hourly"),
    );
    let c = load_config(&[file], &defaults()).unwrap();
    assert!(!spec_equal(&a.jobs[0].cfg, &c.jobs[0].cfg));
}

#[test]
fn xml_and_json_agree() {
    let dir = tempfile::tempdir().unwrap();
    let json = dir.path().join("jobs.json");
    let xml = dir.path().join("jobs.xml");
    write(&json, r#"[{"Name": "same", "Cmd": "/bin/true", "Retry": 2}]"#);
    write(
        &xml,
        "<Jobs><JobSpec><Name>same</Name><Cmd>/bin/true</Cmd><Retry>2</Retry></JobSpec></Jobs>",
    );
    let a = parse_spec_file(&json).unwrap();
    let b = parse_spec_file(&xml).unwrap();
    assert_eq!(a[0].name, b[0].name);
    assert_eq!(a[0].cmd, b[0].cmd);
    assert_eq!(a[0].retry, b[0].retry);
}

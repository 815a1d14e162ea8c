// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::depend::{DepAction, DepCondition};

#[test]
fn minimal_json_spec() {
    let specs: Vec<JobSpec> = serde_json::from_str(r#"[{"Name": "hello"}]"#).unwrap();
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0].name, "hello");
    assert!(specs[0].job_uuid.is_zero());
    assert!(!specs[0].is_template());
}

#[test]
fn full_json_spec() {
    let json = r#"[{
        "Name": "etl",
        "Type": "CONTROLLER",
        "Cmd": "/bin/sh -c run-etl",
        "ShutdownSig": "SIGINT",
        "Env": ["A=1", "B=$A"],
        "DateEnv": ["TODAY=CCYY-MM-DD"],
        "Timezone": "America/Chicago",
        "Calendar": "MF",
        "CronStart": ["0 8 * * 3", "5 30 16 * * 5"],
        "CronEnd": ["0 0 18 * * *"],
        "StartRule": "NoStart",
        "Retry": 2,
        "RetryWait": "1s,2s",
        "MaxDuration": "1h",
        "Jitter": 30,
        "Logging": {"StdoutFile": "/var/log/etl.out", "Append": true, "Purge": "72h"},
        "Dependency": [
            {"Dependencies": {"upstream": "success|end"}, "Action": "start", "Condition": "all", "Delay": "100ms"}
        ],
        "Permissions": {"start": ["alice"]},
        "Admin": ["root"],
        "Jobs": [{"Name": "step-1", "Cmd": "/bin/true"}]
    }]"#;
    let specs: Vec<JobSpec> = serde_json::from_str(json).unwrap();
    let spec = &specs[0];
    assert!(spec.is_controller());
    assert_eq!(spec.cron_start.as_ref().unwrap().len(), 2);
    assert_eq!(spec.jobs.as_ref().unwrap()[0].name, "step-1");
    let dep = &spec.dependency.as_ref().unwrap()[0];
    assert_eq!(dep.action, DepAction::Start);
    assert_eq!(dep.condition, DepCondition::All);
    assert_eq!(spec.logging.as_ref().unwrap().purge, "72h");
    assert_eq!(spec.permissions.as_ref().unwrap()["start"], vec!["alice"]);
}

#[test]
fn spec_round_trips_through_json() {
    let mut spec = JobSpec {
        name: "roundtrip".into(),
        cmd: Some("/bin/true".into()),
        retry: Some(3),
        ..JobSpec::default()
    };
    spec.job_uuid = JobId::new();
    let text = serde_json::to_string(&vec![spec.clone()]).unwrap();
    let back: Vec<JobSpec> = serde_json::from_str(&text).unwrap();
    assert_eq!(back[0], spec);
}

#[test]
fn xml_document_round_trip() {
    let xml = r#"<Jobs>
  <JobSpec>
    <Name>xml job</Name>
    <Cmd>/bin/echo hi</Cmd>
    <Disabled>true</Disabled>
    <CronStart>@daily</CronStart>
    <CronStart>@hourly</CronStart>
  </JobSpec>
</Jobs>"#;
    let doc: JobsDoc = quick_xml::de::from_str(xml).unwrap();
    assert_eq!(doc.jobs.len(), 1);
    assert_eq!(doc.jobs[0].name, "xml job");
    assert!(doc.jobs[0].disabled);
    assert_eq!(
        doc.jobs[0].cron_start.as_ref().unwrap(),
        &vec!["@daily".to_string(), "@hourly".to_string()]
    );

    let out = quick_xml::se::to_string(&doc).unwrap();
    let back: JobsDoc = quick_xml::de::from_str(&out).unwrap();
    assert_eq!(back.jobs, doc.jobs);
}

#[test]
fn template_detection_is_case_insensitive() {
    let spec = JobSpec {
        name: "t".into(),
        kind: Some("Template".into()),
        ..JobSpec::default()
    };
    assert!(spec.is_template());
}

#[test]
fn exit_state_map_parses_and_skips_garbage() {
    let map = exit_state_map(&[
        "2=warning".to_string(),
        "3=failed".to_string(),
        "nope".to_string(),
        "x=success".to_string(),
    ]);
    assert_eq!(map.len(), 2);
    assert_eq!(map[&2], JState::Warning);
    assert_eq!(map[&3], JState::Failed);
}

#[test]
fn alert_actions_emptiness() {
    let mut actions = AlertActions::default();
    assert!(actions.is_empty());
    actions.on_failure = Some(Alert::default());
    assert!(!actions.is_empty());
}

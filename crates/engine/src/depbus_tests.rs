// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::context::EngineContext;
use crate::supervisor::register_job;
use rpeat_core::config::{build_cfg, load_config, LoadDefaults};
use rpeat_core::job::Job;
use rpeat_core::{DepEvent, JobId, JobSpec};
use tokio::time::Instant;

fn engine(dir: &std::path::Path) -> (EngineContext, DependencyBus) {
    let (ctx, updates_rx, dep_rx, alerts_rx) = EngineContext::new(dir.to_path_buf());
    std::mem::forget((updates_rx, alerts_rx));
    let bus = DependencyBus::new();
    bus.start(dep_rx);
    (ctx, bus)
}

fn job_from_json(json: &str, dir: &std::path::Path) -> Arc<Job> {
    let spec: JobSpec = serde_json::from_str(json).unwrap();
    let mut defaults = LoadDefaults::default();
    defaults.tmp_dir = dir.join("tmp");
    let (cfg, issues) = build_cfg(&spec, &HashMap::new(), &defaults);
    assert!(issues.iter().all(|i| !i.error), "{:?}", issues);
    Arc::new(Job::new(JobId::new(), cfg))
}

fn register_with_deps(
    job: Arc<Job>,
    ctx: &EngineContext,
    bus: &DependencyBus,
) -> Arc<JobHandle> {
    let handle = register_job(job, ctx);
    let deps = handle.job.lock_cfg().dependencies.clone();
    for dep in deps {
        bus.add_evaluator(handle.clone(), dep, ctx.clone());
    }
    handle
}

async fn wait_for<F: Fn() -> bool>(what: &str, deadline: Duration, cond: F) {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test(flavor = "multi_thread")]
async fn upstream_success_triggers_dependent_start() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, bus) = engine(dir.path());

    let upstream_id = JobId::new();
    let y = job_from_json(
        &format!(
            r#"{{"Name": "downstream", "Cmd": "/bin/sh -c exit 0", "CronStart": ["@depends"],
                "Dependency": [{{"Dependencies": {{"{}": "success"}},
                                 "Action": "start", "Condition": "all", "Delay": "0s"}}]}}"#,
            upstream_id
        ),
        dir.path(),
    );
    let handle = register_with_deps(y, &ctx, &bus);
    tokio::time::sleep(Duration::from_millis(100)).await;

    ctx.dep_tx
        .send(DepEvent {
            id: upstream_id,
            name: "upstream".into(),
            state: JState::Success,
        })
        .await
        .unwrap();

    wait_for("downstream run", Duration::from_secs(10), || {
        handle.job.lock_run().history.len() == 1
    })
    .await;
    assert_eq!(handle.job.lock_run().history[0].state, "success");
    handle.signal_stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn each_upstream_cycle_triggers_one_run() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, bus) = engine(dir.path());

    let x = job_from_json(
        r#"{"Name": "x", "Cmd": "/bin/sh -c exit 0", "CronStart": ["@every 400ms"]}"#,
        dir.path(),
    );
    let xh = register_job(x, &ctx);

    let y = job_from_json(
        r#"{"Name": "y", "Cmd": "/bin/sh -c exit 0", "CronStart": ["@depends"],
            "Dependency": [{"Dependencies": {"x": "success"},
                            "Action": "start", "Condition": "all", "Delay": "0s"}]}"#,
        dir.path(),
    );
    let yh = register_with_deps(y, &ctx, &bus);

    wait_for("y follows x", Duration::from_secs(10), || {
        yh.job.lock_run().history.len() >= 2
    })
    .await;
    assert!(xh.job.lock_run().history.len() >= 2);
    xh.signal_stop();
    yh.signal_stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn bad_upstream_state_marks_downstream() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, bus) = engine(dir.path());

    let upstream_id = JobId::new();
    let y = job_from_json(
        &format!(
            r#"{{"Name": "marked", "Cmd": "/bin/sh -c exit 0", "CronStart": ["@depends"],
                "Dependency": [{{"Dependencies": {{"{}": "success"}},
                                 "Action": "start", "Condition": "all"}}]}}"#,
            upstream_id
        ),
        dir.path(),
    );
    let handle = register_with_deps(y, &ctx, &bus);
    tokio::time::sleep(Duration::from_millis(100)).await;

    for (upstream, expected) in [
        (JState::Failed, JState::DepFailed),
        (JState::Retrying, JState::DepRetry),
        (JState::Stopped, JState::DepWarning),
    ] {
        ctx.dep_tx
            .send(DepEvent {
                id: upstream_id,
                name: "upstream".into(),
                state: upstream,
            })
            .await
            .unwrap();
        wait_for("downstream dep state", Duration::from_secs(5), || {
            handle.job.state() == expected
        })
        .await;
    }
    handle.signal_stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn contingent_job_starts_held_until_resolved() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, bus) = engine(dir.path());

    let upstream_id = JobId::new();
    // A schedule AND a dependency: contingent until the dependency
    // first resolves.
    let job = job_from_json(
        &format!(
            r#"{{"Name": "contingent", "Cmd": "/bin/sh -c exit 0", "CronStart": ["@daily"],
                "Dependency": [{{"Dependencies": {{"{}": "success"}},
                                 "Action": "start", "Condition": "all"}}]}}"#,
            upstream_id
        ),
        dir.path(),
    );
    let handle = register_with_deps(job, &ctx, &bus);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(handle.job.state(), JState::Contingent);
    assert!(handle.job.hold());

    ctx.dep_tx
        .send(DepEvent {
            id: upstream_id,
            name: "upstream".into(),
            state: JState::Success,
        })
        .await
        .unwrap();
    wait_for("contingency released", Duration::from_secs(5), || {
        handle.job.state() == JState::Ready && !handle.job.hold()
    })
    .await;
    handle.signal_stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn job_of_jobs_runs_children_sequentially_to_success() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, bus) = engine(dir.path());

    let file = dir.path().join("jobs.json");
    std::fs::write(
        &file,
        format!(
            r#"[{{"Name": "parent", "CronStart": ["@manual"], "TmpDir": "{}",
                 "Jobs": [
                    {{"Name": "child-one", "Cmd": "/bin/sh -c echo one"}},
                    {{"Name": "child-two", "Cmd": "/bin/sh -c echo two"}}
                 ]}}]"#,
            dir.path().join("tmp").display()
        ),
    )
    .unwrap();
    let loaded = load_config(&[file], &LoadDefaults::default()).unwrap();
    assert_eq!(loaded.jobs.len(), 3);

    let mut handles = Vec::new();
    for job in &loaded.jobs {
        let handle = register_with_deps(
            Arc::new(Job::new(job.id, job.cfg.clone())),
            &ctx,
            &bus,
        );
        handles.push(handle);
    }
    let parent = handles[0].clone();
    let c1 = handles[1].clone();
    let c2 = handles[2].clone();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Start the parent; the synthesized graph must run the children in
    // order and roll their success up into the parent.
    parent.timer.reset(Duration::ZERO);
    wait_for("parent success", Duration::from_secs(20), || {
        parent.job.state() == JState::Success
    })
    .await;
    assert_eq!(c1.job.lock_run().history[0].state, "success");
    assert_eq!(c2.job.lock_run().history[0].state, "success");
    // Child one necessarily finished before child two started.
    assert!(
        c1.job.lock_run().history[0].start_unix <= c2.job.lock_run().history[0].start_unix
    );
    for h in handles {
        h.signal_stop();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn job_of_jobs_stop_cascades_to_running_child() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, bus) = engine(dir.path());

    let file = dir.path().join("jobs.json");
    std::fs::write(
        &file,
        format!(
            r#"[{{"Name": "parent", "CronStart": ["@manual"], "TmpDir": "{}",
                 "Jobs": [
                    {{"Name": "slow-child", "Cmd": "/bin/sh -c sleep 60"}}
                 ]}}]"#,
            dir.path().join("tmp").display()
        ),
    )
    .unwrap();
    let loaded = load_config(&[file], &LoadDefaults::default()).unwrap();

    let mut handles = Vec::new();
    for job in &loaded.jobs {
        handles.push(register_with_deps(
            Arc::new(Job::new(job.id, job.cfg.clone())),
            &ctx,
            &bus,
        ));
    }
    let parent = handles[0].clone();
    let child = handles[1].clone();
    tokio::time::sleep(Duration::from_millis(200)).await;

    parent.timer.reset(Duration::ZERO);
    wait_for("child running", Duration::from_secs(10), || {
        child.job.is_running()
    })
    .await;

    crate::watchers::stop_job(&parent, &ctx, JState::Stopped);
    wait_for("parent stopped", Duration::from_secs(10), || {
        parent.job.state() == JState::Stopped
    })
    .await;
    wait_for("child stopped via synthesized edge", Duration::from_secs(10), || {
        child.job.state() == JState::Stopped && !child.job.is_running()
    })
    .await;
    for h in handles {
        h.signal_stop();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn remove_job_drops_its_evaluators() {
    let dir = tempfile::tempdir().unwrap();
    let (ctx, bus) = engine(dir.path());
    let upstream_id = JobId::new();
    let job = job_from_json(
        &format!(
            r#"{{"Name": "leaver", "CronStart": ["@depends"],
                "Dependency": [{{"Dependencies": {{"{}": "success"}}, "Action": "start"}}]}}"#,
            upstream_id
        ),
        dir.path(),
    );
    let handle = register_with_deps(job, &ctx, &bus);
    assert_eq!(bus.evaluator_count(), 1);
    bus.remove_job(handle.job.id);
    assert_eq!(bus.evaluator_count(), 0);
    handle.signal_stop();
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::lifecycle::startup;
use crate::lifecycle::tests::server_in;
use rpeat_core::JState;

async fn wait_for<F: Fn() -> bool>(what: &str, deadline: Duration, cond: F) {
    let end = tokio::time::Instant::now() + deadline;
    while tokio::time::Instant::now() < end {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {}", what);
}

const JOBS: &str = r#"[
  {"Name": "Nightly Batch", "Cmd": "/bin/sh -c exit 0", "CronStart": ["@manual"],
   "User": "ops", "Admin": ["root"], "Permissions": {"start": ["alice"]}},
  {"Name": "other", "Cmd": "/bin/sh -c sleep 30", "CronStart": ["@manual"], "User": "bob"}
]"#;

#[tokio::test(flavor = "multi_thread")]
async fn ops_resolve_by_slug_and_check_permissions() {
    let dir = tempfile::tempdir().unwrap();
    let server = server_in(&dir, JOBS);
    let mut daemon = startup(&server).await.unwrap();
    let service = Service::new(&daemon);

    // owner passes, slug resolution works
    let status = service.status("nightly-batch", "ops").unwrap();
    assert_eq!(status.name, "Nightly Batch");

    // per-action permission map
    assert!(service.start("nightly-batch", "alice", "go").is_ok());
    assert!(matches!(
        service.status("nightly-batch", "alice"),
        Err(ServiceError::Permission)
    ));
    assert!(matches!(
        service.status("nightly-batch", "mallory"),
        Err(ServiceError::Permission)
    ));
    assert!(matches!(
        service.status("no-such", "ops"),
        Err(ServiceError::NotFound(_))
    ));
    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn start_marks_unscheduled_and_records_the_reason() {
    let dir = tempfile::tempdir().unwrap();
    let server = server_in(&dir, JOBS);
    let mut daemon = startup(&server).await.unwrap();
    let handle = daemon.ctx.table.resolve("nightly-batch").unwrap();

    {
        let service = Service::new(&daemon);
        service
            .start("nightly-batch", "ops", "rerun for backfill")
            .unwrap();
    }
    wait_for("manual run", Duration::from_secs(10), || {
        handle.job.lock_run().history.len() == 1
    })
    .await;

    let run = handle.job.lock_run();
    assert_eq!(run.history[0].state, "manualsuccess");
    assert!(run.history[0].unscheduled);
    assert_eq!(run.history[0].reason.user, "ops");
    assert_eq!(run.history[0].reason.comment, "rerun for backfill");
    drop(run);
    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn hold_toggles_and_kills_running_work() {
    let dir = tempfile::tempdir().unwrap();
    let server = server_in(&dir, JOBS);
    let mut daemon = startup(&server).await.unwrap();
    let handle = daemon.ctx.table.resolve("other").unwrap();

    handle.timer.reset(Duration::ZERO);
    wait_for("run started", Duration::from_secs(10), || {
        handle.job.is_running()
    })
    .await;

    {
        let service = Service::new(&daemon);
        let update = service.hold("other", "bob", "maintenance").unwrap();
        assert!(update.hold);
    }
    wait_for("run killed", Duration::from_secs(10), || {
        !handle.job.is_running()
    })
    .await;

    {
        let service = Service::new(&daemon);
        let update = service.hold("other", "bob", "done").unwrap();
        assert!(!update.hold);
        assert_eq!(update.state, JState::Ready);
        assert_eq!(update.retry_attempt, 0);
    }
    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_terminates_a_running_job() {
    let dir = tempfile::tempdir().unwrap();
    let server = server_in(&dir, JOBS);
    let mut daemon = startup(&server).await.unwrap();
    let handle = daemon.ctx.table.resolve("other").unwrap();

    handle.timer.reset(Duration::ZERO);
    wait_for("run started", Duration::from_secs(10), || {
        handle.job.is_running()
    })
    .await;
    {
        let service = Service::new(&daemon);
        service.stop("other", "bob", "halt").await.unwrap();
    }
    wait_for("stopped", Duration::from_secs(10), || {
        handle.job.state() == JState::Stopped && !handle.job.is_running()
    })
    .await;
    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn restart_stops_then_retriggers() {
    let dir = tempfile::tempdir().unwrap();
    let server = server_in(&dir, JOBS);
    let mut daemon = startup(&server).await.unwrap();
    let handle = daemon.ctx.table.resolve("other").unwrap();

    handle.timer.reset(Duration::ZERO);
    wait_for("run started", Duration::from_secs(10), || {
        handle.job.is_running()
    })
    .await;
    {
        let service = Service::new(&daemon);
        service.restart("other", "bob", "bounce").await.unwrap();
    }
    // A fresh run follows the bounce.
    wait_for("restarted", Duration::from_secs(15), || {
        handle.job.is_running()
    })
    .await;
    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn all_jobs_is_acl_filtered() {
    let dir = tempfile::tempdir().unwrap();
    let server = server_in(&dir, JOBS);
    let mut daemon = startup(&server).await.unwrap();
    let service = Service::new(&daemon);

    let ops_view = service.all_jobs("ops", None);
    assert_eq!(ops_view.len(), 1);
    assert_eq!(ops_view[0].name, "Nightly Batch");

    let root_view = service.all_jobs("root", None);
    assert_eq!(root_view.len(), 1, "admin of one job sees that job");

    assert!(service.all_jobs("mallory", None).is_empty());
    drop(service);
    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn log_returns_the_last_lines() {
    let dir = tempfile::tempdir().unwrap();
    let server = server_in(
        &dir,
        r#"[{"Name": "chatty", "User": "ops",
             "Cmd": "/bin/sh -c for i in 1 2 3 4 5; do echo line-$i; done",
             "CronStart": ["@manual"]}]"#,
    );
    let mut daemon = startup(&server).await.unwrap();
    let handle = daemon.ctx.table.resolve("chatty").unwrap();
    handle.timer.reset(Duration::ZERO);
    wait_for("run done", Duration::from_secs(10), || {
        handle.job.lock_run().history.len() == 1
    })
    .await;

    let run_id = handle.job.lock_run().history[0].run_id.clone();
    let service = Service::new(&daemon);
    let logs = service.log("chatty", &run_id, "ops", true, false, 2).unwrap();
    assert_eq!(logs.stdout, "line-4\nline-5\n");
    assert!(logs.stderr.is_empty());

    assert!(matches!(
        service.log("chatty", "not-a-run", "ops", true, true, 5),
        Err(ServiceError::RunNotFound(_))
    ));
    drop(service);
    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn dependency_graph_is_derived() {
    let dir = tempfile::tempdir().unwrap();
    let server = server_in(
        &dir,
        r#"[{"Name": "up", "Cmd": "/bin/sh -c exit 0", "CronStart": ["@manual"], "User": "ops"},
           {"Name": "down", "CronStart": ["@depends"], "User": "ops",
            "Dependency": [{"Dependencies": {"up": "success|end"},
                            "Action": "start", "Condition": "all", "Delay": "100ms"}]}]"#,
    );
    let mut daemon = startup(&server).await.unwrap();
    let service = Service::new(&daemon);

    let graph = service.dependencies("down", "ops").unwrap();
    assert_eq!(graph.name, "down");
    assert_eq!(graph.dependencies.len(), 1);
    let edge = &graph.dependencies[0];
    assert_eq!(edge.action, "start");
    assert_eq!(edge.condition, "all");
    assert_eq!(edge.delay, "100ms");
    assert_eq!(edge.trigger_names["up"], "success|end");
    drop(service);
    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn server_restart_requires_permission_and_signals() {
    let dir = tempfile::tempdir().unwrap();
    let server = server_in(&dir, JOBS);
    let mut daemon = startup(&server).await.unwrap();
    {
        let service = Service::new(&daemon);
        assert!(matches!(
            service.server_restart("mallory").await,
            Err(ServiceError::Permission)
        ));
        service.server_restart("root").await.unwrap();
    }
    assert!(daemon.restart_rx.as_mut().unwrap().recv().await.is_some());
    daemon.shutdown().await;
}

#[test]
fn tail_lines_handles_edges() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log");

    std::fs::write(&path, "a\nb\nc\n").unwrap();
    assert_eq!(tail_lines(&path, 2).unwrap(), "b\nc\n");
    assert_eq!(tail_lines(&path, 10).unwrap(), "a\nb\nc\n");

    std::fs::write(&path, "a\nb\nc").unwrap();
    assert_eq!(tail_lines(&path, 2).unwrap(), "b\nc");

    std::fs::write(&path, "").unwrap();
    assert_eq!(tail_lines(&path, 3).unwrap(), "");

    let big: String = (0..5000).map(|i| format!("row-{}\n", i)).collect();
    std::fs::write(&path, big).unwrap();
    assert_eq!(tail_lines(&path, 2).unwrap(), "row-4998\nrow-4999\n");
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One run of one job.
//!
//! `run_task` is spawned per trigger acceptance: it assembles the
//! environment, opens the per-run log files, places the child in its
//! own process group, and reports the pid and the final status back to
//! the supervisor. A control message received while the child runs
//! overrides the natural exit. Controllers never spawn a process;
//! their run is the lifetime of their children, rolled up through the
//! control channel.

use crate::context::{EngineContext, JobHandle};
use chrono::Utc;
use rpeat_core::dateenv::convert_date;
use rpeat_core::env::{resolve_env, split_command, ResolvedEnv};
use rpeat_core::job::{fmt_elapsed, fmt_instant, JState, Job, JobCfg, JobLog, RunId};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;

/// Final status of one run, as seen by the supervisor's retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStatus {
    /// True when the run ended in a retryable failure.
    pub failed: bool,
    /// Executable missing / permission denied: fail without retrying.
    pub spawn_failed: bool,
}

impl RunStatus {
    pub const OK: Self = Self {
        failed: false,
        spawn_failed: false,
    };
    pub const FAILED: Self = Self {
        failed: true,
        spawn_failed: false,
    };
    pub const SPAWN_FAILED: Self = Self {
        failed: true,
        spawn_failed: true,
    };
}

/// Assemble the job environment: `RPEAT_*` seeds, then each `DateEnv`
/// pair (date-evaluated), then each `Env` pair, resolved in order.
pub fn job_environment(cfg: &JobCfg, job: &Job, run_id: Option<RunId>) -> ResolvedEnv {
    let seed = vec![
        ("RPEAT_TMP".to_string(), cfg.tmp_dir.display().to_string()),
        ("RPEAT_JOBID".to_string(), job.id.to_string()),
        (
            "RPEAT_RUNID".to_string(),
            run_id.map(|r| r.to_string()).unwrap_or_default(),
        ),
        (
            "RPEAT_TIMESTAMP".to_string(),
            Utc::now().timestamp().to_string(),
        ),
    ];

    let mut pairs = Vec::with_capacity(cfg.date_env.len() + cfg.env.len());
    for pair in &cfg.date_env {
        let Some((key, template)) = pair.split_once('=') else {
            continue;
        };
        match convert_date(template, &cfg.timezone, &cfg.calendar_dirs, None) {
            Ok(value) => pairs.push(format!("{}={}", key, value)),
            Err(e) => tracing::warn!(job = %job.id, pair = %pair, error = %e, "DateEnv skipped"),
        }
    }
    pairs.extend(cfg.env.iter().cloned());
    resolve_env(&seed, &pairs)
}

fn stamp_started(job: &Job) {
    let tz = job.lock_cfg().tz();
    let mut run = job.lock_run();
    let now = Utc::now();
    run.started = fmt_instant(now, tz);
    run.started_unix = now.timestamp();
}

fn stamp_finished(job: &Job) {
    let tz = job.lock_cfg().tz();
    let mut run = job.lock_run();
    let now = Utc::now();
    run.prev_stop = fmt_instant(now, tz);
    run.prev_start = run.started.clone();
    if run.started_unix > 0 {
        let elapsed = (now.timestamp() - run.started_unix).max(0) as u64;
        run.elapsed = fmt_elapsed(Duration::from_secs(elapsed));
        run.elapsed_secs = elapsed as i64;
    }
}

/// Execute one run. Always sends exactly one pid and one status.
pub async fn run_task(
    handle: Arc<JobHandle>,
    ctx: EngineContext,
    retry_allowed: bool,
    pid_tx: oneshot::Sender<u32>,
    status_tx: oneshot::Sender<RunStatus>,
) {
    let mut pid_tx = Some(pid_tx);
    let mut status_tx = Some(status_tx);
    let send_pid = |tx: &mut Option<oneshot::Sender<u32>>, pid: u32| {
        if let Some(tx) = tx.take() {
            let _ = tx.send(pid);
        }
    };
    let send_status = |tx: &mut Option<oneshot::Sender<RunStatus>>, s: RunStatus| {
        if let Some(tx) = tx.take() {
            let _ = tx.send(s);
        }
    };

    if handle.job.hold() {
        tracing::info!(job = %handle.job.id, "on hold - not run");
        send_pid(&mut pid_tx, 0);
        send_status(&mut status_tx, RunStatus::OK);
        return;
    }

    let (host, is_controller, cmd) = {
        let cfg = handle.job.lock_cfg();
        (cfg.host.clone(), cfg.is_controller(), cfg.cmd.clone())
    };

    if !crate::host::current_host(&host) {
        tracing::info!(job = %handle.job.id, host = %host, "not scheduled for this host");
        send_pid(&mut pid_tx, 0);
        send_status(&mut status_tx, RunStatus::OK);
        return;
    }

    if is_controller {
        run_controller(&handle, &ctx, &mut pid_tx, &mut status_tx).await;
        return;
    }

    let run_id = RunId::new();
    {
        let mut run = handle.job.lock_run();
        run.run_id = run_id;
    }

    let Some(cmd) = cmd else {
        // Nothing to execute: the trigger itself is the work.
        stamp_started(&handle.job);
        ctx.set_state(&handle, JState::Running);
        ctx.emit(&handle.job);
        send_pid(&mut pid_tx, 0);
        stamp_finished(&handle.job);
        finish_natural(&handle, &ctx, 0, retry_allowed);
        send_status(&mut status_tx, RunStatus::OK);
        return;
    };

    // Environment assembly. The command itself runs verbatim -- its
    // shell resolves variables from the environment we pass; the
    // expanded form is kept only for display and history.
    let env = {
        let cfg = handle.job.lock_cfg();
        job_environment(&cfg, &handle.job, Some(run_id))
    };
    let (cmd_eval, missing) = rpeat_core::env::expand(&cmd, |name| {
        env.get(name).or_else(|| std::env::var(name).ok())
    });
    if !missing.is_empty() {
        tracing::warn!(job = %handle.job.id, vars = ?missing, "undefined variables in Cmd");
    }
    {
        handle.job.lock_run().cmd_eval = cmd_eval;
    }
    let Some((path, args)) = split_command(&cmd) else {
        spawn_failed(&handle, &ctx, "empty command", &mut status_tx, send_status);
        send_pid(&mut pid_tx, 0);
        return;
    };

    // Per-run log files.
    let RunLogs {
        stdout: stdout_file,
        stderr: stderr_file,
        stdout_path,
        stderr_path,
    } = match open_log_files(&handle, run_id, &env) {
        Ok(l) => l,
        Err(e) => {
            spawn_failed(&handle, &ctx, &e.to_string(), &mut status_tx, send_status);
            send_pid(&mut pid_tx, 0);
            return;
        }
    };
    {
        let mut run = handle.job.lock_run();
        run.stdout_file = stdout_path.clone();
        run.stderr_file = stderr_path.clone();
    }

    let mut command = tokio::process::Command::new(&path);
    command.args(&args);
    for (k, v) in &env.vars {
        command.env(k, v);
    }
    // Own process group so the kill paths can take the whole tree.
    command.process_group(0);
    if ctx.tee_stdio {
        command.stdout(Stdio::piped()).stderr(Stdio::piped());
    } else {
        command.stdout(Stdio::from(stdout_file));
        command.stderr(Stdio::from(stderr_file));
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            // One synthetic line so the log explains the failure.
            append_line(
                &stderr_path,
                &format!(
                    "[ rpeat ] unable to create process (possibly missing shell e.g. /bin/sh -c): {}",
                    e
                ),
            );
            spawn_failed(&handle, &ctx, &e.to_string(), &mut status_tx, send_status);
            send_pid(&mut pid_tx, 0);
            return;
        }
    };

    if ctx.tee_stdio {
        if let Some(out) = child.stdout.take() {
            tokio::spawn(tee_stream(out, stdout_path.clone(), false));
        }
        if let Some(err) = child.stderr.take() {
            tokio::spawn(tee_stream(err, stderr_path.clone(), true));
        }
    }

    let pid = child.id().unwrap_or(0);
    {
        let mut run = handle.job.lock_run();
        run.pid = pid;
        run.is_running = true;
        run.restarting = false;
    }
    stamp_started(&handle.job);
    ctx.set_state(&handle, JState::Running);
    ctx.emit(&handle.job);
    send_pid(&mut pid_tx, pid);

    let status = child.wait().await;
    let exit_code = match status {
        Ok(s) => s.code().unwrap_or(-1),
        Err(e) => {
            tracing::warn!(job = %handle.job.id, error = %e, "wait failed");
            -1
        }
    };

    {
        let mut run = handle.job.lock_run();
        run.is_running = false;
        run.pid = 0;
    }
    stamp_finished(&handle.job);
    schedule_log_purge(&handle, &ctx, stdout_path, stderr_path);

    // A control message delivered during execution overrides the
    // natural exit.
    let pending_ctl = handle.ctl_rx.lock().await.try_recv().ok();
    if let Some(ctl) = pending_ctl {
        handle.job.lock_run().exit_code = exit_code;
        if ctl.code == JState::Restart {
            tracing::info!(job = %handle.job.id, "restart triggered");
            send_status(&mut status_tx, RunStatus::OK);
            ctx.set_state(&handle, JState::End);
            ctx.emit(&handle.job);
            tokio::time::sleep(Duration::from_secs(1)).await;
            handle.timer.reset(Duration::ZERO);
            return;
        }
        ctx.set_state(&handle, ctl.code);
        ctx.emit(&handle.job);
        send_status(&mut status_tx, RunStatus::OK);
        return;
    }

    finish_natural(&handle, &ctx, exit_code, retry_allowed);
    let failed = matches!(
        handle.job.state(),
        JState::Failed | JState::RetryFailed
    );
    send_status(
        &mut status_tx,
        if failed { RunStatus::FAILED } else { RunStatus::OK },
    );
}

/// Map a natural exit into a state: the `ExitState` override table
/// first, then success/manualsuccess vs retryfailed/failed.
fn finish_natural(handle: &Arc<JobHandle>, ctx: &EngineContext, exit_code: i32, retry_allowed: bool) {
    let override_state = handle.job.lock_cfg().exit_state.get(&exit_code).copied();
    let budget = handle.job.lock_cfg().retry;
    let (unscheduled, attempt) = {
        let run = handle.job.lock_run();
        (run.unscheduled, run.retry_attempt)
    };
    handle.job.lock_run().exit_code = exit_code;

    let state = match override_state {
        Some(state) => state,
        None if exit_code == 0 => {
            if unscheduled {
                JState::ManualSuccess
            } else {
                JState::Success
            }
        }
        None => {
            if retry_allowed && attempt < budget {
                JState::RetryFailed
            } else {
                JState::Failed
            }
        }
    };
    ctx.set_state(handle, state);
    ctx.emit(&handle.job);
    {
        let mut run = handle.job.lock_run();
        run.unscheduled = false;
        run.reason = rpeat_core::job::Reason::default();
    }
}

fn spawn_failed(
    handle: &Arc<JobHandle>,
    ctx: &EngineContext,
    reason: &str,
    status_tx: &mut Option<oneshot::Sender<RunStatus>>,
    send_status: impl Fn(&mut Option<oneshot::Sender<RunStatus>>, RunStatus),
) {
    tracing::error!(job = %handle.job.id, reason, "failed to start");
    stamp_started(&handle.job);
    stamp_finished(&handle.job);
    {
        let mut run = handle.job.lock_run();
        run.pid = 0;
        run.is_running = false;
        run.exit_code = -1;
    }
    ctx.set_state(handle, JState::Failed);
    ctx.emit(&handle.job);
    send_status(status_tx, RunStatus::SPAWN_FAILED);
}

fn append_line(path: &std::path::Path, line: &str) {
    use std::io::Write;
    if let Ok(mut f) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(f, "{}", line);
    }
}

/// Controller branch: no process; the run is the children's lifetime.
async fn run_controller(
    handle: &Arc<JobHandle>,
    ctx: &EngineContext,
    pid_tx: &mut Option<oneshot::Sender<u32>>,
    status_tx: &mut Option<oneshot::Sender<RunStatus>>,
) {
    stamp_started(&handle.job);
    {
        let mut run = handle.job.lock_run();
        run.nfailures = 0;
        run.is_running = true;
    }
    ctx.set_state(handle, JState::Running);
    ctx.emit(&handle.job);
    if let Some(tx) = pid_tx.take() {
        let _ = tx.send(0);
    }

    // Block until a rollup evaluator (or a stop) completes the run.
    let ctl = handle.ctl_rx.lock().await.recv().await;
    {
        let mut run = handle.job.lock_run();
        run.is_running = false;
    }
    stamp_finished(&handle.job);
    if let Some(ctl) = ctl {
        ctx.set_state(handle, ctl.code);
        if matches!(ctl.code, JState::Stopped | JState::Failed) {
            handle.job.set_hold(true);
        }
    }
    ctx.emit(&handle.job);
    if let Some(tx) = status_tx.take() {
        let _ = tx.send(RunStatus::OK);
    }
}

struct RunLogs {
    stdout: std::fs::File,
    stderr: std::fs::File,
    stdout_path: std::path::PathBuf,
    stderr_path: std::path::PathBuf,
}

/// Open the run's log pair: the configured paths (append or truncate)
/// or fresh `tmp/<job>/<run>.stdout|stderr` files.
fn open_log_files(
    handle: &Arc<JobHandle>,
    run_id: RunId,
    env: &ResolvedEnv,
) -> std::io::Result<RunLogs> {
    let cfg = handle.job.lock_cfg();
    let job_dir = cfg.tmp_dir.join(handle.job.id.to_string());

    let open = |configured: &str, suffix: &str| -> std::io::Result<(std::fs::File, std::path::PathBuf)> {
        if configured.is_empty() {
            std::fs::create_dir_all(&job_dir)?;
            let path = job_dir.join(format!("{}.{}", run_id, suffix));
            Ok((std::fs::File::create(&path)?, path))
        } else {
            let (expanded, _) = rpeat_core::env::expand(configured, |name| {
                env.get(name).or_else(|| std::env::var(name).ok())
            });
            let path = std::path::PathBuf::from(expanded);
            let file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .append(cfg.logging.append)
                .truncate(!cfg.logging.append)
                .open(&path)?;
            Ok((file, path))
        }
    };

    let (stdout, stdout_path) = open(&cfg.logging.stdout_file, "stdout")?;
    let (stderr, stderr_path) = open(&cfg.logging.stderr_file, "stderr")?;
    Ok(RunLogs {
        stdout,
        stderr,
        stdout_path,
        stderr_path,
    })
}

/// Queue this run's log pair for retention removal and arm the purge.
fn schedule_log_purge(
    handle: &Arc<JobHandle>,
    ctx: &EngineContext,
    stdout_path: std::path::PathBuf,
    stderr_path: std::path::PathBuf,
) {
    let Some(purge) = handle.job.lock_cfg().log_purge() else {
        return;
    };
    let files = vec![stdout_path, stderr_path];
    {
        let mut run = handle.job.lock_run();
        run.purge_queue.push(JobLog {
            prev_stop: Utc::now(),
            files: files.clone(),
        });
    }
    let handle = handle.clone();
    let ctx = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(purge).await;
        tracing::info!(job = %handle.job.id, files = ?files, "log retention cleanup");
        for f in &files {
            if let Err(e) = std::fs::remove_file(f) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(file = %f.display(), error = %e, "cannot remove log");
                }
            }
        }
        {
            let mut run = handle.job.lock_run();
            run.purge_queue.retain(|l| l.files != files);
        }
        if let Err(e) = rpeat_storage::save_job_snapshot(
            &ctx.home,
            &rpeat_storage::JobSnapshot::capture(&handle.job),
        ) {
            tracing::warn!(job = %handle.job.id, error = %e, "snapshot save failed");
        }
    });
}

/// Mirror a child stream into its log file and the server's stdio.
async fn tee_stream(
    mut src: impl tokio::io::AsyncRead + Unpin,
    path: std::path::PathBuf,
    to_stderr: bool,
) {
    let Ok(mut file) = tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await
    else {
        return;
    };
    let mut buf = [0u8; 8192];
    loop {
        match src.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let _ = file.write_all(&buf[..n]).await;
                if to_stderr {
                    let _ = tokio::io::stderr().write_all(&buf[..n]).await;
                } else {
                    let _ = tokio::io::stdout().write_all(&buf[..n]).await;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;

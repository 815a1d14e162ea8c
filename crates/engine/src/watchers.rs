// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kill paths and per-run deadline watchers.
//!
//! `end_at_time` is the one-shot task armed per run for max-duration,
//! cron-end and cron-restart; it terminates the run's process group
//! (via the shutdown command when one is configured) and pushes the
//! corresponding control message. `stop_job`/`shutdown_job` are the
//! same paths driven by the control API and dependency actions.

use crate::context::{EngineContext, JobHandle};
use chrono::Utc;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use rpeat_core::env::split_command;
use rpeat_core::job::{fmt_elapsed, fmt_instant, Ctl, JState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Map the configured shutdown signal name; group kills default to
/// SIGKILL.
pub fn shutdown_signal(name: &str) -> Signal {
    match name {
        "SIGINT" | "Interrupt" => Signal::SIGINT,
        _ => Signal::SIGKILL,
    }
}

/// Kill a run's whole process group. Children are spawned as group
/// leaders, so the group id is the child pid.
pub fn kill_process_group(pid: u32, sig: Signal) {
    if pid == 0 {
        return;
    }
    if let Err(e) = nix::sys::signal::killpg(Pid::from_raw(pid as i32), sig) {
        tracing::warn!(pid, error = %e, "process group kill failed");
    }
}

/// Record stop bookkeeping after a kill path.
fn stamp_stopped(handle: &JobHandle) {
    let tz = handle.job.lock_cfg().tz();
    let mut run = handle.job.lock_run();
    let now = Utc::now();
    run.prev_stop = fmt_instant(now, tz);
    if run.started_unix > 0 {
        let elapsed = (now.timestamp() - run.started_unix).max(0) as u64;
        run.elapsed = fmt_elapsed(Duration::from_secs(elapsed));
        run.elapsed_secs = elapsed as i64;
    }
    run.prev_start = run.started.clone();
    run.pid = 0;
}

/// One-shot deadline watcher. Returns true iff the deadline fired (as
/// opposed to being cancelled when the run finished first).
pub async fn end_at_time(
    deadline: Instant,
    handle: Arc<JobHandle>,
    ctx: EngineContext,
    caller: &'static str,
    cancel: oneshot::Receiver<()>,
) -> bool {
    tokio::select! {
        _ = cancel => {
            tracing::debug!(job = %handle.job.id, caller, "watcher cancelled");
            return false;
        }
        _ = tokio::time::sleep_until(deadline) => {}
    }
    tracing::info!(job = %handle.job.id, caller, "run deadline reached");

    let shutdown_cmd = handle.job.lock_cfg().shutdown_cmd.clone();
    if !shutdown_cmd.is_empty() {
        shutdown_job(&handle, &ctx, JState::End).await;
        return true;
    }

    let pid = handle.job.pid();
    if pid == 0 {
        return true;
    }
    let _ = handle.ctl_tx.try_send(Ctl {
        killed: true,
        code: JState::End,
    });
    stamp_stopped(&handle);
    let sig = shutdown_signal(&handle.job.lock_cfg().shutdown_sig);
    kill_process_group(pid, sig);
    handle.job.set_retry_attempt(0);
    true
}

/// Terminate a run from outside (control op, dependency action,
/// server shutdown) with the given final code.
pub fn stop_job(handle: &Arc<JobHandle>, ctx: &EngineContext, code: JState) {
    let pid = handle.job.pid();
    let (dependent, controller, sig) = {
        let cfg = handle.job.lock_cfg();
        (
            cfg.cron_is_dependent(),
            cfg.is_controller(),
            shutdown_signal(&cfg.shutdown_sig),
        )
    };
    tracing::info!(job = %handle.job.id, pid, code = %code, "stop requested");

    if pid == 0 && dependent {
        return;
    }
    if !dependent {
        handle.job.set_hold(true);
    }
    if !controller && pid != 0 {
        let _ = handle.ctl_tx.try_send(Ctl { killed: true, code });
    }
    if controller {
        // Controllers have no process; their run completes through the
        // control channel.
        let _ = handle.ctl_tx.try_send(Ctl { killed: true, code });
    }

    // A job parked in retry-wait has no process to kill; flip it
    // directly and let the timer path notice the hold.
    if handle.job.state() == JState::RetryWait {
        handle.job.set_hold(true);
        let _ = handle.job.set_state(code);
        handle.job.set_retry_attempt(0);
        handle.timer.reset(Duration::ZERO);
        ctx.emit(&handle.job);
    }

    stamp_stopped(handle);
    kill_process_group(pid, sig);
    if code == JState::End {
        handle.job.set_hold(false);
    }
}

/// Graceful variant: run the configured shutdown command, then push
/// the control message.
pub async fn shutdown_job(handle: &Arc<JobHandle>, ctx: &EngineContext, code: JState) {
    let (pid, dependent) = {
        (
            handle.job.pid(),
            handle.job.lock_cfg().cron_is_dependent(),
        )
    };
    tracing::info!(job = %handle.job.id, code = %code, "shutdown command path");
    if pid == 0 && dependent {
        return;
    }

    if let Some((path, args, env)) = evaluated_shutdown_cmd(handle) {
        let mut command = tokio::process::Command::new(&path);
        command.args(&args);
        for (k, v) in env {
            command.env(k, v);
        }
        match command.status().await {
            Ok(status) if !status.success() => {
                tracing::warn!(job = %handle.job.id, %status, "shutdown command failed");
            }
            Err(e) => tracing::warn!(job = %handle.job.id, error = %e, "shutdown command failed"),
            _ => {}
        }
    }

    let _ = handle.ctl_tx.try_send(Ctl { killed: true, code });
    if code == JState::Stopped {
        handle.job.set_hold(true);
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    let _ = handle.job.set_state(JState::Hold);
    ctx.emit(&handle.job);
}

/// Split the shutdown command and resolve the environment it runs in.
/// Like the main command, the line itself runs verbatim; its shell
/// resolves references from the job environment.
fn evaluated_shutdown_cmd(handle: &JobHandle) -> Option<(String, Vec<String>, Vec<(String, String)>)> {
    let cfg = handle.job.lock_cfg();
    if cfg.shutdown_cmd.is_empty() {
        return None;
    }
    let resolved = crate::run::job_environment(&cfg, &handle.job, None);
    let (path, args) = split_command(&cfg.shutdown_cmd)?;
    Some((path, args, resolved.vars))
}

#[cfg(test)]
#[path = "watchers_tests.rs"]
mod tests;

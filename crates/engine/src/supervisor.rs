// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-job supervisor: one cooperative task per enabled job.
//!
//! The outer loop waits for a trigger (timer, tick-drift detection, or
//! stop), recomputes the next fire, spawns the run task, arms the
//! end/restart/max-duration watchers, then walks the bounded retry
//! loop with configured backoff. The run-lock is held across the whole
//! run/retry region so reload mutation never races an execution.

use crate::context::{EngineContext, JobHandle};
use crate::run::{run_task, RunStatus};
use crate::watchers::{end_at_time, kill_process_group, shutdown_signal};
use chrono::Utc;
use rpeat_core::cron::next_cron_start;
use rpeat_core::job::{JState, Job};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;

/// Why `wait_for_trigger` returned.
enum Trigger {
    /// The job's timer fired.
    Timer,
    /// Wall-clock drift between ticks exceeded the threshold.
    Missed,
}

/// Register a job with the engine: insert into the table and launch
/// its supervisor. Returns the handle for control paths.
pub fn register_job(job: Arc<Job>, ctx: &EngineContext) -> Arc<JobHandle> {
    let handle = JobHandle::new(job);
    ctx.table.insert(handle.clone());
    let ctx = ctx.clone();
    let sup = handle.clone();
    tokio::spawn(async move {
        supervise(sup, ctx).await;
    });
    handle
}

/// Block until the next trigger. Selects over the drift ticker, the
/// job timer, and the stop channel; stop unwinds the supervisor.
async fn wait_for_trigger(
    handle: &Arc<JobHandle>,
    timer_rx: &mut watch::Receiver<Instant>,
    stop_rx: &mut watch::Receiver<bool>,
) -> Result<Trigger, ()> {
    let (tick_secs, threshold_secs, hold_on_missed) = {
        let cfg = handle.job.lock_cfg();
        (
            cfg.tick_interval_secs.max(1),
            cfg.tick_missed_threshold_secs,
            cfg.hold_on_missed,
        )
    };
    tracing::debug!(
        job = %handle.job.id,
        state = %handle.job.state(),
        "waiting for trigger"
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(tick_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // completes immediately
    let mut last_tick = Utc::now().timestamp();

    loop {
        let deadline = *timer_rx.borrow_and_update();
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now().timestamp();
                if now - last_tick > (tick_secs + threshold_secs) as i64 {
                    // The process lost time (suspend, clock jump):
                    // surface a missed warning instead of firing late.
                    if hold_on_missed {
                        handle.job.set_hold(true);
                    }
                    let _ = handle.job.set_state(JState::MissedWarning);
                    return Ok(Trigger::Missed);
                }
                last_tick = now;
            }
            _ = tokio::time::sleep_until(deadline) => {
                return Ok(Trigger::Timer);
            }
            changed = timer_rx.changed() => {
                if changed.is_err() {
                    return Err(());
                }
                // Deadline moved; loop with the new value.
            }
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    if handle.job.is_running() {
                        tracing::info!(job = %handle.job.id, "stopped while running");
                        handle.job.set_hold(true);
                        let _ = handle.job.set_state(JState::Stopped);
                    }
                    return Err(());
                }
            }
        }
    }
}

/// A cancel guard for one armed watcher.
struct Armed {
    cancel: Option<oneshot::Sender<()>>,
}

impl Armed {
    fn disarm(mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}

fn arm_watcher(
    deadline: Instant,
    handle: &Arc<JobHandle>,
    ctx: &EngineContext,
    caller: &'static str,
) -> Armed {
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let handle = handle.clone();
    let ctx = ctx.clone();
    tokio::spawn(async move {
        end_at_time(deadline, handle, ctx, caller, cancel_rx).await;
    });
    Armed {
        cancel: Some(cancel_tx),
    }
}

/// Restart watcher: when the deadline fires the run is ended and the
/// timer re-armed so the job starts right back up.
fn arm_restart_watcher(deadline: Instant, handle: &Arc<JobHandle>, ctx: &EngineContext) -> Armed {
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let handle = handle.clone();
    let ctx = ctx.clone();
    tokio::spawn(async move {
        if end_at_time(deadline, handle.clone(), ctx, "cronrestart", cancel_rx).await {
            tokio::time::sleep(Duration::from_secs(1)).await;
            handle.job.set_hold(false);
            handle.timer.reset(Duration::ZERO);
        }
    });
    Armed {
        cancel: Some(cancel_tx),
    }
}

/// Spawn one run and wait for its pid.
fn spawn_run(
    handle: &Arc<JobHandle>,
    ctx: &EngineContext,
    retry_allowed: bool,
) -> (oneshot::Receiver<u32>, oneshot::Receiver<RunStatus>) {
    let (pid_tx, pid_rx) = oneshot::channel();
    let (status_tx, status_rx) = oneshot::channel();
    tokio::spawn(run_task(
        handle.clone(),
        ctx.clone(),
        retry_allowed,
        pid_tx,
        status_tx,
    ));
    (pid_rx, status_rx)
}

/// The supervisor body. Returns when the stop channel fires.
pub async fn supervise(handle: Arc<JobHandle>, ctx: EngineContext) {
    let mut timer_rx = handle.timer.subscribe();
    let mut stop_rx = handle.stop.subscribe();

    // Initial arm: next fire from the start schedule.
    {
        let cfg = handle.job.lock_cfg();
        let (d, next) = next_cron_start(&cfg.cron_start, None);
        drop(cfg);
        handle.job.set_next_start(next);
        handle.timer.reset(d);
    }
    // Restored purge queues resume their retention countdowns.
    resume_log_purges(&handle, &ctx);

    let mut retry: u32 = 0;
    loop {
        handle.job.set_retry_attempt(retry);
        if wait_for_trigger(&handle, &mut timer_rx, &mut stop_rx)
            .await
            .is_err()
        {
            tracing::info!(job = %handle.job.id, "supervisor stopped");
            return;
        }

        let run_guard = handle.run_lock.lock().await;
        handle.timer.disarm();

        let (d, next, retry_budget, concurrent, every, max_duration, has_end, has_restart) = {
            let cfg = handle.job.lock_cfg();
            let (d, next) = next_cron_start(&cfg.cron_start, None);
            (
                d,
                next,
                cfg.retry,
                cfg.start_rule.concurrent(),
                cfg.cron_is_every(),
                cfg.max_duration(),
                !cfg.cron_end.is_empty(),
                cfg.cron_restart.is_some(),
            )
        };
        handle.job.set_next_start(next);
        tracing::info!(
            job = %handle.job.id,
            next = %handle.job.lock_run().next_start,
            "next start scheduled"
        );

        if handle.job.lock_run().updating {
            handle.timer.reset(d);
            handle.job.lock_run().updating = false;
            ctx.emit(&handle.job);
            drop(run_guard);
            continue;
        }

        if handle.job.hold() {
            tracing::info!(job = %handle.job.id, "trigger ignored - job on hold");
            handle.timer.reset(d);
            ctx.set_state(&handle, JState::MissedWarning);
            ctx.emit(&handle.job);
            drop(run_guard);
            continue;
        }

        let (pid_rx, status_rx) = spawn_run(&handle, &ctx, retry_budget > 0);
        if concurrent || every {
            // Non-blocking reschedule: the next run may overlap.
            handle.timer.reset(d);
        }
        let _pid = pid_rx.await.unwrap_or(0);

        // Arm the per-run deadline watchers now that the run is live.
        let mut armed: Vec<Armed> = Vec::new();
        if let Some(maxd) = max_duration {
            if !concurrent {
                armed.push(arm_watcher(
                    Instant::now() + maxd,
                    &handle,
                    &ctx,
                    "maxduration",
                ));
            }
        }
        if has_end {
            let cfg = handle.job.lock_cfg();
            let (e, _) = next_cron_start(&cfg.cron_end, None);
            drop(cfg);
            armed.push(arm_watcher(Instant::now() + e, &handle, &ctx, "cronend"));
        }
        if has_restart {
            let wait = {
                let cfg = handle.job.lock_cfg();
                cfg.cron_restart
                    .as_ref()
                    .and_then(|c| c.next_start(None).ok())
                    .map(|(r, _)| r)
            };
            if let Some(r) = wait {
                armed.push(arm_restart_watcher(Instant::now() + r, &handle, &ctx));
            }
        }

        let mut status = status_rx.await.unwrap_or(RunStatus::FAILED);
        for a in armed.drain(..) {
            a.disarm();
        }

        if !concurrent && !every {
            let cfg = handle.job.lock_cfg();
            let (d, next) = next_cron_start(&cfg.cron_start, None);
            drop(cfg);
            handle.timer.reset(d);
            handle.job.set_next_start(next);
            ctx.emit(&handle.job);
        }

        if handle.job.hold() {
            drop(run_guard);
            continue;
        }

        // Bounded retry with configured backoff.
        loop {
            handle.job.set_retry_attempt(retry);
            if !status.failed || handle.job.hold() {
                break;
            }
            if status.spawn_failed {
                // Executable problems do not heal between attempts.
                retry = retry_budget;
            }
            if retry < retry_budget {
                handle.timer.disarm();
                let restarting = handle.job.lock_run().restarting;
                if !restarting {
                    retry += 1;
                    handle.job.set_retry_attempt(retry);
                    let wait = handle.job.lock_cfg().retry_wait_for(retry);
                    ctx.set_state(&handle, JState::RetryWait);
                    handle.timer.reset(wait);
                    ctx.emit(&handle.job);
                    if wait_for_trigger(&handle, &mut timer_rx, &mut stop_rx)
                        .await
                        .is_err()
                    {
                        return;
                    }
                    if handle.job.hold() {
                        break;
                    }
                    let _ = handle.job.set_state(JState::Retrying);
                } else {
                    tracing::info!(job = %handle.job.id, "restarting - retry counter reset");
                    retry = 0;
                    handle.job.set_retry_attempt(0);
                    handle.job.lock_run().restarting = false;
                    ctx.emit(&handle.job);
                }

                let (pid_rx, status_rx) = spawn_run(&handle, &ctx, true);
                let _ = pid_rx.await;
                let mut retry_armed: Option<Armed> = None;
                if let Some(maxd) = handle.job.lock_cfg().max_duration() {
                    retry_armed = Some(arm_watcher(
                        Instant::now() + maxd,
                        &handle,
                        &ctx,
                        "maxduration(retry)",
                    ));
                }
                status = status_rx.await.unwrap_or(RunStatus::FAILED);
                if let Some(a) = retry_armed {
                    a.disarm();
                }

                if !status.failed {
                    let cfg = handle.job.lock_cfg();
                    let (d, next) = next_cron_start(&cfg.cron_start, None);
                    drop(cfg);
                    handle.timer.reset(d);
                    handle.job.set_next_start(next);
                    retry = 0;
                    handle.job.set_retry_attempt(0);
                    ctx.emit(&handle.job);
                    break;
                }
                continue;
            }

            // Budget exhausted: terminal failure for this cycle.
            handle.timer.disarm();
            let pid = handle.job.pid();
            if pid != 0 {
                let sig = shutdown_signal(&handle.job.lock_cfg().shutdown_sig);
                kill_process_group(pid, sig);
            }
            let dependent = handle.job.lock_cfg().cron_is_dependent();
            if !dependent {
                handle.job.set_hold(true);
            }
            ctx.set_state(&handle, JState::Failed);
            let cfg = handle.job.lock_cfg();
            let (d, next) = next_cron_start(&cfg.cron_start, None);
            drop(cfg);
            handle.timer.reset(d);
            handle.job.set_next_start(next);
            retry = 0;
            handle.job.set_retry_attempt(0);
            ctx.emit(&handle.job);
            break;
        }
        drop(run_guard);
    }
}

/// Re-arm retention countdowns for log pairs restored from a snapshot.
fn resume_log_purges(handle: &Arc<JobHandle>, ctx: &EngineContext) {
    let Some(purge) = handle.job.lock_cfg().log_purge() else {
        return;
    };
    let queue = handle.job.lock_run().purge_queue.clone();
    for entry in queue {
        let due = entry.prev_stop + chrono::Duration::from_std(purge).unwrap_or_default();
        let wait = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let handle = handle.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            for f in &entry.files {
                if let Err(e) = std::fs::remove_file(f) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(file = %f.display(), error = %e, "cannot remove log");
                    }
                }
            }
            let mut run = handle.job.lock_run();
            run.purge_queue.retain(|l| l.files != entry.files);
            drop(run);
            ctx.emit(&handle.job);
        });
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;

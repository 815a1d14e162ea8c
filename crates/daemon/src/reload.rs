// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hot reload.
//!
//! An external `touch` of the pidfile re-parses the job files and
//! diffs the proposed set against the running one: jobs present in
//! both are mutated in place under their run-lock (no in-flight run is
//! dropped; observers see a single updating pulse), new jobs are
//! added, vanished jobs are stopped and removed.

use crate::config::ServerConfig;
use crate::lifecycle::{add_job, Daemon, LifecycleError};
use notify::Watcher;
use rpeat_core::config::{load_config, parse_schedules, spec_equal};
use rpeat_core::cron::next_cron_start;
use rpeat_core::JobId;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Watch the pidfile; every metadata/content change requests a reload.
pub fn watch_pidfile(pidfile: PathBuf) -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(4);
    std::thread::spawn(move || {
        let (event_tx, event_rx) = std::sync::mpsc::channel();
        let mut watcher = match notify::recommended_watcher(event_tx) {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, "cannot create pidfile watcher");
                return;
            }
        };
        if let Err(e) = watcher.watch(&pidfile, notify::RecursiveMode::NonRecursive) {
            warn!(pidfile = %pidfile.display(), error = %e, "cannot watch pidfile");
            return;
        }
        for event in event_rx {
            match event {
                Ok(event)
                    if matches!(
                        event.kind,
                        notify::EventKind::Modify(_) | notify::EventKind::Access(_)
                    ) =>
                {
                    if tx.blocking_send(()).is_err() {
                        return;
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "pidfile watcher error"),
            }
        }
    });
    rx
}

/// Re-parse the files and apply the three-way diff.
pub async fn reload_jobs(daemon: &mut Daemon, server: &ServerConfig) -> Result<(), LifecycleError> {
    info!(files = ?server.jobs_files, "reloading job files");
    let proposed = load_config(&server.jobs_files, &server.load_defaults())?;
    for warning in &proposed.warnings {
        warn!("{}", warning);
    }

    let current: Vec<JobId> = daemon.ctx.table.order();
    let proposed_ids: Vec<JobId> = proposed.order.clone();
    let by_id: HashMap<JobId, &rpeat_core::config::LoadedJob> =
        proposed.jobs.iter().map(|j| (j.id, j)).collect();

    // Present in both: mutate in place when the reloadable subset
    // changed.
    for id in current.iter().filter(|id| proposed_ids.contains(*id)) {
        let Some(handle) = daemon.ctx.table.get(*id) else {
            continue;
        };
        let incoming = by_id[id];
        let unchanged = {
            let cfg = handle.job.lock_cfg();
            spec_equal(&cfg, &incoming.cfg)
        };
        if unchanged {
            info!(job = %id, "no change; not updated");
            continue;
        }

        info!(job = %id, name = %incoming.cfg.name, "updating job in place");
        let _guard = handle.run_lock.lock().await;
        handle.job.lock_run().updating = true;
        daemon.ctx.emit(&handle.job);

        {
            let mut cfg = handle.job.lock_cfg();
            let new = &incoming.cfg;
            cfg.name = new.name.clone();
            cfg.description = new.description.clone();
            cfg.comment = new.comment.clone();
            cfg.tags = new.tags.clone();
            cfg.group = new.group.clone();
            cfg.inherits = new.inherits.clone();
            cfg.timezone = new.timezone.clone();
            cfg.calendar = new.calendar.clone();
            cfg.calendar_dirs = new.calendar_dirs.clone();
            cfg.rollback = new.rollback;
            cfg.require_cal = new.require_cal;
            cfg.jitter = new.jitter;
            cfg.cron_start_spec = new.cron_start_spec.clone();
            cfg.cron_end_spec = new.cron_end_spec.clone();
            cfg.cron_restart_spec = new.cron_restart_spec.clone();
            cfg.start_day = new.start_day.clone();
            cfg.start_time = new.start_time.clone();
            cfg.end_day = new.end_day.clone();
            cfg.end_time = new.end_time.clone();
            cfg.cmd = new.cmd.clone();
            cfg.shutdown_cmd = new.shutdown_cmd.clone();
            cfg.shutdown_sig = new.shutdown_sig.clone();
            cfg.env = new.env.clone();
            cfg.date_env = new.date_env.clone();
            cfg.alerts = new.alerts.clone();
            cfg.dependencies = new.dependencies.clone();
            cfg.jobs_control = new.jobs_control.clone();
            cfg.retry = new.retry;
            cfg.retry_wait = new.retry_wait.clone();
            cfg.max_duration = new.max_duration.clone();
            cfg.tmp_dir = new.tmp_dir.clone();
            cfg.logging = new.logging.clone();
            cfg.host = new.host.clone();
            cfg.user = new.user.clone();
            cfg.permissions = new.permissions.clone();
            cfg.admin = new.admin.clone();
            if let Err(e) = parse_schedules(&mut cfg) {
                warn!(job = %id, error = %e, "schedule re-parse failed; keeping old crons");
            }
        }

        // Evaluators follow the new dependency set.
        daemon.dep_bus.remove_job(*id);
        for dep in incoming.cfg.dependencies.clone() {
            daemon
                .dep_bus
                .add_evaluator(handle.clone(), dep, daemon.ctx.clone());
        }

        handle.job.lock_run().updating = false;
        let (d, next) = {
            let cfg = handle.job.lock_cfg();
            next_cron_start(&cfg.cron_start, None)
        };
        handle.job.set_next_start(next);
        handle.timer.reset(d);
        daemon.ctx.emit(&handle.job);
        info!(job = %id, "job update complete");
    }

    // Only in the new set: add.
    for id in proposed_ids.iter().filter(|id| !current.contains(*id)) {
        let job = by_id[id];
        if job.disabled {
            continue;
        }
        info!(job = %id, name = %job.cfg.name, "adding job");
        add_job(job, &daemon.ctx, &daemon.dep_bus, !server.clean);
    }

    // Only in the old set: stop and remove.
    for id in current.iter().filter(|id| !proposed_ids.contains(*id)) {
        info!(job = %id, "removing job");
        daemon.dep_bus.remove_job(*id);
        if let Some(handle) = daemon.ctx.table.remove(*id) {
            handle.signal_stop();
        }
    }

    info!("all jobs updated");
    Ok(())
}

#[cfg(test)]
#[path = "reload_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle: startup and shutdown.
//!
//! Startup loads the job set, restores persisted state, registers
//! dependency evaluators and supervisors, starts the buses, and
//! writes the pidfile. Shutdown stops running children (shutdown
//! command when configured, group-kill otherwise), signals every
//! supervisor, and removes the pidfile.

use crate::config::ServerConfig;
use rpeat_core::alert::AlertEnvelope;
use rpeat_core::config::{load_config, ConfigError, LoadedJob};
use rpeat_core::job::{JState, Job};
use rpeat_engine::{
    register_job, stop_job, DependencyBus, EngineContext, JobHandle, UpdateBus,
};
use rpeat_storage::{load_job_snapshot, restore_into, save_server_state, ServerState, StorageError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("cannot write pidfile {path}: {source}")]
    Pidfile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The assembled server.
pub struct Daemon {
    pub ctx: EngineContext,
    pub dep_bus: DependencyBus,
    pub update_bus: UpdateBus,
    pub pidfile: PathBuf,
    /// Control-API requests for a server restart (reload). `main`
    /// takes the receiver; the sender feeds the service layer.
    pub restart_rx: Option<mpsc::Receiver<()>>,
    pub restart_tx: mpsc::Sender<()>,
}

impl Daemon {
    /// Stop everything: running children first, then the supervisors.
    pub async fn shutdown(&mut self) {
        for handle in self.ctx.table.handles() {
            let state = handle.job.state();
            if matches!(state, JState::Running | JState::Retrying) {
                let has_shutdown_cmd = !handle.job.lock_cfg().shutdown_cmd.is_empty();
                if has_shutdown_cmd {
                    rpeat_engine::shutdown_job(&handle, &self.ctx, JState::Stopped).await;
                } else {
                    stop_job(&handle, &self.ctx, JState::Stopped);
                }
            } else {
                handle.job.set_hold(true);
            }
        }
        // Grace for children to exit and supervisors to observe it.
        tokio::time::sleep(Duration::from_secs(1)).await;
        for handle in self.ctx.table.handles() {
            handle.signal_stop();
        }
        if let Err(e) = std::fs::remove_file(&self.pidfile) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "cannot remove pidfile");
            }
        }
        info!("shutdown complete");
    }
}

/// Register one loaded job: restore its snapshot, wire its dependency
/// evaluators, launch its supervisor.
pub fn add_job(
    loaded: &LoadedJob,
    ctx: &EngineContext,
    dep_bus: &DependencyBus,
    keep_state: bool,
) -> Arc<JobHandle> {
    let job = Arc::new(Job::new(loaded.id, loaded.cfg.clone()));
    match load_job_snapshot(&ctx.home, loaded.id) {
        Ok(Some(snapshot)) if keep_state => restore_into(&job, &snapshot),
        Ok(Some(snapshot)) => {
            // Clean start keeps history only.
            job.lock_run().history = snapshot.history;
        }
        Ok(None) => {}
        Err(e) => warn!(job = %loaded.id, error = %e, "snapshot restore failed"),
    }
    if loaded.hold {
        job.set_hold(true);
        let _ = job.set_state(JState::Hold);
    }

    let deps = job.lock_cfg().dependencies.clone();
    let handle = register_job(job, ctx);
    for dep in deps {
        dep_bus.add_evaluator(handle.clone(), dep, ctx.clone());
    }
    info!(job = %handle.job.id, name = %handle.job.name(), "job registered");
    handle
}

/// Full startup sequence.
pub async fn startup(server: &ServerConfig) -> Result<Daemon, LifecycleError> {
    std::fs::create_dir_all(&server.home).map_err(|e| LifecycleError::Pidfile {
        path: server.home.clone(),
        source: e,
    })?;

    let (ctx, updates_rx, dep_rx, alerts_rx) = EngineContext::new(server.home.clone());
    let dep_bus = DependencyBus::new();
    dep_bus.start(dep_rx);
    let update_bus = UpdateBus::new();
    update_bus.start(updates_rx);
    spawn_alert_drain(alerts_rx);

    let loaded = load_config(&server.jobs_files, &server.load_defaults())?;
    for warning in &loaded.warnings {
        warn!("{}", warning);
    }

    let mut state = ServerState::default();
    for job in &loaded.jobs {
        if job.disabled {
            warn!(job = %job.cfg.name, "disabled by validation errors; not scheduled");
            continue;
        }
        let handle = add_job(job, &ctx, &dep_bus, !server.clean);
        state.order.push(job.id);
        state.jobs.push(rpeat_storage::JobSnapshot::capture(&handle.job));
    }
    if let Err(e) = save_server_state(&server.home, &state) {
        warn!(error = %e, "warm-start snapshot failed");
    }

    let pidfile = server.pidfile();
    std::fs::write(&pidfile, std::process::id().to_string()).map_err(|e| {
        LifecycleError::Pidfile {
            path: pidfile.clone(),
            source: e,
        }
    })?;

    let (restart_tx, restart_rx) = mpsc::channel(4);
    Ok(Daemon {
        ctx,
        dep_bus,
        update_bus,
        pidfile,
        restart_rx: Some(restart_rx),
        restart_tx,
    })
}

/// The core only emits alert intents; without a delivery transport
/// they are logged and dropped.
fn spawn_alert_drain(mut alerts_rx: mpsc::Receiver<AlertEnvelope>) {
    tokio::spawn(async move {
        while let Some(envelope) = alerts_rx.recv().await {
            info!(
                job = %envelope.name,
                state = %envelope.state,
                "alert intent emitted"
            );
        }
    });
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
pub(crate) mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! rpeatd: the rpeat scheduling server.
//!
//! Long-running daemon that loads declarative job files, supervises
//! one task per enabled job, and hot-reloads its configuration when
//! the pidfile is touched.

use rpeat_daemon::{config, lifecycle, reload};
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config_path = match args.get(1) {
        Some(p) => PathBuf::from(p),
        None => PathBuf::from("rpeat.json"),
    };

    let server = config::ServerConfig::load(&config_path)?;
    let log_guard = setup_logging(&server)?;

    info!(home = %server.home.display(), "starting rpeatd");

    let mut daemon = match lifecycle::startup(&server).await {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "failed to start");
            drop(log_guard);
            return Err(e.into());
        }
    };
    info!(jobs = daemon.ctx.table.len(), "all jobs started");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    // A touch on the pidfile requests a reload; its removal is the
    // operator's shutdown acknowledgement.
    let mut reload_rx = reload::watch_pidfile(daemon.pidfile.clone());
    let mut restart_rx = match daemon.restart_rx.take() {
        Some(rx) => rx,
        None => tokio::sync::mpsc::channel(1).1,
    };

    loop {
        tokio::select! {
            Some(()) = reload_rx.recv() => {
                info!("reload requested");
                if let Err(e) = reload::reload_jobs(&mut daemon, &server).await {
                    error!(error = %e, "reload failed");
                }
            }
            Some(()) = restart_rx.recv() => {
                info!("server restart requested via control API");
                if let Err(e) = reload::reload_jobs(&mut daemon, &server).await {
                    error!(error = %e, "reload failed");
                }
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received; shutting down");
                daemon.shutdown().await;
                break;
            }
            _ = sigint.recv() => {
                info!("SIGINT received; shutting down");
                daemon.shutdown().await;
                break;
            }
        }
    }

    info!("rpeatd stopped");
    Ok(())
}

fn setup_logging(
    server: &config::ServerConfig,
) -> Result<tracing_appender::non_blocking::WorkerGuard, std::io::Error> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    std::fs::create_dir_all(&server.home)?;
    let file_appender = tracing_appender::rolling::never(&server.home, "rpeatd.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
    Ok(guard)
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The control API surface, transport-agnostic.
//!
//! Each operation resolves its target by id or name slug, checks the
//! per-job ACL, records the user's reason on manual actions, and
//! drives the engine's stop/start paths. Any transport (HTTP,
//! websocket, local socket) can front these calls.

use crate::lifecycle::Daemon;
use chrono::Utc;
use rpeat_core::depend::Dependency;
use rpeat_core::job::{JState, JobUpdate, Reason};
use rpeat_engine::{shutdown_job, stop_job, JobHandle};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("job not found: {0}")]
    NotFound(String),

    #[error("insufficient permission")]
    Permission,

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("log read error: {0}")]
    Log(#[from] std::io::Error),
}

/// Tail output of one run's logs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LogOutput {
    pub run_id: String,
    pub stdout: String,
    pub stderr: String,
}

/// One edge of the derived dependency graph.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyGraph {
    pub action: String,
    pub condition: String,
    pub delay: String,
    pub trigger_ids: HashMap<String, String>,
    pub trigger_names: HashMap<String, String>,
    pub triggers: HashMap<String, DependencyGraphs>,
}

/// A job's dependency graph, upstream edges expanded one level deep
/// per node (id-keyed, never cyclic in the output).
#[derive(Debug, Clone, Serialize)]
pub struct DependencyGraphs {
    pub name: String,
    pub job_id: String,
    pub dependencies: Vec<DependencyGraph>,
}

/// The core-facing control service.
pub struct Service<'a> {
    pub daemon: &'a Daemon,
}

impl<'a> Service<'a> {
    pub fn new(daemon: &'a Daemon) -> Self {
        Self { daemon }
    }

    fn resolve(&self, key: &str) -> Result<Arc<JobHandle>, ServiceError> {
        self.daemon
            .ctx
            .table
            .resolve(key)
            .ok_or_else(|| ServiceError::NotFound(key.to_string()))
    }

    fn authorize(
        &self,
        handle: &Arc<JobHandle>,
        user: &str,
        action: &str,
    ) -> Result<(), ServiceError> {
        if handle.job.has_permission(user, action) {
            Ok(())
        } else {
            Err(ServiceError::Permission)
        }
    }

    fn record_reason(handle: &Arc<JobHandle>, action: &str, user: &str, comment: &str) {
        let mut run = handle.job.lock_run();
        run.unscheduled = true;
        run.reason = Reason {
            action: action.to_string(),
            comment: comment.to_string(),
            user: user.to_string(),
            timestamp: Utc::now().timestamp(),
        };
    }

    /// Toggle hold. Unholding returns the job to `ready` with a fresh
    /// retry budget; holding kills any current run first.
    pub fn hold(&self, key: &str, user: &str, comment: &str) -> Result<JobUpdate, ServiceError> {
        let handle = self.resolve(key)?;
        self.authorize(&handle, user, "hold")?;
        if handle.job.lock_cfg().is_child() {
            return Err(ServiceError::Permission);
        }
        Self::record_reason(&handle, "hold", user, comment);

        if handle.job.hold() {
            tracing::info!(job = %handle.job.id, user, "unhold");
            handle.job.set_hold(false);
            handle.job.set_retry_attempt(0);
            let _ = handle.job.set_state(JState::Ready);
        } else {
            tracing::info!(job = %handle.job.id, user, "hold");
            if handle.job.is_running() {
                stop_job(&handle, &self.daemon.ctx, JState::Stopped);
            }
            handle.job.set_hold(true);
            // Routed through the context so a HoldDuration arms.
            self.daemon.ctx.set_state(&handle, JState::Hold);
        }
        self.daemon.ctx.emit(&handle.job);
        Ok(handle.job.update_params())
    }

    /// Trigger an immediate unscheduled run.
    pub fn start(&self, key: &str, user: &str, comment: &str) -> Result<JobUpdate, ServiceError> {
        let handle = self.resolve(key)?;
        self.authorize(&handle, user, "start")?;
        tracing::info!(job = %handle.job.id, user, "manual start");
        Self::record_reason(&handle, "start", user, comment);
        handle.job.set_hold(false);
        handle.job.set_retry_attempt(0);
        handle.timer.reset(Duration::ZERO);
        Ok(handle.job.update_params())
    }

    /// Stop the current run (shutdown command when configured).
    pub async fn stop(
        &self,
        key: &str,
        user: &str,
        comment: &str,
    ) -> Result<JobUpdate, ServiceError> {
        let handle = self.resolve(key)?;
        self.authorize(&handle, user, "stop")?;
        tracing::info!(job = %handle.job.id, user, "manual stop");
        Self::record_reason(&handle, "stop", user, comment);
        let has_shutdown_cmd = !handle.job.lock_cfg().shutdown_cmd.is_empty();
        if has_shutdown_cmd {
            shutdown_job(&handle, &self.daemon.ctx, JState::Stopped).await;
        } else {
            stop_job(&handle, &self.daemon.ctx, JState::Stopped);
        }
        Ok(handle.job.update_params())
    }

    /// Stop the current run and retrigger after a short grace.
    pub async fn restart(
        &self,
        key: &str,
        user: &str,
        comment: &str,
    ) -> Result<JobUpdate, ServiceError> {
        let handle = self.resolve(key)?;
        self.authorize(&handle, user, "restart")?;
        tracing::info!(job = %handle.job.id, user, "manual restart");
        Self::record_reason(&handle, "restart", user, comment);
        handle.job.lock_run().restarting = true;
        handle.job.set_retry_attempt(0);
        stop_job(&handle, &self.daemon.ctx, JState::End);
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.job.set_hold(false);
        handle.timer.reset(Duration::ZERO);
        Ok(handle.job.update_params())
    }

    /// Snapshot one job.
    pub fn status(&self, key: &str, user: &str) -> Result<JobUpdate, ServiceError> {
        let handle = self.resolve(key)?;
        self.authorize(&handle, user, "status")?;
        Ok(handle.job.update_params())
    }

    /// Snapshots of every job the user may view, in display order,
    /// optionally filtered by group.
    pub fn all_jobs(&self, user: &str, groups: Option<&[String]>) -> Vec<JobUpdate> {
        self.daemon
            .ctx
            .table
            .handles()
            .into_iter()
            .filter(|h| {
                let cfg = h.job.lock_cfg();
                cfg.user == user || cfg.admin.iter().any(|a| a == user)
            })
            .filter(|h| match groups {
                None => true,
                Some(groups) => {
                    let cfg = h.job.lock_cfg();
                    cfg.group.iter().any(|g| groups.contains(g))
                }
            })
            .map(|h| h.job.update_params())
            .collect()
    }

    /// Last `lines` lines of a run's stdout and/or stderr.
    pub fn log(
        &self,
        key: &str,
        run_id: &str,
        user: &str,
        stdout: bool,
        stderr: bool,
        lines: usize,
    ) -> Result<LogOutput, ServiceError> {
        let handle = self.resolve(key)?;
        self.authorize(&handle, user, "log")?;

        let (out_path, err_path) = {
            let run = handle.job.lock_run();
            if run.run_id.to_string() == run_id {
                (run.stdout_file.clone(), run.stderr_file.clone())
            } else {
                let entry = run
                    .history
                    .iter()
                    .find(|h| h.run_id == run_id)
                    .ok_or_else(|| ServiceError::RunNotFound(run_id.to_string()))?;
                (entry.stdout.clone().into(), entry.stderr.clone().into())
            }
        };

        let mut output = LogOutput {
            run_id: run_id.to_string(),
            ..LogOutput::default()
        };
        if stdout {
            output.stdout = tail_lines(&out_path, lines)?;
        }
        if stderr {
            output.stderr = tail_lines(&err_path, lines)?;
        }
        Ok(output)
    }

    /// The derived dependency graph for a job.
    pub fn dependencies(&self, key: &str, user: &str) -> Result<DependencyGraphs, ServiceError> {
        let handle = self.resolve(key)?;
        self.authorize(&handle, user, "dependencies")?;
        Ok(self.graph_for(&handle, 0))
    }

    fn graph_for(&self, handle: &Arc<JobHandle>, depth: usize) -> DependencyGraphs {
        let deps: Vec<Dependency> = handle.job.lock_cfg().dependencies.clone();
        let mut graphs = Vec::with_capacity(deps.len());
        for dep in &deps {
            let mut edge = DependencyGraph {
                action: dep.action.to_string(),
                condition: dep.condition.to_string(),
                delay: dep.delay.clone(),
                trigger_ids: HashMap::new(),
                trigger_names: HashMap::new(),
                triggers: HashMap::new(),
            };
            for (trigger, states) in &dep.dependencies {
                match self.daemon.ctx.table.resolve(trigger) {
                    Some(upstream) if upstream.job.id != handle.job.id => {
                        edge.trigger_ids
                            .insert(upstream.job.id.to_string(), states.clone());
                        edge.trigger_names
                            .insert(upstream.job.name(), states.clone());
                        // Bounded expansion keeps deep chains readable
                        // and cycles impossible.
                        if depth < 4 {
                            edge.triggers.insert(
                                upstream.job.id.to_string(),
                                self.graph_for(&upstream, depth + 1),
                            );
                        }
                    }
                    _ => {
                        // Unknown triggers stay visible for validation.
                        edge.trigger_ids.insert(trigger.clone(), states.clone());
                        edge.trigger_names.insert(trigger.clone(), states.clone());
                    }
                }
            }
            graphs.push(edge);
        }
        DependencyGraphs {
            name: handle.job.name(),
            job_id: handle.job.id.to_string(),
            dependencies: graphs,
        }
    }

    /// Request a configuration reload.
    pub async fn server_restart(&self, user: &str) -> Result<(), ServiceError> {
        // Server-level restart authorization: any job admin qualifies.
        let authorized = self
            .daemon
            .ctx
            .table
            .handles()
            .iter()
            .any(|h| h.job.has_permission(user, "restart"));
        if !authorized {
            return Err(ServiceError::Permission);
        }
        tracing::info!(user, "server restart requested");
        let _ = self.daemon.restart_tx.send(()).await;
        Ok(())
    }
}

/// Last `n` lines of a file, reading backwards in chunks so large
/// logs are not slurped whole.
pub fn tail_lines(path: &Path, n: usize) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let len = file.seek(SeekFrom::End(0))?;
    let mut pos = len;
    let mut data: Vec<u8> = Vec::new();

    // Accumulate trailing chunks until enough line breaks are in hand.
    while pos > 0 && data.iter().filter(|b| **b == b'\n').count() <= n {
        let chunk = 4096usize.min(pos as usize);
        pos -= chunk as u64;
        file.seek(SeekFrom::Start(pos))?;
        let mut buf = vec![0u8; chunk];
        file.read_exact(&mut buf)?;
        buf.extend_from_slice(&data);
        data = buf;
    }

    let text = String::from_utf8_lossy(&data);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    let mut out = lines[start..].join("\n");
    if text.ends_with('\n') && !out.is_empty() {
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;

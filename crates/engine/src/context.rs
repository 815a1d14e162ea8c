// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared engine plumbing: the job table, per-job handles, and the
//! emit path every state change funnels through.

use chrono::Utc;
use rpeat_core::alert::AlertEnvelope;
use rpeat_core::config::slugify;
use rpeat_core::job::{Ctl, JState, Job, JobUpdate};
use rpeat_core::{DepEvent, JobId, MAX_JOBS};
use rpeat_storage::{save_job_snapshot, JobSnapshot};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;

/// Resettable deadline shared between a supervisor and everything that
/// may retrigger it (control ops, dependency evaluators, reload).
#[derive(Clone)]
pub struct TimerHandle {
    tx: watch::Sender<Instant>,
}

impl TimerHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(far_future());
        Self { tx }
    }

    /// Fire after `d` from now. `reset(0)` triggers immediately.
    pub fn reset(&self, d: Duration) {
        self.tx.send_replace(Instant::now() + d);
    }

    /// Park the timer; it will not fire until reset.
    pub fn disarm(&self) {
        self.tx.send_replace(far_future());
    }

    pub fn subscribe(&self) -> watch::Receiver<Instant> {
        self.tx.subscribe()
    }
}

impl Default for TimerHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Roughly thirty years: the "never" deadline for held schedules.
pub(crate) fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}

/// A registered job: the record plus the channels its supervisor owns.
pub struct JobHandle {
    pub job: Arc<Job>,
    pub ctl_tx: mpsc::Sender<Ctl>,
    pub ctl_rx: Mutex<mpsc::Receiver<Ctl>>,
    pub timer: TimerHandle,
    pub stop: watch::Sender<bool>,
    /// Held across the run/retry region and across reload mutation.
    pub run_lock: Mutex<()>,
}

impl JobHandle {
    pub fn new(job: Arc<Job>) -> Arc<Self> {
        let (ctl_tx, ctl_rx) = mpsc::channel(3);
        let (stop, _) = watch::channel(false);
        Arc::new(Self {
            job,
            ctl_tx,
            ctl_rx: Mutex::new(ctl_rx),
            timer: TimerHandle::new(),
            stop,
            run_lock: Mutex::new(()),
        })
    }

    /// Signal the supervisor to unwind.
    pub fn signal_stop(&self) {
        let _ = self.stop.send(true);
    }
}

#[derive(Default)]
struct TableInner {
    jobs: HashMap<JobId, Arc<JobHandle>>,
    order: Vec<JobId>,
}

/// The server's job set, shared behind a readers-writer lock.
/// Mutations come only from the loader/reloader path.
#[derive(Clone, Default)]
pub struct JobTable {
    inner: Arc<RwLock<TableInner>>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: Arc<JobHandle>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let id = handle.job.id;
        if !inner.order.contains(&id) {
            inner.order.push(id);
        }
        inner.jobs.insert(id, handle);
    }

    pub fn remove(&self, id: JobId) -> Option<Arc<JobHandle>> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.order.retain(|j| *j != id);
        inner.jobs.remove(&id)
    }

    pub fn get(&self, id: JobId) -> Option<Arc<JobHandle>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .jobs
            .get(&id)
            .cloned()
    }

    /// Resolve by id string or by name slug.
    pub fn resolve(&self, key: &str) -> Option<Arc<JobHandle>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        if let Ok(uuid) = key.parse::<uuid::Uuid>() {
            if let Some(handle) = inner.jobs.get(&JobId(uuid)) {
                return Some(handle.clone());
            }
        }
        inner
            .jobs
            .values()
            .find(|h| slugify(&h.job.name()) == key)
            .cloned()
    }

    pub fn order(&self) -> Vec<JobId> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .order
            .clone()
    }

    pub fn handles(&self) -> Vec<Arc<JobHandle>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .order
            .iter()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything a task needs to publish state: bus senders, the home
/// directory for snapshots, and the table for cross-job lookups.
#[derive(Clone)]
pub struct EngineContext {
    pub home: PathBuf,
    pub table: JobTable,
    pub updates_tx: mpsc::Sender<JobUpdate>,
    pub dep_tx: mpsc::Sender<DepEvent>,
    pub alerts_tx: mpsc::Sender<AlertEnvelope>,
    /// Mirror child output onto the server's own stdio.
    pub tee_stdio: bool,
}

impl EngineContext {
    /// Build a context plus the receiving ends of its buses.
    pub fn new(
        home: PathBuf,
    ) -> (
        Self,
        mpsc::Receiver<JobUpdate>,
        mpsc::Receiver<DepEvent>,
        mpsc::Receiver<AlertEnvelope>,
    ) {
        let (updates_tx, updates_rx) = mpsc::channel(MAX_JOBS);
        let (dep_tx, dep_rx) = mpsc::channel(MAX_JOBS);
        let (alerts_tx, alerts_rx) = mpsc::channel(MAX_JOBS);
        (
            Self {
                home,
                table: JobTable::new(),
                updates_tx,
                dep_tx,
                alerts_tx,
                tee_stdio: false,
            },
            updates_rx,
            dep_rx,
            alerts_rx,
        )
    }

    /// Publish a job's current state everywhere it goes: snapshot to
    /// disk, the update bus, the dependency bus, and (fire-and-forget)
    /// the alert channel.
    pub fn emit(&self, job: &Job) {
        {
            let mut run = job.lock_run();
            run.modified = Utc::now().timestamp();
        }
        if let Err(e) = save_job_snapshot(&self.home, &JobSnapshot::capture(job)) {
            tracing::warn!(job = %job.id, error = %e, "snapshot save failed");
        }

        let update = job.update_params();
        let state = update.state;
        let name = update.name.clone();
        if self.updates_tx.try_send(update).is_err() {
            tracing::warn!(job = %job.id, "update bus full; dropping update");
        }
        if self
            .dep_tx
            .try_send(DepEvent {
                id: job.id,
                name,
                state,
            })
            .is_err()
        {
            tracing::warn!(job = %job.id, "dependency bus full; dropping event");
        }
        if let Some(envelope) = rpeat_core::alert::build_envelope(job) {
            let _ = self.alerts_tx.try_send(envelope);
        }
    }

    /// Set a state and, when the transition is legal, publish it and
    /// arm any configured reset timers.
    pub fn set_state(&self, handle: &Arc<JobHandle>, state: JState) {
        if handle.job.set_state(state).is_err() {
            return;
        }
        self.arm_reset_timers(handle, state);
    }

    /// Reset hooks: failed, missed and hold states can re-arm the job
    /// after a configured duration.
    fn arm_reset_timers(&self, handle: &Arc<JobHandle>, state: JState) {
        let cfg = handle.job.lock_cfg();
        let spec = match state {
            JState::Failed => cfg.retry_reset.clone(),
            JState::MissedWarning => cfg.missed_reset.clone(),
            JState::Hold => cfg.hold_duration.clone(),
            _ => return,
        };
        drop(cfg);
        if spec.is_empty() {
            return;
        }
        // A leading '-' means "release and fire immediately after".
        let (negate, spec_body) = match spec.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, spec.as_str()),
        };
        let Ok(wait) = humantime::parse_duration(spec_body) else {
            return;
        };
        let ctx = self.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            handle.job.set_hold(false);
            if negate {
                handle.timer.reset(Duration::ZERO);
                return;
            }
            if state == JState::Failed || state == JState::Hold {
                let _ = handle.job.set_state(JState::Ready);
            }
            ctx.emit(&handle.job);
        });
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dependency bus: broadcast of `(job, name, state)` to evaluators.
//!
//! A single router task replicates every event from the central
//! channel into each registered evaluator's private channel, pacing
//! briefly between events so back-to-back transitions are not
//! coalesced. Each evaluator task feeds its events through the core
//! latch combinator and applies the action vocabulary on its owner.

use crate::context::{EngineContext, JobHandle};
use crate::watchers::stop_job;
use rpeat_core::depend::{DepAction, Dependency, EvalState};
use rpeat_core::job::JState;
use rpeat_core::{DepEvent, MAX_JOBS};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;

/// Pause between replicated events (coalescing guard, well under the
/// 50 ms ceiling the evaluators tolerate).
const EVENT_PACING: Duration = Duration::from_millis(10);

/// Handle for one registered evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EvaluatorId(u64);

#[derive(Default)]
struct Registry {
    evaluators: HashMap<EvaluatorId, (rpeat_core::JobId, mpsc::Sender<DepEvent>)>,
}

/// The bus: register/unregister evaluators, route events.
#[derive(Clone)]
pub struct DependencyBus {
    registry: Arc<RwLock<Registry>>,
    next_id: Arc<AtomicU64>,
}

impl DependencyBus {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Spawn the router over the central event channel.
    pub fn start(&self, mut events: mpsc::Receiver<DepEvent>) {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let targets: Vec<mpsc::Sender<DepEvent>> = {
                    let reg = registry.read().unwrap_or_else(|e| e.into_inner());
                    reg.evaluators.values().map(|(_, tx)| tx.clone()).collect()
                };
                for tx in targets {
                    // Deliver even to a briefly-full subscriber; the
                    // event itself is never dropped.
                    if tx.try_send(event.clone()).is_err() {
                        let _ = tx.send(event.clone()).await;
                    }
                }
                tokio::time::sleep(EVENT_PACING).await;
            }
            tracing::info!("dependency bus closed");
        });
    }

    /// Register an evaluator for one dependency of `owner`; spawns the
    /// evaluation task.
    pub fn add_evaluator(
        &self,
        owner: Arc<JobHandle>,
        dep: Dependency,
        ctx: EngineContext,
    ) -> EvaluatorId {
        let id = EvaluatorId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(MAX_JOBS);
        {
            let mut reg = self.registry.write().unwrap_or_else(|e| e.into_inner());
            reg.evaluators.insert(id, (owner.job.id, tx));
        }
        tracing::debug!(job = %owner.job.id, action = ?dep.action, "evaluator registered");

        // A job with both a schedule and a dependency is contingent:
        // it starts held until the dependency first resolves.
        let (dependent, controller) = {
            let cfg = owner.job.lock_cfg();
            (cfg.cron_is_dependent(), cfg.is_controller())
        };
        let trigger = dependent || controller;
        let contingent = !trigger && !dep.dependencies.is_empty();
        if contingent {
            owner.job.set_hold(true);
            owner.job.lock_run().contingent = true;
            let _ = owner.job.set_state(JState::Contingent);
        }

        tokio::spawn(evaluate(rx, dep, owner, ctx, trigger, contingent));
        id
    }

    /// Drop every evaluator owned by `job_id` (job removal).
    pub fn remove_job(&self, job_id: rpeat_core::JobId) {
        let mut reg = self.registry.write().unwrap_or_else(|e| e.into_inner());
        reg.evaluators.retain(|_, (owner, _)| *owner != job_id);
    }

    pub fn evaluator_count(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .evaluators
            .len()
    }
}

impl Default for DependencyBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluator loop: apply each incoming event and act when satisfied.
async fn evaluate(
    mut rx: mpsc::Receiver<DepEvent>,
    dep: Dependency,
    owner: Arc<JobHandle>,
    ctx: EngineContext,
    trigger: bool,
    contingent: bool,
) {
    let mut state = EvalState::new(&dep);
    while let Some(event) = rx.recv().await {
        let owner_running = owner.job.is_running();
        let nfailures = owner.job.lock_run().nfailures;
        let out = state.check(&dep, &event, owner_running, nfailures);
        if out.add_failure {
            owner.job.lock_run().nfailures += 1;
        }
        if out.reset_failures {
            owner.job.lock_run().nfailures = 0;
        }

        if out.is_ok {
            tracing::info!(
                owner = %owner.job.id,
                from = %event.name,
                state = %event.state,
                action = ?dep.action,
                "dependency satisfied"
            );
            state.reset();
            if trigger {
                apply_action(&dep, &mut state, &owner, &ctx).await;
            } else if contingent {
                // First resolution releases the contingency.
                owner.job.set_hold(false);
                owner.job.lock_run().contingent = false;
                let _ = owner.job.set_state(JState::Ready);
                let every = {
                    let cfg = owner.job.lock_cfg();
                    match cfg.cron_start.first().map(|c| c.kind.clone()) {
                        Some(rpeat_core::CronKind::Every(d)) => Some(d),
                        _ => None,
                    }
                };
                if let Some(every) = every {
                    owner.timer.reset(every);
                }
                ctx.emit(&owner.job);
            }
        }

        if out.dep_not_ok {
            let downstream = match event.state {
                JState::Retrying => JState::DepRetry,
                JState::Failed => JState::DepFailed,
                _ => JState::DepWarning,
            };
            owner.job.set_hold(false);
            let _ = owner.job.set_state(downstream);
            state.reset();
            ctx.emit(&owner.job);
        }
    }
}

/// The action vocabulary (spec'd effects on the owner).
async fn apply_action(
    dep: &Dependency,
    state: &mut EvalState,
    owner: &Arc<JobHandle>,
    ctx: &EngineContext,
) {
    let delay = dep.parsed_delay();
    match dep.action {
        DepAction::Start => {
            if !state.run {
                if let Some(d) = delay {
                    tokio::time::sleep(d).await;
                }
                owner.timer.reset(Duration::ZERO);
                state.run = true;
            }
        }
        DepAction::CronStart => {
            if !state.run {
                owner.job.set_hold(false);
                let _ = owner.job.set_state(JState::Ready);
                owner.job.lock_run().contingent = false;
                ctx.emit(&owner.job);
            }
        }
        DepAction::Stop => {
            if owner.job.is_running() {
                stop_job(owner, ctx, JState::Stopped);
            }
            state.run = false;
        }
        DepAction::Restart => {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            stop_job(owner, ctx, JState::End);
            tokio::time::sleep(Duration::from_secs(1)).await;
            owner.timer.reset(Duration::ZERO);
            state.run = true;
        }
        DepAction::Ready => {
            state.run = false;
            stop_job(owner, ctx, JState::Stopped);
            owner.job.set_hold(false);
            let _ = owner.job.set_state(JState::Ready);
            state.reset();
            ctx.emit(&owner.job);
        }
        DepAction::Hold => {
            owner.job.set_hold(true);
            ctx.set_state(owner, JState::Hold);
            ctx.emit(&owner.job);
        }
        DepAction::CompletedFailed => {
            state.reset();
            let _ = owner.ctl_tx.try_send(rpeat_core::Ctl {
                killed: false,
                code: JState::Failed,
            });
        }
        DepAction::CompletedStopped => {
            let _ = owner.ctl_tx.try_send(rpeat_core::Ctl {
                killed: false,
                code: JState::Stopped,
            });
        }
        DepAction::CompletedSuccess => {
            let _ = owner.ctl_tx.try_send(rpeat_core::Ctl {
                killed: false,
                code: JState::Success,
            });
        }
    }
    if dep.queue_jobs {
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
#[path = "depbus_tests.rs"]
mod tests;

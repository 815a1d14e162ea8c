// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Update bus: per-job snapshot deltas to subscribed observers.
//!
//! Observers register with a user identity; their allow-list is
//! derived from each job's ACL (owner or admin). The dispatcher
//! delivers an update only to observers allowed to see that job, plus
//! a periodic server-time heartbeat. An observer that stops answering
//! heartbeats (or whose channel backs up) is evicted -- publishers are
//! never blocked by a slow consumer.

use crate::context::JobTable;
use chrono::Utc;
use rpeat_core::job::JobUpdate;
use rpeat_core::JobId;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Heartbeat cadence and the pong deadline that evicts an observer.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
const PONG_DEADLINE: Duration = Duration::from_secs(5);

/// Server time payload carried by heartbeats.
#[derive(Debug, Clone, Serialize)]
pub struct ServerTime {
    pub modified: i64,
    pub tz_offset: i32,
    pub tz_name: String,
}

impl ServerTime {
    fn now() -> Self {
        let now = chrono::Local::now();
        Self {
            modified: now.timestamp(),
            tz_offset: now.offset().local_minus_utc(),
            tz_name: now.format("%Z").to_string(),
        }
    }
}

/// What an observer receives.
#[derive(Debug, Clone)]
pub enum ObserverMessage {
    Update(Box<JobUpdate>),
    Heartbeat(ServerTime),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

struct ObserverEntry {
    user: String,
    allowed: Vec<JobId>,
    tx: mpsc::Sender<ObserverMessage>,
}

/// An observer's end of the subscription.
pub struct ObserverSubscription {
    pub id: ObserverId,
    pub rx: mpsc::Receiver<ObserverMessage>,
    pub pong: mpsc::Sender<()>,
}

#[derive(Default)]
struct Pool {
    observers: HashMap<ObserverId, ObserverEntry>,
}

/// The update bus and its observer pool.
#[derive(Clone)]
pub struct UpdateBus {
    pool: Arc<RwLock<Pool>>,
    next_id: Arc<AtomicU64>,
}

impl UpdateBus {
    pub fn new() -> Self {
        Self {
            pool: Arc::new(RwLock::new(Pool::default())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Spawn the dispatcher over the central update channel.
    pub fn start(&self, mut updates: mpsc::Receiver<JobUpdate>) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                let mut dead = Vec::new();
                {
                    let pool = pool.read().unwrap_or_else(|e| e.into_inner());
                    for (id, entry) in &pool.observers {
                        if !entry.allowed.contains(&update.id) {
                            continue;
                        }
                        if entry
                            .tx
                            .try_send(ObserverMessage::Update(Box::new(update.clone())))
                            .is_err()
                        {
                            dead.push(*id);
                        }
                    }
                }
                if !dead.is_empty() {
                    let mut pool = pool.write().unwrap_or_else(|e| e.into_inner());
                    for id in dead {
                        tracing::info!(observer = id.0, "evicting backed-up observer");
                        pool.observers.remove(&id);
                    }
                }
            }
            tracing::info!("update bus closed");
        });
    }

    /// Register an observer: the allow-list is every job whose ACL
    /// admits `user` (owner or admin).
    pub fn subscribe(&self, user: &str, table: &JobTable) -> ObserverSubscription {
        let allowed: Vec<JobId> = table
            .handles()
            .into_iter()
            .filter(|h| {
                let cfg = h.job.lock_cfg();
                cfg.user == user || cfg.admin.iter().any(|a| a == user)
            })
            .map(|h| h.job.id)
            .collect();
        self.subscribe_with_allowed(user, allowed)
    }

    /// Register with an explicit allow-list (transport-derived ACLs).
    pub fn subscribe_with_allowed(&self, user: &str, allowed: Vec<JobId>) -> ObserverSubscription {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(64);
        let (pong_tx, pong_rx) = mpsc::channel(8);
        {
            let mut pool = self.pool.write().unwrap_or_else(|e| e.into_inner());
            pool.observers.insert(
                id,
                ObserverEntry {
                    user: user.to_string(),
                    allowed,
                    tx: tx.clone(),
                },
            );
        }
        tracing::info!(observer = id.0, user, "observer registered");
        self.spawn_heartbeat(id, tx, pong_rx);
        ObserverSubscription {
            id,
            rx,
            pong: pong_tx,
        }
    }

    /// Per-observer liveness task: send the 1 s server-time heartbeat
    /// and evict after a missed pong window.
    fn spawn_heartbeat(
        &self,
        id: ObserverId,
        tx: mpsc::Sender<ObserverMessage>,
        mut pong_rx: mpsc::Receiver<()>,
    ) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            let mut last_pong = Instant::now();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if last_pong.elapsed() > PONG_DEADLINE {
                            tracing::info!(observer = id.0, "lost heartbeat; unregistering");
                            break;
                        }
                        if tx.try_send(ObserverMessage::Heartbeat(ServerTime::now())).is_err() {
                            tracing::info!(observer = id.0, "heartbeat undeliverable; unregistering");
                            break;
                        }
                    }
                    pong = pong_rx.recv() => {
                        match pong {
                            Some(()) => last_pong = Instant::now(),
                            None => break,
                        }
                    }
                }
            }
            let mut pool = pool.write().unwrap_or_else(|e| e.into_inner());
            pool.observers.remove(&id);
        });
    }

    pub fn unsubscribe(&self, id: ObserverId) {
        let mut pool = self.pool.write().unwrap_or_else(|e| e.into_inner());
        pool.observers.remove(&id);
    }

    pub fn observer_count(&self) -> usize {
        self.pool
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .observers
            .len()
    }

    /// Users currently observing (diagnostics).
    pub fn observers(&self) -> Vec<String> {
        self.pool
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .observers
            .values()
            .map(|o| o.user.clone())
            .collect()
    }
}

impl Default for UpdateBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "updates_tests.rs"]
mod tests;

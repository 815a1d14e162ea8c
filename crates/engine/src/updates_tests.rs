// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::context::{EngineContext, JobHandle};
use rpeat_core::job::{JState, Job, JobCfg};

fn handle_owned_by(user: &str) -> std::sync::Arc<JobHandle> {
    let mut cfg = JobCfg::default();
    cfg.name = format!("job-of-{}", user);
    cfg.user = user.into();
    cfg.max_history = 10;
    JobHandle::new(Arc::new(Job::new(JobId::new(), cfg)))
}

async fn recv_update(
    sub: &mut ObserverSubscription,
    deadline: Duration,
) -> Option<Box<JobUpdate>> {
    let end = tokio::time::Instant::now() + deadline;
    while tokio::time::Instant::now() < end {
        match tokio::time::timeout(Duration::from_millis(200), sub.rx.recv()).await {
            Ok(Some(ObserverMessage::Update(update))) => return Some(update),
            Ok(Some(ObserverMessage::Heartbeat(_))) => {
                let _ = sub.pong.try_send(());
            }
            Ok(None) => return None,
            Err(_) => {}
        }
    }
    None
}

#[tokio::test(flavor = "multi_thread")]
async fn updates_reach_only_authorized_observers() {
    let home = tempfile::tempdir().unwrap();
    let (ctx, updates_rx, _dep_rx, _alerts_rx) = EngineContext::new(home.path().to_path_buf());
    let bus = UpdateBus::new();
    bus.start(updates_rx);

    let alice_job = handle_owned_by("alice");
    let bob_job = handle_owned_by("bob");
    ctx.table.insert(alice_job.clone());
    ctx.table.insert(bob_job.clone());

    let mut alice = bus.subscribe("alice", &ctx.table);
    let mut bob = bus.subscribe("bob", &ctx.table);

    alice_job.job.set_state(JState::Running).unwrap();
    ctx.emit(&alice_job.job);

    let update = recv_update(&mut alice, Duration::from_secs(5)).await.unwrap();
    assert_eq!(update.id, alice_job.job.id);
    assert_eq!(update.state, JState::Running);

    assert!(
        recv_update(&mut bob, Duration::from_secs(1)).await.is_none(),
        "bob must not see alice's job"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn admins_are_on_the_allow_list() {
    let home = tempfile::tempdir().unwrap();
    let (ctx, updates_rx, _dep_rx, _alerts_rx) = EngineContext::new(home.path().to_path_buf());
    let bus = UpdateBus::new();
    bus.start(updates_rx);

    let handle = handle_owned_by("owner");
    handle.job.lock_cfg().admin = vec!["root".into()];
    ctx.table.insert(handle.clone());

    let mut root = bus.subscribe("root", &ctx.table);
    handle.job.set_state(JState::Running).unwrap();
    ctx.emit(&handle.job);
    assert!(recv_update(&mut root, Duration::from_secs(5)).await.is_some());
}

#[tokio::test(flavor = "multi_thread")]
async fn heartbeats_carry_server_time() {
    let home = tempfile::tempdir().unwrap();
    let (ctx, updates_rx, _dep_rx, _alerts_rx) = EngineContext::new(home.path().to_path_buf());
    let bus = UpdateBus::new();
    bus.start(updates_rx);

    let mut sub = bus.subscribe("anyone", &ctx.table);
    let msg = tokio::time::timeout(Duration::from_secs(5), sub.rx.recv())
        .await
        .unwrap()
        .unwrap();
    match msg {
        ObserverMessage::Heartbeat(t) => assert!(t.modified > 0),
        other => panic!("expected heartbeat, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn silent_observer_is_evicted() {
    let home = tempfile::tempdir().unwrap();
    let (ctx, updates_rx, _dep_rx, _alerts_rx) = EngineContext::new(home.path().to_path_buf());
    let bus = UpdateBus::new();
    bus.start(updates_rx);

    let sub = bus.subscribe("ghost", &ctx.table);
    assert_eq!(bus.observer_count(), 1);
    // Never pong, never drain: the pong deadline evicts us.
    drop(sub.pong);
    let end = tokio::time::Instant::now() + Duration::from_secs(10);
    while bus.observer_count() > 0 && tokio::time::Instant::now() < end {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    assert_eq!(bus.observer_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn responsive_observer_stays_registered() {
    let home = tempfile::tempdir().unwrap();
    let (ctx, updates_rx, _dep_rx, _alerts_rx) = EngineContext::new(home.path().to_path_buf());
    let bus = UpdateBus::new();
    bus.start(updates_rx);

    let mut sub = bus.subscribe("alive", &ctx.table);
    let end = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < end {
        if let Ok(Some(ObserverMessage::Heartbeat(_))) =
            tokio::time::timeout(Duration::from_millis(500), sub.rx.recv()).await
        {
            let _ = sub.pong.try_send(());
        }
    }
    assert_eq!(bus.observer_count(), 1);
    bus.unsubscribe(sub.id);
    assert_eq!(bus.observer_count(), 0);
}

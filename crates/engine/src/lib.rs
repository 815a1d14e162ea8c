// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! rpeat-engine: the running half of the server.
//!
//! One supervisor task per enabled job drives the schedule/run/retry
//! state machine; a dependency bus fans state changes out to per-edge
//! evaluators; an update bus delivers snapshots to ACL-filtered
//! observers. Process children run in their own process groups so the
//! kill paths can take the whole tree down.

pub mod context;
pub mod depbus;
pub mod host;
pub mod run;
pub mod supervisor;
pub mod updates;
pub mod watchers;

pub use context::{EngineContext, JobHandle, JobTable, TimerHandle};
pub use depbus::DependencyBus;
pub use supervisor::register_job;
pub use updates::{ObserverMessage, ObserverSubscription, ServerTime, UpdateBus};
pub use watchers::{shutdown_job, stop_job};

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dependency declarations and the trigger combinator.
//!
//! A dependency maps upstream trigger keys (job id or name) to a
//! `|`-separated union of accepted states, combined under `all` or
//! `any`-of-N, and names the action to take when the combination is
//! satisfied. The latch/combine step here is pure; the engine's
//! evaluator task applies the resulting actions.

use crate::job::{JState, JobId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Action taken when a dependency fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DepAction {
    #[default]
    Start,
    Stop,
    Restart,
    Hold,
    CronStart,
    Ready,
    #[serde(rename = "completed_success")]
    CompletedSuccess,
    #[serde(rename = "completed_stopped")]
    CompletedStopped,
    #[serde(rename = "completed_failed")]
    CompletedFailed,
}

impl DepAction {
    pub fn is_start_like(&self) -> bool {
        matches!(self, DepAction::Start | DepAction::CronStart)
    }
}

impl std::fmt::Display for DepAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DepAction::Start => "start",
            DepAction::Stop => "stop",
            DepAction::Restart => "restart",
            DepAction::Hold => "hold",
            DepAction::CronStart => "cronstart",
            DepAction::Ready => "ready",
            DepAction::CompletedSuccess => "completed_success",
            DepAction::CompletedStopped => "completed_stopped",
            DepAction::CompletedFailed => "completed_failed",
        };
        write!(f, "{}", s)
    }
}

/// How trigger latches combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DepCondition {
    #[default]
    All,
    Any,
}

impl std::fmt::Display for DepCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DepCondition::All => write!(f, "all"),
            DepCondition::Any => write!(f, "any"),
        }
    }
}

/// A declared dependency edge.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Dependency {
    /// Trigger key (job id or name) -> accepted states union.
    #[serde(rename = "Dependencies", default)]
    pub dependencies: HashMap<String, String>,

    #[serde(rename = "Action", default)]
    pub action: DepAction,

    #[serde(rename = "Condition", default)]
    pub condition: DepCondition,

    /// For `any`: required latch count. For `completed_failed`: the
    /// failure budget.
    #[serde(rename = "N", default)]
    pub n: u32,

    /// Latches become lossy: a non-matching state clears its latch.
    #[serde(rename = "UpdateDep", default)]
    pub update_dep: bool,

    /// Duration string slept before acting (`100ms`, `1m30s`, ...).
    #[serde(rename = "Delay", default)]
    pub delay: String,

    /// Keep latches across a running owner so the next cycle queues.
    #[serde(rename = "QueueJobs", default)]
    pub queue_jobs: bool,
}

impl Dependency {
    /// Required latch count for `any` (defaults to 1).
    pub fn required_n(&self) -> u32 {
        self.n.max(1)
    }

    /// Parsed action delay; invalid strings are a validation error
    /// caught at load, never at run time.
    pub fn parsed_delay(&self) -> Option<Duration> {
        if self.delay.is_empty() {
            return None;
        }
        humantime::parse_duration(&self.delay).ok()
    }

    pub fn delay_is_valid(&self) -> bool {
        self.delay.is_empty() || humantime::parse_duration(&self.delay).is_ok()
    }
}

/// A state-change event broadcast on the dependency bus.
#[derive(Debug, Clone)]
pub struct DepEvent {
    pub id: JobId,
    pub name: String,
    pub state: JState,
}

/// Result of feeding one event through a dependency's latches.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CheckOutcome {
    /// The combination is satisfied; take the action.
    pub is_ok: bool,
    /// An upstream is in a bad terminal-like state.
    pub dep_not_ok: bool,
    /// The event named one of this dependency's triggers.
    pub matched: bool,
    /// Count one failure against the controller's budget.
    pub add_failure: bool,
    /// The failure budget was exceeded; counter must reset.
    pub reset_failures: bool,
}

/// Per-evaluator latch state.
#[derive(Debug, Clone, Default)]
pub struct EvalState {
    /// Trigger key -> currently satisfied.
    pub states: HashMap<String, bool>,
    /// Once-latched completion marks for `completed_*` rollups.
    pub completed: HashMap<String, bool>,
    /// Last observed state name per trigger.
    pub statenames: HashMap<String, String>,
    /// Set after a firing; prevents double-fire until reset.
    pub run: bool,
}

impl EvalState {
    pub fn new(dep: &Dependency) -> Self {
        let mut s = Self::default();
        for key in dep.dependencies.keys() {
            s.states.insert(key.clone(), false);
            s.completed.insert(key.clone(), false);
        }
        s
    }

    /// Clear every latch and the run flag.
    pub fn reset(&mut self) {
        for v in self.states.values_mut() {
            *v = false;
        }
        for v in self.completed.values_mut() {
            *v = false;
        }
        self.statenames.clear();
        self.run = false;
    }

    /// Feed one event through the latches.
    ///
    /// `owner_running` suppresses start-like firings (unless the
    /// dependency queues); `nfailures` is the owner controller's
    /// current failure count for budget checks.
    pub fn check(
        &mut self,
        d: &Dependency,
        e: &DepEvent,
        owner_running: bool,
        nfailures: u32,
    ) -> CheckOutcome {
        let mut out = CheckOutcome::default();

        // A manual success satisfies dependencies exactly like a
        // scheduled one.
        let state = if e.state == JState::ManualSuccess {
            JState::Success
        } else {
            e.state
        };
        let state_name = state.to_string();
        let event_id = e.id.to_string();

        for (key, union) in &d.dependencies {
            if *key != event_id && *key != e.name {
                continue;
            }
            out.matched = true;
            let accepted = union.split('|').any(|t| t.trim() == state_name);
            if accepted {
                self.statenames.insert(key.clone(), state_name.clone());
                self.states.insert(key.clone(), true);
                if state == JState::Success && d.action == DepAction::CompletedSuccess {
                    self.completed.insert(key.clone(), true);
                }
                if state == JState::Failed && d.action == DepAction::CompletedFailed {
                    out.add_failure = true;
                }
            } else {
                if state.is_terminal_bad() {
                    self.statenames.insert(key.clone(), state_name.clone());
                    out.dep_not_ok = true;
                    return out;
                }
                if d.update_dep {
                    self.states.insert(key.clone(), false);
                }
            }
        }
        if !out.matched {
            return out;
        }

        out.is_ok = match d.condition {
            DepCondition::All => d
                .dependencies
                .keys()
                .all(|k| self.states.get(k).copied().unwrap_or(false)),
            DepCondition::Any => {
                let n = d
                    .dependencies
                    .keys()
                    .filter(|k| self.states.get(*k).copied().unwrap_or(false))
                    .count() as u32;
                n >= d.required_n()
            }
        };

        if owner_running && d.action.is_start_like() {
            if !d.queue_jobs {
                self.reset();
            }
            out.is_ok = false;
        }

        if d.action == DepAction::Start && nfailures > d.n {
            self.reset();
            out.reset_failures = true;
            out.is_ok = false;
        }
        out
    }
}

#[cfg(test)]
#[path = "depend_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Alert intents.
//!
//! On every state change the engine asks whether the new state maps to
//! a configured alert; if so it builds an [`AlertEnvelope`] and hands
//! it to the alert channel fire-and-forget. Delivery (SMTP and
//! friends) is an external collaborator.

use crate::job::{JState, Job};
use crate::spec::{Alert, AlertActions};
use serde::{Deserialize, Serialize};

/// Pick the alert configured for a state, falling back to `OnChange`.
pub fn alert_for(actions: &AlertActions, state: JState) -> Option<&Alert> {
    let specific = match state {
        JState::Success | JState::ManualSuccess => actions.on_success.as_ref(),
        JState::Failed => actions.on_failure.as_ref(),
        JState::Stopped => actions.on_stopped.as_ref(),
        JState::End => actions.on_end.as_ref(),
        JState::Restart => actions.on_restart.as_ref(),
        JState::Retrying | JState::RetryWait => actions.on_retrying.as_ref(),
        JState::RetryFailed => actions.on_retry_failed.as_ref(),
        JState::Hold => actions.on_hold.as_ref(),
        JState::Warning | JState::MissedWarning => actions.on_warning.as_ref(),
        JState::DepFailed => actions.on_dep_failed.as_ref(),
        JState::DepWarning | JState::DepRetry => actions.on_dep_warning.as_ref(),
        _ => None,
    };
    specific.or(actions.on_change.as_ref())
}

/// Prepared alert payload, ready for any delivery channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEnvelope {
    pub name: String,
    pub group: String,
    pub tags: String,
    pub job_id: String,
    pub run_id: String,
    pub cmd_eval: String,
    pub cron_start: String,
    pub cron_end: String,
    pub cron_restart: String,
    pub state: String,
    pub prev_state: String,
    pub started: String,
    pub stopped: String,
    pub elapsed: String,
    pub exit_code: i32,
    pub alert: Alert,
}

/// Build the envelope for a job's current state, if one is configured.
pub fn build_envelope(job: &Job) -> Option<AlertEnvelope> {
    let cfg = job.lock_cfg();
    if cfg.alerts.is_empty() {
        return None;
    }
    let run = job.lock_run();
    let alert = alert_for(&cfg.alerts, run.state)?.clone();
    Some(AlertEnvelope {
        name: cfg.name.clone(),
        group: cfg.group.join("/"),
        tags: cfg.tags.join(","),
        job_id: job.id.to_string(),
        run_id: run.run_id.to_string(),
        cmd_eval: run.cmd_eval.clone(),
        cron_start: cfg.cron_start_spec.join(","),
        cron_end: cfg.cron_end_spec.join(","),
        cron_restart: cfg.cron_restart_spec.clone().unwrap_or_default(),
        state: run.state.to_string(),
        prev_state: run.prev_state.to_string(),
        started: run.started.clone(),
        stopped: run.prev_stop.clone(),
        elapsed: run.elapsed.clone(),
        exit_code: run.exit_code,
        alert,
    })
}

#[cfg(test)]
#[path = "alert_tests.rs"]
mod tests;

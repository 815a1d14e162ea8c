// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The job record: declarative config, runtime state, history.
//!
//! A `Job` pairs an immutable identity with two locked sections: the
//! declarative config (mutated only by reload, under the engine's
//! run-lock) and the runtime block (state machine, counters, history).
//! State changes go through [`Job::set_state`], which enforces the
//! transition legality table; an illegal transition is a logged no-op
//! error, never a panic.

use crate::cron::Cron;
use crate::depend::Dependency;
use crate::spec::{AlertActions, JobLogging, JobsControl, Permission};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Stable 128-bit job identity, assigned on first load and persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_nil()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-execution identity; regenerated for every run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("illegal state change {from} => {to}")]
    IllegalTransition { from: JState, to: JState },
}

/// Job states. Display strings are the wire/config vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JState {
    Running,
    Hold,
    Stopped,
    Failed,
    Ready,
    Retrying,
    RetryWait,
    RetryFailed,
    Success,
    End,
    Restart,
    Reset,
    Stopping,
    Unknown,
    Contingent,
    Warning,
    ConfigWarning,
    ConfigError,
    MissedWarning,
    MissedError,
    DepWarning,
    DepRetry,
    DepFailed,
    Manual,
    ManualSuccess,
    Updating,
    Updated,
}

impl std::fmt::Display for JState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JState::Running => "running",
            JState::Hold => "onhold",
            JState::Stopped => "stopped",
            JState::Failed => "failed",
            JState::Ready => "ready",
            JState::Retrying => "retrying",
            JState::RetryWait => "retrywait",
            JState::RetryFailed => "retryfailed",
            JState::Success => "success",
            JState::End => "end",
            JState::Restart => "restart",
            JState::Reset => "reset",
            JState::Stopping => "stopping",
            JState::Unknown => "unknown",
            JState::Contingent => "contingent",
            JState::Warning => "warning",
            JState::ConfigWarning => "configwarning",
            JState::ConfigError => "configerror",
            JState::MissedWarning => "missedwarning",
            JState::MissedError => "missed",
            JState::DepWarning => "depwarning",
            JState::DepRetry => "depretry",
            JState::DepFailed => "depfailed",
            JState::Manual => "manual",
            JState::ManualSuccess => "manualsuccess",
            JState::Updating => "updating",
            JState::Updated => "updated",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for JState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "running" => Ok(JState::Running),
            "onhold" | "hold" | "held" => Ok(JState::Hold),
            "stopped" => Ok(JState::Stopped),
            "failed" => Ok(JState::Failed),
            "ready" => Ok(JState::Ready),
            "retrying" => Ok(JState::Retrying),
            "retrywait" => Ok(JState::RetryWait),
            "retryfailed" => Ok(JState::RetryFailed),
            "success" => Ok(JState::Success),
            "end" => Ok(JState::End),
            "restart" => Ok(JState::Restart),
            "reset" => Ok(JState::Reset),
            "stopping" => Ok(JState::Stopping),
            "unknown" => Ok(JState::Unknown),
            "contingent" => Ok(JState::Contingent),
            "warning" => Ok(JState::Warning),
            "configwarning" => Ok(JState::ConfigWarning),
            "configerror" => Ok(JState::ConfigError),
            "missedwarning" => Ok(JState::MissedWarning),
            "missed" | "missederror" => Ok(JState::MissedError),
            "depwarning" => Ok(JState::DepWarning),
            "depretry" => Ok(JState::DepRetry),
            "depfailed" => Ok(JState::DepFailed),
            "manual" => Ok(JState::Manual),
            "manualsuccess" => Ok(JState::ManualSuccess),
            "updating" => Ok(JState::Updating),
            "updated" => Ok(JState::Updated),
            other => Err(format!("unknown job state: {}", other)),
        }
    }
}

impl JState {
    /// States an upstream job may be stuck in that mark a dependency as
    /// temporarily bad rather than merely unmatched.
    pub fn is_terminal_bad(&self) -> bool {
        matches!(
            self,
            JState::Failed
                | JState::Retrying
                | JState::Hold
                | JState::Stopped
                | JState::Warning
                | JState::DepWarning
                | JState::DepFailed
                | JState::DepRetry
        )
    }
}

/// Transition legality table.
pub fn is_valid_transition(from: JState, to: JState) -> bool {
    use JState::*;
    match to {
        Restart => from == Running,
        Running | Manual => matches!(
            from,
            Stopped
                | Success
                | ManualSuccess
                | Ready
                | Warning
                | Retrying
                | RetryWait
                | Hold
                | Contingent
                | End
                | Failed
                | Restart
                | RetryFailed
                | DepWarning
                | DepRetry
                | DepFailed
                | MissedError
                | MissedWarning
        ),
        Stopping => matches!(from, Running | Retrying),
        Stopped | Success | End | ManualSuccess => matches!(
            from,
            Stopping
                | Running
                | Manual
                | Retrying
                | RetryWait
                | Restart
                | Ready
                | Success
                | End
                | ManualSuccess
        ),
        Failed => matches!(from, Ready | Running | Stopping | RetryFailed | RetryWait),
        RetryFailed => matches!(from, Retrying | Running | Failed | Stopping),
        Retrying | RetryWait => matches!(from, Failed | RetryFailed | RetryWait),
        Hold | Ready | Contingent => matches!(
            from,
            Hold | Ready
                | Contingent
                | RetryFailed
                | Failed
                | Success
                | ManualSuccess
                | End
                | Stopped
                | Stopping
                | Warning
                | MissedError
                | MissedWarning
                | DepWarning
                | DepFailed
                | Unknown
        ),
        Reset | MissedError | MissedWarning => true,
        // Upstream-propagated states mark a job that is waiting on its
        // dependency; they never overwrite an active or stopped run.
        DepWarning | DepRetry | DepFailed => {
            !matches!(from, Running | Stopping | Stopped | End)
        }
        Unknown => matches!(from, Running | Retrying),
        Updating | Updated => true,
        Warning | ConfigWarning | ConfigError => true,
    }
}

/// Control message delivered to a running job.
#[derive(Debug, Clone, Copy)]
pub struct Ctl {
    pub killed: bool,
    pub code: JState,
}

/// User-supplied context for a manual action.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Reason {
    pub action: String,
    pub comment: String,
    pub user: String,
    pub timestamp: i64,
}

/// Concurrency policy derived from the `StartRule` spec field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartRule {
    /// Kill the running instance, then start (default).
    #[default]
    Restart,
    /// Start a new run concurrently with the current one.
    Start,
    /// Skip the trigger while a run is in flight.
    NoStart,
}

impl StartRule {
    pub fn parse(s: &str) -> Self {
        match s {
            "Start" => StartRule::Start,
            "NoStart" => StartRule::NoStart,
            _ => StartRule::Restart,
        }
    }

    pub fn concurrent(&self) -> bool {
        matches!(self, StartRule::Start)
    }
}

/// Immutable record of one completed run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobHistory {
    pub run_id: String,
    pub exit_code: i32,
    pub state: String,
    pub retry_attempt: u32,
    pub start: String,
    pub start_unix: i64,
    pub stop: String,
    pub elapsed: String,
    pub stdout: String,
    pub stderr: String,
    pub cmd_eval: String,
    pub unscheduled: bool,
    pub reason: Reason,
}

/// A log pair queued for retention-driven removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLog {
    pub prev_stop: DateTime<Utc>,
    pub files: Vec<PathBuf>,
}

/// Job kind from the `Type` spec field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobKind {
    #[default]
    Plain,
    /// A synthesized child of a controller.
    Child,
    /// A job whose work is orchestrating its children.
    Controller,
}

/// Declarative configuration; reload copies into this under the
/// engine's run-lock.
#[derive(Debug, Clone, Default)]
pub struct JobCfg {
    pub name: String,
    pub description: String,
    pub comment: String,
    pub kind: JobKind,
    pub tags: Vec<String>,
    pub group: Vec<String>,
    pub inherits: Option<String>,
    pub inheritance_chain: Vec<String>,

    pub cmd: Option<String>,
    pub shutdown_cmd: String,
    pub shutdown_sig: String,
    pub shell: String,
    pub env: Vec<String>,
    pub date_env: Vec<String>,
    pub exit_state: HashMap<i32, JState>,
    pub alerts: AlertActions,

    pub timezone: String,
    pub calendar: String,
    pub calendar_dirs: Vec<PathBuf>,
    pub rollback: bool,
    pub require_cal: bool,
    pub jitter: u32,

    pub cron_start_spec: Vec<String>,
    pub cron_end_spec: Vec<String>,
    pub cron_restart_spec: Option<String>,
    pub cron_start: Vec<Cron>,
    pub cron_end: Vec<Cron>,
    pub cron_restart: Option<Cron>,
    pub start_day: String,
    pub start_time: String,
    pub end_day: String,
    pub end_time: String,
    pub start_rule: StartRule,

    pub dependencies: Vec<Dependency>,
    pub jobs_control: JobsControl,

    pub retry: u32,
    pub retry_wait: String,
    pub retry_reset: String,
    pub max_duration: String,
    pub min_runtime: String,
    pub max_runtime: String,
    pub missed_reset: String,
    pub hold_on_missed: bool,
    pub hold_duration: String,

    pub tmp_dir: PathBuf,
    pub logging: JobLogging,

    pub host: String,
    pub user: String,
    pub admin: Vec<String>,
    pub permissions: Permission,

    pub max_history: usize,
    pub tick_interval_secs: u64,
    pub tick_missed_threshold_secs: u64,
}

impl JobCfg {
    /// The job's timezone (UTC fallback for unknown names).
    pub fn tz(&self) -> Tz {
        crate::clock::load_tz(&self.timezone)
    }

    /// Retry wait for attempt `n` (1-based): the n-th entry of the
    /// comma-delimited series, with the final entry reused beyond it.
    pub fn retry_wait_for(&self, attempt: u32) -> Duration {
        let waits: Vec<&str> = self.retry_wait.split(',').collect();
        let idx = (attempt.max(1) as usize - 1).min(waits.len() - 1);
        humantime::parse_duration(waits[idx].trim()).unwrap_or(Duration::ZERO)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        if self.max_duration.is_empty() {
            return None;
        }
        humantime::parse_duration(&self.max_duration).ok()
    }

    pub fn log_purge(&self) -> Option<Duration> {
        if self.logging.purge.is_empty() {
            return None;
        }
        humantime::parse_duration(&self.logging.purge).ok()
    }

    pub fn is_controller(&self) -> bool {
        self.kind == JobKind::Controller
    }

    pub fn is_child(&self) -> bool {
        self.kind == JobKind::Child
    }

    /// Start cron classification looks at the first array element.
    pub fn cron_is_dependent(&self) -> bool {
        self.cron_start.first().map(Cron::is_dependent).unwrap_or(false)
    }

    pub fn cron_is_null(&self) -> bool {
        self.cron_start.first().map(Cron::is_null).unwrap_or(true)
    }

    pub fn cron_is_every(&self) -> bool {
        self.cron_start.first().map(Cron::is_every).unwrap_or(false)
    }
}

/// Runtime state, serialized into snapshots.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub state: JState,
    pub prev_state: JState,
    pub hold: bool,
    pub contingent: bool,
    pub is_running: bool,
    pub unscheduled: bool,
    pub restarting: bool,
    pub updating: bool,
    pub retry_attempt: u32,
    pub exit_code: i32,
    pub pid: u32,
    pub run_id: RunId,
    pub cmd_eval: String,
    pub started: String,
    pub started_unix: i64,
    pub prev_start: String,
    pub prev_stop: String,
    pub elapsed: String,
    pub elapsed_secs: i64,
    pub next_start: String,
    pub next_start_unix: i64,
    pub modified: i64,
    pub reason: Reason,
    pub history: Vec<JobHistory>,
    pub stdout_file: PathBuf,
    pub stderr_file: PathBuf,
    /// Log pairs awaiting retention removal, oldest first.
    pub purge_queue: Vec<JobLog>,
    /// Controller failure counter for `completed_failed` budgets.
    pub nfailures: u32,
}

impl Default for JobRun {
    fn default() -> Self {
        Self {
            state: JState::Ready,
            prev_state: JState::Ready,
            hold: false,
            contingent: false,
            is_running: false,
            unscheduled: false,
            restarting: false,
            updating: false,
            retry_attempt: 0,
            exit_code: 0,
            pid: 0,
            run_id: RunId::default(),
            cmd_eval: String::new(),
            started: String::new(),
            started_unix: 0,
            prev_start: String::new(),
            prev_stop: String::new(),
            elapsed: String::new(),
            elapsed_secs: 0,
            next_start: String::new(),
            next_start_unix: 0,
            modified: 0,
            reason: Reason::default(),
            history: Vec::new(),
            stdout_file: PathBuf::new(),
            stderr_file: PathBuf::new(),
            purge_queue: Vec::new(),
            nfailures: 0,
        }
    }
}

/// One job: identity plus its two locked sections.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub cfg: Mutex<JobCfg>,
    pub run: Mutex<JobRun>,
}

impl Job {
    pub fn new(id: JobId, cfg: JobCfg) -> Self {
        Self {
            id,
            cfg: Mutex::new(cfg),
            run: Mutex::new(JobRun::default()),
        }
    }

    pub fn name(&self) -> String {
        self.lock_cfg().name.clone()
    }

    pub fn lock_cfg(&self) -> std::sync::MutexGuard<'_, JobCfg> {
        self.cfg.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn lock_run(&self) -> std::sync::MutexGuard<'_, JobRun> {
        self.run.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> JState {
        self.lock_run().state
    }

    pub fn hold(&self) -> bool {
        self.lock_run().hold
    }

    pub fn set_hold(&self, hold: bool) {
        let mut run = self.lock_run();
        run.hold = hold;
        run.modified = Utc::now().timestamp();
    }

    pub fn is_running(&self) -> bool {
        self.lock_run().is_running
    }

    pub fn pid(&self) -> u32 {
        self.lock_run().pid
    }

    pub fn set_retry_attempt(&self, attempt: u32) {
        let mut run = self.lock_run();
        run.retry_attempt = attempt;
        run.modified = Utc::now().timestamp();
    }

    /// Apply a state change through the legality table. Same-state sets
    /// are silently accepted; illegal ones error without mutating.
    pub fn set_state(&self, to: JState) -> Result<(), JobError> {
        let max_history = self.lock_cfg().max_history;
        let mut run = self.lock_run();
        if run.state == to {
            return Ok(());
        }
        if !is_valid_transition(run.state, to) {
            tracing::warn!(job = %self.id, from = %run.state, to = %to, "illegal state change");
            return Err(JobError::IllegalTransition {
                from: run.state,
                to,
            });
        }
        run.prev_state = run.state;
        run.state = to;
        run.modified = Utc::now().timestamp();

        if matches!(
            to,
            JState::Success
                | JState::ManualSuccess
                | JState::End
                | JState::Failed
                | JState::RetryFailed
                | JState::Hold
                | JState::MissedWarning
                | JState::DepWarning
                | JState::DepFailed
        ) {
            push_history(&mut run, max_history);
        }
        tracing::debug!(job = %self.id, from = %run.prev_state, to = %to, "state change");
        Ok(())
    }

    /// Record the next fire on the runtime block. `None` displays the
    /// schedule kind instead of an instant.
    pub fn set_next_start(&self, next: Option<DateTime<Tz>>) {
        let (dependent, is_null, every) = {
            let cfg = self.lock_cfg();
            (cfg.cron_is_dependent(), cfg.cron_is_null(), cfg.cron_is_every())
        };
        let mut run = self.lock_run();
        match next {
            Some(t) if !(is_null || dependent) || every => {
                run.next_start = t.format("%Y-%m-%d %H:%M:%S").to_string();
                run.next_start_unix = t.timestamp();
            }
            _ => {
                run.next_start = if dependent { "@depends" } else { "@manual" }.to_string();
                run.next_start_unix = i64::MAX;
            }
        }
        run.modified = Utc::now().timestamp();
    }

    /// Controls available to a client in the current state.
    pub fn available_controls(&self) -> Vec<&'static str> {
        let cfg = self.lock_cfg();
        let run = self.lock_run();
        if cfg.is_child() {
            if run.state == JState::Running {
                return vec!["stop", "info"];
            }
            return vec!["info"];
        }
        match run.state {
            JState::Hold
            | JState::MissedWarning
            | JState::MissedError
            | JState::Warning
            | JState::DepWarning => {
                if run.hold {
                    vec!["hold", "info"]
                } else {
                    vec!["hold", "start", "info"]
                }
            }
            JState::RetryWait | JState::DepRetry => vec!["stop", "start"],
            JState::Running => vec!["stop", "restart", "info"],
            JState::Stopped | JState::Failed | JState::RetryFailed | JState::DepFailed => {
                vec!["hold", "info"]
            }
            JState::Ready | JState::Success | JState::ManualSuccess | JState::End => {
                vec!["start", "hold", "info"]
            }
            _ => vec!["info"],
        }
    }

    /// Per-action ACL: the owner and admins may do anything; otherwise
    /// the action's user list in the permission map decides.
    pub fn has_permission(&self, user: &str, action: &str) -> bool {
        let cfg = self.lock_cfg();
        if user == cfg.user || cfg.admin.iter().any(|a| a == user) {
            return true;
        }
        cfg.permissions
            .get(action)
            .map(|users| users.iter().any(|u| u == user))
            .unwrap_or(false)
    }

    /// Snapshot of the user-visible fields for the update bus.
    pub fn update_params(&self) -> JobUpdate {
        let controls = self
            .available_controls()
            .iter()
            .map(|s| s.to_string())
            .collect();
        let cfg = self.lock_cfg();
        let run = self.lock_run();
        JobUpdate {
            id: self.id,
            name: cfg.name.clone(),
            modified: run.modified,
            run_id: run.run_id,
            cron_start: cfg.cron_start_spec.join(","),
            cron_end: cfg.cron_end_spec.join(","),
            cron_restart: cfg.cron_restart_spec.clone().unwrap_or_default(),
            timezone: cfg.timezone.clone(),
            calendar: cfg.calendar.clone(),
            rollback: cfg.rollback,
            require_cal: cfg.require_cal,
            prev_start: run.prev_start.clone(),
            prev_stop: run.prev_stop.clone(),
            elapsed: run.elapsed.clone(),
            started: run.started.clone(),
            started_unix: run.started_unix,
            next_start: run.next_start.clone(),
            next_start_unix: run.next_start_unix,
            hold: run.hold,
            state: run.state,
            state_str: run.state.to_string(),
            prev_state: run.prev_state,
            prev_state_str: run.prev_state.to_string(),
            updating: run.updating,
            retry: cfg.retry,
            retry_attempt: run.retry_attempt,
            pid: run.pid,
            unscheduled: run.unscheduled,
            reason: run.reason.clone(),
            controls,
            history: run.history.clone(),
        }
    }
}

fn push_history(run: &mut JobRun, max_history: usize) {
    let entry = JobHistory {
        run_id: run.run_id.to_string(),
        exit_code: run.exit_code,
        state: run.state.to_string(),
        retry_attempt: run.retry_attempt,
        start: run.started.clone(),
        start_unix: run.started_unix,
        stop: run.prev_stop.clone(),
        elapsed: run.elapsed.clone(),
        stdout: run.stdout_file.display().to_string(),
        stderr: run.stderr_file.display().to_string(),
        cmd_eval: run.cmd_eval.clone(),
        unscheduled: run.unscheduled,
        reason: run.reason.clone(),
    };
    run.history.insert(0, entry);
    run.history.truncate(max_history.max(1));
}

/// A per-job snapshot delta broadcast to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobUpdate {
    pub id: JobId,
    pub name: String,
    pub modified: i64,
    pub run_id: RunId,
    pub cron_start: String,
    pub cron_end: String,
    pub cron_restart: String,
    pub timezone: String,
    pub calendar: String,
    pub rollback: bool,
    pub require_cal: bool,
    pub prev_start: String,
    pub prev_stop: String,
    pub elapsed: String,
    pub started: String,
    pub started_unix: i64,
    pub next_start: String,
    pub next_start_unix: i64,
    pub hold: bool,
    pub state: JState,
    pub state_str: String,
    pub prev_state: JState,
    pub prev_state_str: String,
    pub updating: bool,
    pub retry: u32,
    pub retry_attempt: u32,
    pub pid: u32,
    pub unscheduled: bool,
    pub reason: Reason,
    pub controls: Vec<String>,
    pub history: Vec<JobHistory>,
}

/// Format an elapsed duration for display, rounded to seconds.
pub fn fmt_elapsed(d: Duration) -> String {
    humantime::format_duration(Duration::from_secs(d.as_secs())).to_string()
}

/// Format an instant in the job timezone for display fields.
pub fn fmt_instant(t: DateTime<Utc>, tz: Tz) -> String {
    t.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;

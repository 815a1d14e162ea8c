// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The job-file surface: `JobSpec` and friends.
//!
//! Two interchangeable syntaxes encode the same model: a JSON array of
//! specs, or an XML `<Jobs>` document of `<JobSpec>` elements. Only
//! `Name` is required; everything else is optional and may come from
//! an inherited template.

use crate::depend::Dependency;
use crate::job::{JState, JobId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-action ACL: action name -> users allowed.
pub type Permission = HashMap<String, Vec<String>>;

/// Log file controls for a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobLogging {
    #[serde(rename = "StdoutFile", default, skip_serializing_if = "String::is_empty")]
    pub stdout_file: String,

    #[serde(rename = "StderrFile", default, skip_serializing_if = "String::is_empty")]
    pub stderr_file: String,

    #[serde(rename = "Append", default, skip_serializing_if = "is_false")]
    pub append: bool,

    /// Retention duration; empty keeps logs forever.
    #[serde(rename = "Purge", default, skip_serializing_if = "String::is_empty")]
    pub purge: String,
}

/// Extra controls for a controller (job-of-jobs) parent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobsControl {
    /// Delay between a child finishing and the next child starting.
    #[serde(rename = "Delay", default, skip_serializing_if = "String::is_empty")]
    pub delay: String,

    #[serde(rename = "MaxConcurrent", default, skip_serializing_if = "is_zero")]
    pub max_concurrent: u32,

    /// Child failures tolerated before the parent fails.
    #[serde(rename = "MaxFailures", default, skip_serializing_if = "is_zero")]
    pub max_failures: u32,
}

/// One alert destination; the core only builds the envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    #[serde(rename = "To", default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,

    #[serde(rename = "CC", default, skip_serializing_if = "Vec::is_empty")]
    pub cc: Vec<String>,

    #[serde(rename = "BCC", default, skip_serializing_if = "Vec::is_empty")]
    pub bcc: Vec<String>,

    #[serde(rename = "From", default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    #[serde(rename = "Subject", default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    #[serde(rename = "Message", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(rename = "Priority", default, skip_serializing_if = "is_zero")]
    pub priority: u32,

    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(rename = "Endpoint", default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// State-change alert hooks. Zero or more may be set; `OnChange` is a
/// catch-all consulted when no specific hook matches.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AlertActions {
    #[serde(rename = "OnSuccess", default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<Alert>,
    #[serde(rename = "OnFailure", default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<Alert>,
    #[serde(rename = "OnStopped", default, skip_serializing_if = "Option::is_none")]
    pub on_stopped: Option<Alert>,
    #[serde(rename = "OnEnd", default, skip_serializing_if = "Option::is_none")]
    pub on_end: Option<Alert>,
    #[serde(rename = "OnRestart", default, skip_serializing_if = "Option::is_none")]
    pub on_restart: Option<Alert>,
    #[serde(rename = "OnRetrying", default, skip_serializing_if = "Option::is_none")]
    pub on_retrying: Option<Alert>,
    #[serde(rename = "OnRetryFailed", default, skip_serializing_if = "Option::is_none")]
    pub on_retry_failed: Option<Alert>,
    #[serde(rename = "OnHold", default, skip_serializing_if = "Option::is_none")]
    pub on_hold: Option<Alert>,
    #[serde(rename = "OnWarning", default, skip_serializing_if = "Option::is_none")]
    pub on_warning: Option<Alert>,
    #[serde(rename = "OnDepFailed", default, skip_serializing_if = "Option::is_none")]
    pub on_dep_failed: Option<Alert>,
    #[serde(rename = "OnDepWarning", default, skip_serializing_if = "Option::is_none")]
    pub on_dep_warning: Option<Alert>,
    #[serde(rename = "OnChange", default, skip_serializing_if = "Option::is_none")]
    pub on_change: Option<Alert>,

    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(rename = "Endpoint", default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(rename = "MaxLogLines", default, skip_serializing_if = "Option::is_none")]
    pub max_log_lines: Option<u32>,
}

impl AlertActions {
    pub fn is_empty(&self) -> bool {
        self.on_success.is_none()
            && self.on_failure.is_none()
            && self.on_stopped.is_none()
            && self.on_end.is_none()
            && self.on_restart.is_none()
            && self.on_retrying.is_none()
            && self.on_retry_failed.is_none()
            && self.on_hold.is_none()
            && self.on_warning.is_none()
            && self.on_dep_failed.is_none()
            && self.on_dep_warning.is_none()
            && self.on_change.is_none()
    }
}

/// Reset hooks (auto-unhold durations per failure class).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResetSpec {
    #[serde(rename = "Failed", default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<String>,
    #[serde(rename = "Missed", default, skip_serializing_if = "Option::is_none")]
    pub missed: Option<String>,
    #[serde(rename = "Hold", default, skip_serializing_if = "Option::is_none")]
    pub hold: Option<String>,
}

/// One declarative job. Field names match the file surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobSpec {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "Comment", default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    /// `template` | `JOJ` | `CONTROLLER` | absent.
    #[serde(rename = "Type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(rename = "Tags", default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,

    #[serde(rename = "Group", default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Vec<String>>,

    #[serde(rename = "Inherits", default, skip_serializing_if = "Option::is_none")]
    pub inherits: Option<String>,

    #[serde(rename = "Hold", default, skip_serializing_if = "Option::is_none")]
    pub hold: Option<bool>,

    #[serde(rename = "Disabled", default, skip_serializing_if = "is_false")]
    pub disabled: bool,

    #[serde(rename = "Hidden", default, skip_serializing_if = "is_false")]
    pub hidden: bool,

    #[serde(rename = "Shell", default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    #[serde(rename = "Cmd", default, skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,

    #[serde(rename = "ShutdownCmd", default, skip_serializing_if = "Option::is_none")]
    pub shutdown_cmd: Option<String>,

    /// `SIGINT` | `Interrupt` | `SIGKILL` | `Kill`.
    #[serde(rename = "ShutdownSig", default, skip_serializing_if = "Option::is_none")]
    pub shutdown_sig: Option<String>,

    #[serde(rename = "Env", default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,

    #[serde(rename = "DateEnv", default, skip_serializing_if = "Option::is_none")]
    pub date_env: Option<Vec<String>>,

    /// `exit-code=state` overrides, e.g. `"2=warning"`.
    #[serde(rename = "ExitState", default, skip_serializing_if = "Option::is_none")]
    pub exit_state: Option<Vec<String>>,

    #[serde(rename = "AlertActions", default, skip_serializing_if = "Option::is_none")]
    pub alert_actions: Option<AlertActions>,

    /// Sequential children; presence makes this spec a controller.
    #[serde(rename = "Jobs", default, skip_serializing_if = "Option::is_none")]
    pub jobs: Option<Vec<JobSpec>>,

    #[serde(rename = "JobsControl", default, skip_serializing_if = "Option::is_none")]
    pub jobs_control: Option<JobsControl>,

    #[serde(rename = "Timezone", default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,

    #[serde(rename = "Calendar", default, skip_serializing_if = "Option::is_none")]
    pub calendar: Option<String>,

    #[serde(rename = "CalendarDirs", default, skip_serializing_if = "Option::is_none")]
    pub calendar_dirs: Option<Vec<String>>,

    #[serde(rename = "Rollback", default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<bool>,

    #[serde(rename = "RequireCal", default, skip_serializing_if = "Option::is_none")]
    pub require_cal: Option<bool>,

    #[serde(rename = "CronStart", default, skip_serializing_if = "Option::is_none")]
    pub cron_start: Option<Vec<String>>,

    #[serde(rename = "CronEnd", default, skip_serializing_if = "Option::is_none")]
    pub cron_end: Option<Vec<String>>,

    #[serde(rename = "CronRestart", default, skip_serializing_if = "Option::is_none")]
    pub cron_restart: Option<String>,

    #[serde(rename = "StartDay", default, skip_serializing_if = "Option::is_none")]
    pub start_day: Option<String>,

    #[serde(rename = "StartTime", default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    #[serde(rename = "EndDay", default, skip_serializing_if = "Option::is_none")]
    pub end_day: Option<String>,

    #[serde(rename = "EndTime", default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,

    /// `Restart` | `Start` | `NoStart`.
    #[serde(rename = "StartRule", default, skip_serializing_if = "Option::is_none")]
    pub start_rule: Option<String>,

    /// Uniform random seconds added to every computed fire.
    #[serde(rename = "Jitter", default, skip_serializing_if = "Option::is_none")]
    pub jitter: Option<u32>,

    #[serde(rename = "Retry", default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<u32>,

    /// Comma-delimited backoff series; the last entry repeats.
    #[serde(rename = "RetryWait", default, skip_serializing_if = "Option::is_none")]
    pub retry_wait: Option<String>,

    #[serde(rename = "RetryReset", default, skip_serializing_if = "Option::is_none")]
    pub retry_reset: Option<String>,

    #[serde(rename = "MaxDuration", default, skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<String>,

    #[serde(rename = "MinRuntime", default, skip_serializing_if = "Option::is_none")]
    pub min_runtime: Option<String>,

    #[serde(rename = "MaxRuntime", default, skip_serializing_if = "Option::is_none")]
    pub max_runtime: Option<String>,

    #[serde(rename = "MissedReset", default, skip_serializing_if = "Option::is_none")]
    pub missed_reset: Option<String>,

    #[serde(rename = "Reset", default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<ResetSpec>,

    #[serde(rename = "HoldOnMissed", default, skip_serializing_if = "Option::is_none")]
    pub hold_on_missed: Option<bool>,

    #[serde(rename = "HoldDuration", default, skip_serializing_if = "Option::is_none")]
    pub hold_duration: Option<String>,

    #[serde(rename = "Dependency", default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<Vec<Dependency>>,

    #[serde(rename = "TmpDir", default, skip_serializing_if = "Option::is_none")]
    pub tmp_dir: Option<String>,

    #[serde(rename = "Logging", default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<JobLogging>,

    #[serde(rename = "Host", default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(rename = "User", default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(rename = "Permissions", default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permission>,

    #[serde(rename = "Admin", default, skip_serializing_if = "Option::is_none")]
    pub admin: Option<Vec<String>>,

    /// Assigned on first load and written back; links a job with its
    /// history and dependencies. Do not edit.
    #[serde(rename = "JobUUID", default, skip_serializing_if = "JobId::is_zero")]
    pub job_uuid: JobId,

    /// Resolved template lineage, root first. Loader-populated; never
    /// read from or written to files.
    #[serde(skip)]
    pub inheritance_chain: Vec<String>,
}

impl JobSpec {
    pub fn is_template(&self) -> bool {
        self.kind
            .as_deref()
            .map(|k| k.eq_ignore_ascii_case("template"))
            .unwrap_or(false)
    }

    pub fn is_controller(&self) -> bool {
        self.jobs.as_ref().map(|j| !j.is_empty()).unwrap_or(false)
            || self
                .kind
                .as_deref()
                .map(|k| k.eq_ignore_ascii_case("controller"))
                .unwrap_or(false)
    }
}

/// XML document wrapper: `<Jobs><JobSpec>...</JobSpec></Jobs>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename = "Jobs")]
pub struct JobsDoc {
    #[serde(rename = "JobSpec", default)]
    pub jobs: Vec<JobSpec>,
}

/// Parse `"code=state"` exit overrides into a map; bad entries are
/// skipped with a warning.
pub fn exit_state_map(entries: &[String]) -> HashMap<i32, JState> {
    let mut map = HashMap::new();
    for entry in entries {
        let Some((code, state)) = entry.split_once('=') else {
            tracing::warn!(entry = %entry, "malformed ExitState entry");
            continue;
        };
        match (code.trim().parse::<i32>(), state.trim().parse::<JState>()) {
            (Ok(code), Ok(state)) => {
                map.insert(code, state);
            }
            _ => tracing::warn!(entry = %entry, "malformed ExitState entry"),
        }
    }
    map
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

#[cfg(test)]
#[path = "spec_tests.rs"]
mod tests;

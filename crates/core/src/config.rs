// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Config loading: job files to runnable job configs.
//!
//! Files parse (JSON or XML by extension) into flat spec arrays.
//! Template specs resolve through their `Inherits` chains root-down,
//! non-template specs overlay their resolved template, controllers
//! synthesize the dependency graph that sequences their children, and
//! fresh ids are written back to the files. The reload diff compares
//! the mutable field subset so unchanged jobs are left untouched.

use crate::cron::{parse_day_and_time, Cron, CronContext, CronError, CronSchedule};
use crate::depend::{DepAction, DepCondition, Dependency};
use crate::job::{JobCfg, JobId, JobKind, StartRule};
use crate::spec::{exit_state_map, JobSpec, JobsDoc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("jobs file parse error ({path}): {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("job '{job}': {source}")]
    Cron {
        job: String,
        #[source]
        source: CronError,
    },

    #[error("duplicate job name '{0}'")]
    DuplicateName(String),
}

/// A validation finding; errors demote the job to disabled-with-error
/// instead of crashing the server.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub job: String,
    pub error: bool,
    pub message: String,
}

/// Server-level defaults threaded into every job config.
#[derive(Debug, Clone)]
pub struct LoadDefaults {
    pub max_history: usize,
    pub tick_interval_secs: u64,
    pub tick_missed_threshold_secs: u64,
    pub calendar_dirs: Vec<PathBuf>,
    pub tmp_dir: PathBuf,
    /// Server-wide log retention applied when a job sets none.
    pub log_purge: String,
}

impl Default for LoadDefaults {
    fn default() -> Self {
        Self {
            max_history: 10,
            tick_interval_secs: 30,
            tick_missed_threshold_secs: 15,
            calendar_dirs: Vec::new(),
            tmp_dir: std::env::temp_dir().join("rpeat"),
            log_purge: String::new(),
        }
    }
}

/// One job ready for registration.
#[derive(Debug, Clone)]
pub struct LoadedJob {
    pub id: JobId,
    pub cfg: JobCfg,
    pub hold: bool,
    pub disabled: bool,
    pub issues: Vec<ValidationIssue>,
}

/// The resolved job set for a server.
#[derive(Debug, Default)]
pub struct LoadOutput {
    pub jobs: Vec<LoadedJob>,
    pub order: Vec<JobId>,
    pub groups: HashMap<String, Vec<JobId>>,
    pub group_order: Vec<String>,
    pub warnings: Vec<String>,
}

/// Lowercased name with spaces collapsed to hyphens; the secondary
/// lookup key for every control op.
pub fn slugify(s: &str) -> String {
    s.to_lowercase().replace(' ', "-")
}

/// Parse one jobs file; the extension selects the syntax.
pub fn parse_spec_file(path: &Path) -> Result<Vec<JobSpec>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    if is_xml(path) {
        let doc: JobsDoc = quick_xml::de::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(doc.jobs)
    } else {
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: json_parse_hint(&e),
        })
    }
}

/// Write specs back (with assigned ids) in the file's own syntax.
pub fn write_spec_file(path: &Path, specs: &[JobSpec]) -> Result<(), ConfigError> {
    let text = if is_xml(path) {
        let doc = JobsDoc {
            jobs: specs.to_vec(),
        };
        quick_xml::se::to_string(&doc).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
    } else {
        serde_json::to_string_pretty(specs).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
    };
    std::fs::write(path, text).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn is_xml(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("xml"))
        .unwrap_or(false)
}

/// Point at the offending line for the common JSON mistakes.
fn json_parse_hint(e: &serde_json::Error) -> String {
    let mut reason = format!("{} (line {}, column {})", e, e.line(), e.column());
    let msg = e.to_string();
    for (needle, hint) in [
        ("expected `,`", "check for a missing comma on the previous line"),
        ("trailing comma", "remove the trailing comma"),
        ("expected value", "the job specification must be a JSON array of jobs"),
        ("invalid type: map", "wrap your job(s) in a JSON array"),
    ] {
        if msg.contains(needle) {
            reason = format!("{} -- suggestion: {}", reason, hint);
            break;
        }
    }
    reason
}

/// Merge `over` onto `base`: set fields in `over` win, `Env`/`DateEnv`
/// concatenate base-first so later entries may reference earlier ones.
fn merge_spec(base: &JobSpec, over: &JobSpec) -> JobSpec {
    let mut out = base.clone();
    out.name = over.name.clone();
    out.job_uuid = over.job_uuid;
    out.disabled = over.disabled;
    out.hidden = over.hidden;
    // Children and kind never inherit from a template.
    out.jobs = over.jobs.clone();
    out.jobs_control = over.jobs_control.clone();
    out.kind = over.kind.clone();
    out.inherits = over.inherits.clone();

    macro_rules! take {
        ($($field:ident),+) => {
            $(if over.$field.is_some() { out.$field = over.$field.clone(); })+
        };
    }
    take!(
        description, comment, tags, group, hold, shell, cmd, shutdown_cmd, shutdown_sig,
        exit_state, alert_actions, timezone, calendar, calendar_dirs, rollback, require_cal,
        cron_start, cron_end, cron_restart, start_day, start_time, end_day, end_time,
        start_rule, jitter, retry, retry_wait, retry_reset, max_duration, min_runtime,
        max_runtime, missed_reset, reset, hold_on_missed, hold_duration, dependency, tmp_dir,
        logging, host, user, permissions, admin
    );

    match (&base.env, &over.env) {
        (Some(b), Some(o)) => {
            let mut env = b.clone();
            env.extend(o.iter().cloned());
            out.env = Some(env);
        }
        (None, Some(o)) => out.env = Some(o.clone()),
        _ => {}
    }
    match (&base.date_env, &over.date_env) {
        (Some(b), Some(o)) => {
            let mut env = b.clone();
            env.extend(o.iter().cloned());
            out.date_env = Some(env);
        }
        (None, Some(o)) => out.date_env = Some(o.clone()),
        _ => {}
    }
    out
}

/// Resolve every template across all files: first definition of a name
/// wins, inheritance chains apply root-down.
pub fn load_templates(
    files: &[(PathBuf, Vec<JobSpec>)],
) -> (HashMap<String, JobSpec>, Vec<String>) {
    let mut warnings = Vec::new();
    let mut raw: HashMap<String, (JobSpec, PathBuf)> = HashMap::new();
    for (path, specs) in files {
        for spec in specs {
            if !spec.is_template() {
                continue;
            }
            if let Some((_, prev)) = raw.get(&spec.name) {
                warnings.push(format!(
                    "template '{}' skipped in {} - previously defined in {}",
                    spec.name,
                    path.display(),
                    prev.display()
                ));
                continue;
            }
            raw.insert(spec.name.clone(), (spec.clone(), path.clone()));
        }
    }

    let mut resolved = HashMap::new();
    for name in raw.keys() {
        // Walk the chain to the root, guarding against cycles.
        let mut chain = vec![name.clone()];
        let mut cursor = raw[name].0.inherits.clone();
        while let Some(parent) = cursor {
            if chain.contains(&parent) {
                warnings.push(format!("template '{}' has a cyclic Inherits chain", name));
                break;
            }
            let Some((parent_spec, _)) = raw.get(&parent) else {
                warnings.push(format!(
                    "template '{}' not found for '{}'",
                    parent, name
                ));
                break;
            };
            chain.insert(0, parent.clone());
            cursor = parent_spec.inherits.clone();
        }

        let mut merged = JobSpec {
            name: name.clone(),
            ..JobSpec::default()
        };
        for link in &chain {
            if let Some((spec, _)) = raw.get(link) {
                let mut spec = spec.clone();
                spec.name = name.clone();
                merged = merge_spec(&merged, &spec);
            }
        }
        merged.kind = Some("template".to_string());
        merged.disabled = true;
        merged.inherits = raw[name].0.inherits.clone();
        merged.inheritance_chain = chain;
        resolved.insert(name.clone(), merged);
    }
    (resolved, warnings)
}

/// Turn one resolved spec into a runnable config. Parses schedules;
/// schedule errors are returned so the caller can demote the job.
pub fn build_cfg(
    spec: &JobSpec,
    templates: &HashMap<String, JobSpec>,
    defaults: &LoadDefaults,
) -> (JobCfg, Vec<ValidationIssue>) {
    let mut issues = Vec::new();

    let resolved = match spec.inherits.as_ref().and_then(|i| templates.get(i)) {
        Some(template) => merge_spec(template, spec),
        None => {
            if let Some(inherits) = &spec.inherits {
                if !spec.is_template() {
                    issues.push(ValidationIssue {
                        job: spec.name.clone(),
                        error: false,
                        message: format!("template '{}' not found", inherits),
                    });
                }
            }
            spec.clone()
        }
    };

    let mut cfg = JobCfg {
        name: resolved.name.clone(),
        description: resolved.description.clone().unwrap_or_default(),
        comment: resolved.comment.clone().unwrap_or_default(),
        kind: match resolved.kind.as_deref() {
            Some(k) if k.eq_ignore_ascii_case("controller") => JobKind::Controller,
            Some(k) if k.eq_ignore_ascii_case("joj") => JobKind::Child,
            _ if resolved.jobs.as_ref().map(|j| !j.is_empty()).unwrap_or(false) => {
                JobKind::Controller
            }
            _ => JobKind::Plain,
        },
        tags: resolved.tags.clone().unwrap_or_default(),
        group: resolved
            .group
            .clone()
            .unwrap_or_else(|| vec![String::new()]),
        inherits: resolved.inherits.clone(),
        inheritance_chain: spec
            .inherits
            .as_ref()
            .and_then(|i| templates.get(i))
            .map(|t| t.inheritance_chain.clone())
            .unwrap_or_default(),
        cmd: resolved.cmd.clone(),
        shutdown_cmd: resolved.shutdown_cmd.clone().unwrap_or_default(),
        shutdown_sig: resolved.shutdown_sig.clone().unwrap_or_default(),
        shell: resolved.shell.clone().unwrap_or_default(),
        env: resolved.env.clone().unwrap_or_default(),
        date_env: resolved.date_env.clone().unwrap_or_default(),
        exit_state: exit_state_map(&resolved.exit_state.clone().unwrap_or_default()),
        alerts: resolved.alert_actions.clone().unwrap_or_default(),
        timezone: resolved.timezone.clone().unwrap_or_else(|| "UTC".into()),
        calendar: resolved.calendar.clone().unwrap_or_default(),
        calendar_dirs: resolved
            .calendar_dirs
            .clone()
            .map(|dirs| dirs.into_iter().map(PathBuf::from).collect())
            .unwrap_or_else(|| defaults.calendar_dirs.clone()),
        rollback: resolved.rollback.unwrap_or(false),
        require_cal: resolved.require_cal.unwrap_or(false),
        jitter: resolved.jitter.unwrap_or(0),
        cron_start_spec: resolved.cron_start.clone().unwrap_or_default(),
        cron_end_spec: resolved.cron_end.clone().unwrap_or_default(),
        cron_restart_spec: resolved.cron_restart.clone(),
        cron_start: Vec::new(),
        cron_end: Vec::new(),
        cron_restart: None,
        start_day: resolved.start_day.clone().unwrap_or_default(),
        start_time: resolved.start_time.clone().unwrap_or_default(),
        end_day: resolved.end_day.clone().unwrap_or_default(),
        end_time: resolved.end_time.clone().unwrap_or_default(),
        start_rule: StartRule::parse(resolved.start_rule.as_deref().unwrap_or_default()),
        dependencies: resolved.dependency.clone().unwrap_or_default(),
        jobs_control: resolved.jobs_control.clone().unwrap_or_default(),
        retry: resolved.retry.unwrap_or(0),
        retry_wait: resolved.retry_wait.clone().unwrap_or_default(),
        retry_reset: resolved.retry_reset.clone().unwrap_or_default(),
        max_duration: resolved.max_duration.clone().unwrap_or_default(),
        min_runtime: resolved.min_runtime.clone().unwrap_or_default(),
        max_runtime: resolved.max_runtime.clone().unwrap_or_default(),
        missed_reset: resolved.missed_reset.clone().unwrap_or_default(),
        hold_on_missed: resolved.hold_on_missed.unwrap_or(true),
        hold_duration: resolved.hold_duration.clone().unwrap_or_default(),
        tmp_dir: resolved
            .tmp_dir
            .clone()
            .map(PathBuf::from)
            .unwrap_or_else(|| defaults.tmp_dir.clone()),
        logging: {
            let mut logging = resolved.logging.clone().unwrap_or_default();
            if logging.purge.is_empty() {
                logging.purge = defaults.log_purge.clone();
            }
            logging
        },
        host: resolved.host.clone().unwrap_or_default(),
        user: resolved.user.clone().unwrap_or_default(),
        admin: resolved.admin.clone().unwrap_or_default(),
        permissions: resolved.permissions.clone().unwrap_or_default(),
        max_history: defaults.max_history,
        tick_interval_secs: defaults.tick_interval_secs,
        tick_missed_threshold_secs: defaults.tick_missed_threshold_secs,
    };

    if let Err(e) = parse_schedules(&mut cfg) {
        issues.push(ValidationIssue {
            job: cfg.name.clone(),
            error: true,
            message: e.to_string(),
        });
    }
    issues.extend(validate_cfg(&cfg));
    (cfg, issues)
}

/// (Re-)parse a config's schedule strings into crons.
pub fn parse_schedules(cfg: &mut JobCfg) -> Result<(), CronError> {
    let ctx = CronContext {
        timezone: cfg.timezone.clone(),
        calendar: cfg.calendar.clone(),
        calendar_dirs: cfg.calendar_dirs.clone(),
        rollback: cfg.rollback,
        require_cal: cfg.require_cal,
        jitter: cfg.jitter,
    };

    if !cfg.start_time.is_empty() {
        let (crons, spec) = parse_day_and_time(&cfg.start_day, &cfg.start_time, &ctx)?;
        cfg.cron_start = crons;
        cfg.cron_start_spec = spec.split(',').map(String::from).collect();
    } else if cfg.cron_start_spec.is_empty() {
        cfg.cron_start = vec![Cron::null()];
    } else {
        cfg.cron_start = Cron::parse_array(&cfg.cron_start_spec, &ctx)?;
    }

    if !cfg.end_time.is_empty() {
        let (crons, spec) = parse_day_and_time(&cfg.end_day, &cfg.end_time, &ctx)?;
        cfg.cron_end = crons;
        cfg.cron_end_spec = spec.split(',').map(String::from).collect();
    } else if cfg.cron_end_spec.is_empty() {
        cfg.cron_end = Vec::new();
    } else {
        cfg.cron_end =
            Cron::parse_array_schedule(&cfg.cron_end_spec, &ctx, CronSchedule::End)?;
    }

    cfg.cron_restart = match &cfg.cron_restart_spec {
        Some(spec) => Some(Cron::parse_schedule(spec, &ctx, CronSchedule::Restart)?),
        None => None,
    };
    Ok(())
}

/// Cross-field validation producing per-job findings.
pub fn validate_cfg(cfg: &JobCfg) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut err = |message: String| {
        issues.push(ValidationIssue {
            job: cfg.name.clone(),
            error: true,
            message,
        })
    };

    for (field, value) in [
        ("MaxDuration", &cfg.max_duration),
        ("RetryReset", &cfg.retry_reset),
        ("MissedReset", &cfg.missed_reset),
        ("HoldDuration", &cfg.hold_duration),
        ("MinRuntime", &cfg.min_runtime),
        ("MaxRuntime", &cfg.max_runtime),
        ("Logging.Purge", &cfg.logging.purge),
    ] {
        if !value.is_empty() && humantime::parse_duration(value).is_err() {
            err(format!("{} is not a valid duration: {}", field, value));
        }
    }
    if !cfg.retry_wait.is_empty() {
        for wait in cfg.retry_wait.split(',') {
            if humantime::parse_duration(wait.trim()).is_err() {
                err(format!("RetryWait entry is not a valid duration: {}", wait));
            }
        }
    }
    for dep in &cfg.dependencies {
        if !dep.delay_is_valid() {
            err(format!("Dependency.Delay is not a valid duration: {}", dep.delay));
        }
        if dep.dependencies.is_empty() {
            err("Dependency with no triggers".to_string());
        }
    }
    for pair in &cfg.date_env {
        let Some((_, template)) = pair.split_once('=') else {
            err(format!("DateEnv entry without '=': {}", pair));
            continue;
        };
        if let Err(e) = crate::dateenv::convert_date(
            template,
            &cfg.timezone,
            &cfg.calendar_dirs,
            Some("20240101000000"),
        ) {
            err(format!("DateEnv '{}': {}", pair, e));
        }
    }
    issues
}

/// Default child-start stagger for controllers.
const CONTROLLER_DELAY: &str = "300ms";

/// Expand a controller spec: rewrite its children with the synthesized
/// sequencing graph and give the parent its rollup dependencies.
/// Returns the child specs ready for `build_cfg`.
pub fn synthesize_controller(parent: &mut JobSpec) -> Vec<JobSpec> {
    let Some(children) = parent.jobs.clone() else {
        return Vec::new();
    };
    if parent.job_uuid.is_zero() {
        parent.job_uuid = JobId::new();
    }
    let parent_id = parent.job_uuid.to_string();
    let delay = parent
        .jobs_control
        .as_ref()
        .filter(|c| !c.delay.is_empty())
        .map(|c| c.delay.clone())
        .unwrap_or_else(|| CONTROLLER_DELAY.to_string());
    let max_failures = parent
        .jobs_control
        .as_ref()
        .map(|c| c.max_failures)
        .unwrap_or(0)
        .max(1);

    let mut success_rollup = HashMap::new();
    let mut stopped_rollup = HashMap::new();
    let mut failed_rollup = HashMap::new();

    let mut out = Vec::with_capacity(children.len());
    // The first child keys off the parent entering `running`; each
    // later child keys off its predecessor completing.
    let mut prev: Option<String> = None;
    for mut child in children {
        if child.job_uuid.is_zero() {
            child.job_uuid = JobId::new();
        }
        if child.disabled {
            out.push(child);
            continue;
        }
        let child_id = child.job_uuid.to_string();

        let mut start_triggers = HashMap::new();
        start_triggers.insert(parent_id.clone(), "running".to_string());
        if let Some(prev_id) = &prev {
            start_triggers.insert(prev_id.clone(), "success|end".to_string());
        }

        child.kind = Some("JOJ".to_string());
        child.cron_start = Some(vec!["@depends".to_string()]);
        child.timezone = child.timezone.or_else(|| parent.timezone.clone());
        child.group = Some(
            parent
                .group
                .clone()
                .unwrap_or_default()
                .into_iter()
                .chain([parent.name.clone()])
                .collect(),
        );
        // Children inherit access and environment from the parent when
        // they set none of their own.
        child.permissions = child.permissions.or_else(|| parent.permissions.clone());
        child.user = child.user.or_else(|| parent.user.clone());
        child.env = child.env.or_else(|| parent.env.clone());
        child.date_env = child.date_env.or_else(|| parent.date_env.clone());
        child.jobs_control = parent.jobs_control.clone();
        child.dependency = Some(vec![
            Dependency {
                dependencies: start_triggers,
                action: DepAction::Start,
                condition: DepCondition::All,
                delay: delay.clone(),
                ..Dependency::default()
            },
            Dependency {
                dependencies: HashMap::from([(parent_id.clone(), "stopped".to_string())]),
                action: DepAction::Stop,
                condition: DepCondition::All,
                delay: "100ms".to_string(),
                ..Dependency::default()
            },
            Dependency {
                dependencies: HashMap::from([(parent_id.clone(), "success|failed".to_string())]),
                action: DepAction::Ready,
                condition: DepCondition::All,
                delay: "1s".to_string(),
                ..Dependency::default()
            },
            Dependency {
                dependencies: HashMap::from([(parent_id.clone(), "ready".to_string())]),
                action: DepAction::Ready,
                condition: DepCondition::All,
                delay: "1s".to_string(),
                ..Dependency::default()
            },
        ]);

        success_rollup.insert(child_id.clone(), "success".to_string());
        stopped_rollup.insert(child_id.clone(), "stopped".to_string());
        failed_rollup.insert(child_id.clone(), "failed".to_string());
        prev = Some(child_id);
        out.push(child);
    }

    parent.kind = Some("CONTROLLER".to_string());
    parent.dependency = Some(vec![
        Dependency {
            dependencies: success_rollup,
            action: DepAction::CompletedSuccess,
            condition: DepCondition::All,
            delay: "100ms".to_string(),
            ..Dependency::default()
        },
        Dependency {
            dependencies: stopped_rollup,
            action: DepAction::CompletedStopped,
            condition: DepCondition::Any,
            n: 1,
            delay: "100ms".to_string(),
            ..Dependency::default()
        },
        Dependency {
            dependencies: failed_rollup,
            action: DepAction::CompletedFailed,
            condition: DepCondition::Any,
            n: max_failures,
            delay: "100ms".to_string(),
            ..Dependency::default()
        },
    ]);
    out
}

/// Load and resolve the full job set from `files`, assigning fresh ids
/// and writing them back.
pub fn load_config(files: &[PathBuf], defaults: &LoadDefaults) -> Result<LoadOutput, ConfigError> {
    let mut parsed = Vec::new();
    for path in files {
        parsed.push((path.clone(), parse_spec_file(path)?));
    }
    let (templates, mut warnings) = load_templates(&parsed);

    let mut out = LoadOutput::default();
    out.warnings.append(&mut warnings);
    let mut seen_names = std::collections::HashSet::new();

    for (path, specs) in &mut parsed {
        for spec in specs.iter_mut() {
            if spec.is_template() {
                spec.disabled = true;
                continue;
            }
            // Ids are assigned on the real specs (persisted back); the
            // controller graph is synthesized on a copy so the user's
            // file keeps only what they wrote.
            if spec.job_uuid.is_zero() {
                spec.job_uuid = JobId::new();
            }
            if let Some(kids) = spec.jobs.as_mut() {
                for kid in kids.iter_mut() {
                    if kid.job_uuid.is_zero() {
                        kid.job_uuid = JobId::new();
                    }
                }
            }

            let (resolved_parent, children) = if spec.jobs.is_some() {
                let mut copy = spec.clone();
                let children = synthesize_controller(&mut copy);
                (copy, children)
            } else {
                (spec.clone(), Vec::new())
            };

            for resolved_spec in std::iter::once(&resolved_parent).chain(children.iter()) {
                if resolved_spec.disabled {
                    continue;
                }
                if !seen_names.insert(resolved_spec.name.clone()) {
                    return Err(ConfigError::DuplicateName(resolved_spec.name.clone()));
                }
                let (cfg, issues) = build_cfg(resolved_spec, &templates, defaults);
                let id = resolved_spec.job_uuid;
                let hold = resolved_spec.hold.unwrap_or(false);
                let fatal = issues.iter().any(|i| i.error);
                for issue in &issues {
                    tracing::warn!(job = %issue.job, error = issue.error, "{}", issue.message);
                }
                let group = cfg.group.first().cloned().unwrap_or_default();
                if !out.group_order.contains(&group) {
                    out.group_order.push(group.clone());
                }
                out.groups.entry(group).or_default().push(id);
                out.order.push(id);
                out.jobs.push(LoadedJob {
                    id,
                    cfg,
                    hold,
                    disabled: fatal,
                    issues,
                });
            }
        }
        write_spec_file(path, specs)?;
    }
    Ok(out)
}

/// Field-by-field equality over the reloadable subset; a difference
/// means the running job needs an in-place update.
pub fn spec_equal(a: &JobCfg, b: &JobCfg) -> bool {
    macro_rules! cmp {
        ($($field:ident),+) => {
            $(
                if a.$field != b.$field {
                    tracing::info!(field = stringify!($field), "job config changed");
                    return false;
                }
            )+
        };
    }
    cmp!(
        name, description, comment, tags, group, inherits, calendar, calendar_dirs, rollback,
        require_cal, cron_start_spec, cron_end_spec, cron_restart_spec, start_day, start_time,
        end_day, end_time, timezone, env, date_env, cmd, shutdown_cmd, shutdown_sig, retry,
        retry_wait, max_duration, tmp_dir, logging, host, user, permissions, admin, dependencies,
        jitter
    );
    true
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

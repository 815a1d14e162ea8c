// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server configuration (`rpeat.json`).
//!
//! Field names match the server file surface. `RPEAT_HOME` overrides
//! the configured home directory.

use rpeat_core::config::LoadDefaults;
use rpeat_core::spec::JobLogging;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerConfigError {
    #[error("cannot read server config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse server config {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("server config names no JobsFiles")]
    NoJobsFiles,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(rename = "Name", default)]
    pub name: String,

    #[serde(rename = "HOME", default)]
    pub home: PathBuf,

    /// Names the pidfile (`rpeat-<port>`); the transport in front of
    /// the core actually binds it.
    #[serde(rename = "PORT", default = "default_port")]
    pub port: String,

    #[serde(rename = "JobsFiles", default)]
    pub jobs_files: Vec<PathBuf>,

    #[serde(rename = "Timezone", default)]
    pub timezone: String,

    #[serde(rename = "MaxHistory", default = "default_max_history")]
    pub max_history: usize,

    #[serde(rename = "KeepHistory", default = "default_true")]
    pub keep_history: bool,

    /// Discard restored runtime state, keeping only history.
    #[serde(rename = "Clean", default)]
    pub clean: bool,

    #[serde(rename = "CalendarDirs", default)]
    pub calendar_dirs: Vec<PathBuf>,

    #[serde(rename = "TmpDir", default)]
    pub tmp_dir: Option<PathBuf>,

    /// Server-wide logging defaults applied to jobs without their own.
    #[serde(rename = "Logging", default)]
    pub logging: JobLogging,

    #[serde(rename = "TickIntervalSecs", default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    #[serde(rename = "TickMissedThresholdSecs", default = "default_tick_threshold")]
    pub tick_missed_threshold_secs: u64,
}

fn default_port() -> String {
    "8080".to_string()
}

fn default_max_history() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_tick_interval() -> u64 {
    30
}

fn default_tick_threshold() -> u64 {
    15
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ServerConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ServerConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut config: ServerConfig =
            serde_json::from_str(&text).map_err(|e| ServerConfigError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        if let Ok(home) = std::env::var("RPEAT_HOME") {
            config.home = PathBuf::from(home);
        }
        if config.home.as_os_str().is_empty() {
            config.home = std::env::temp_dir().join("rpeat");
        }
        if config.jobs_files.is_empty() {
            return Err(ServerConfigError::NoJobsFiles);
        }
        // Job files resolve relative to the home directory.
        let base = config.home.clone();
        for f in &mut config.jobs_files {
            if f.is_relative() {
                *f = base.join(&*f);
            }
        }
        for d in &mut config.calendar_dirs {
            if d.is_relative() {
                *d = base.join(&*d);
            }
        }
        Ok(config)
    }

    /// Per-job defaults handed to the loader.
    pub fn load_defaults(&self) -> LoadDefaults {
        LoadDefaults {
            max_history: self.max_history,
            tick_interval_secs: self.tick_interval_secs,
            tick_missed_threshold_secs: self.tick_missed_threshold_secs,
            calendar_dirs: self.calendar_dirs.clone(),
            tmp_dir: self
                .tmp_dir
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("rpeat")),
            log_purge: self.logging.purge.clone(),
        }
    }

    /// `<home>/rpeat-<port>`: touched to reload, removed on shutdown.
    pub fn pidfile(&self) -> PathBuf {
        self.home.join(format!("rpeat-{}", self.port))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

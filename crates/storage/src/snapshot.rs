// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-job snapshots: `<home>/.<job_id>.rj`.
//!
//! The snapshot carries the serializable subset of a job (identity,
//! state, history, log bookkeeping) -- channels and timers are
//! rebuilt on restore. Writes go through a temp file and rename so a
//! crash never leaves a torn snapshot behind.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rpeat_core::job::{JState, Job, JobHistory, JobLog, Reason};
use rpeat_core::JobId;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot decode snapshot {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    #[error("cannot encode snapshot for {0}")]
    Encode(JobId),
}

/// The persisted subset of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub name: String,
    pub state: JState,
    pub prev_state: JState,
    pub hold: bool,
    pub retry_attempt: u32,
    pub exit_code: i32,
    pub started: String,
    pub started_unix: i64,
    pub prev_start: String,
    pub prev_stop: String,
    pub elapsed: String,
    pub next_start: String,
    pub next_start_unix: i64,
    pub modified: i64,
    pub reason: Reason,
    pub history: Vec<JobHistory>,
    pub purge_queue: Vec<JobLog>,
}

impl JobSnapshot {
    /// Capture the persistable state of a job.
    pub fn capture(job: &Job) -> Self {
        let name = job.name();
        let run = job.lock_run();
        Self {
            id: job.id,
            name,
            state: run.state,
            prev_state: run.prev_state,
            hold: run.hold,
            retry_attempt: run.retry_attempt,
            exit_code: run.exit_code,
            started: run.started.clone(),
            started_unix: run.started_unix,
            prev_start: run.prev_start.clone(),
            prev_stop: run.prev_stop.clone(),
            elapsed: run.elapsed.clone(),
            next_start: run.next_start.clone(),
            next_start_unix: run.next_start_unix,
            modified: run.modified,
            reason: run.reason.clone(),
            history: run.history.clone(),
            purge_queue: run.purge_queue.clone(),
        }
    }

    /// Whether the snapshot was taken mid-run; restore forces such
    /// jobs to `unknown` and holds them for operator action.
    pub fn interrupted(&self) -> bool {
        matches!(self.state, JState::Running | JState::Retrying)
    }
}

/// Snapshot file path for a job id.
pub fn job_snapshot_path(home: &Path, id: JobId) -> PathBuf {
    home.join(format!(".{}.rj", id))
}

/// Serialize, gzip, and atomically write a snapshot.
pub fn save_job_snapshot(home: &Path, snapshot: &JobSnapshot) -> Result<(), StorageError> {
    let path = job_snapshot_path(home, snapshot.id);
    let io_err = |source, path: &Path| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(home).map_err(|e| io_err(e, home))?;

    let raw = bincode::serialize(snapshot).map_err(|_| StorageError::Encode(snapshot.id))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw).map_err(|e| io_err(e, &path))?;
    let compressed = encoder.finish().map_err(|e| io_err(e, &path))?;

    let tmp = path.with_extension("rj.tmp");
    std::fs::write(&tmp, compressed).map_err(|e| io_err(e, &tmp))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(e, &path))?;
    Ok(())
}

/// Load a job snapshot if one exists.
pub fn load_job_snapshot(home: &Path, id: JobId) -> Result<Option<JobSnapshot>, StorageError> {
    let path = job_snapshot_path(home, id);
    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StorageError::Io {
                path,
                source: e,
            })
        }
    };
    let mut decoder = GzDecoder::new(bytes.as_slice());
    let mut raw = Vec::new();
    decoder.read_to_end(&mut raw).map_err(|e| StorageError::Decode {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    let snapshot = bincode::deserialize(&raw).map_err(|e| StorageError::Decode {
        path,
        reason: e.to_string(),
    })?;
    Ok(Some(snapshot))
}

/// Remove a job's snapshot file (job deletion).
pub fn remove_job_snapshot(home: &Path, id: JobId) {
    let path = job_snapshot_path(home, id);
    if let Err(e) = std::fs::remove_file(&path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "cannot remove snapshot");
        }
    }
}

/// Apply a restored snapshot to a freshly built job. Interrupted runs
/// come back as `unknown` + hold.
pub fn restore_into(job: &Job, snapshot: &JobSnapshot) {
    let interrupted = snapshot.interrupted();
    let mut run = job.lock_run();
    run.history = snapshot.history.clone();
    run.purge_queue = snapshot.purge_queue.clone();
    run.prev_start = snapshot.prev_start.clone();
    run.prev_stop = snapshot.prev_stop.clone();
    run.elapsed = snapshot.elapsed.clone();
    run.reason = snapshot.reason.clone();
    if interrupted {
        run.state = JState::Unknown;
        run.prev_state = snapshot.state;
        run.hold = true;
        tracing::warn!(job = %job.id, "restored mid-run; holding in unknown state");
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;

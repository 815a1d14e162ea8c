// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Whole-server snapshot: `<home>/.rpeat/rpeat`.
//!
//! A warm-start accelerator holding every job snapshot plus the
//! display ordering. Authoritative state stays in the per-job files;
//! this blob just saves the startup scan.

use crate::snapshot::{JobSnapshot, StorageError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rpeat_core::JobId;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Serialized server job map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerState {
    pub jobs: Vec<JobSnapshot>,
    pub order: Vec<JobId>,
}

fn state_path(home: &Path) -> PathBuf {
    home.join(".rpeat").join("rpeat")
}

/// Persist the server map, atomically.
pub fn save_server_state(home: &Path, state: &ServerState) -> Result<(), StorageError> {
    let path = state_path(home);
    let dir = path.parent().unwrap_or(home);
    let io_err = |source, p: &Path| StorageError::Io {
        path: p.to_path_buf(),
        source,
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(e, dir))?;

    let raw = bincode::serialize(state)
        .map_err(|_| StorageError::Encode(state.order.first().copied().unwrap_or_default()))?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw).map_err(|e| io_err(e, &path))?;
    let compressed = encoder.finish().map_err(|e| io_err(e, &path))?;

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, compressed).map_err(|e| io_err(e, &tmp))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(e, &path))?;
    Ok(())
}

/// Load the server map if present.
pub fn load_server_state(home: &Path) -> Result<Option<ServerState>, StorageError> {
    let path = state_path(home);
    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::Io { path, source: e }),
    };
    let mut decoder = GzDecoder::new(bytes.as_slice());
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| StorageError::Decode {
            path: path.clone(),
            reason: e.to_string(),
        })?;
    let state = bincode::deserialize(&raw).map_err(|e| StorageError::Decode {
        path,
        reason: e.to_string(),
    })?;
    Ok(Some(state))
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;

use crate::recall::paths::RecallPaths;
use crate::recall::store::SyncCounts;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallState {
    pub schema_version: u32,
    pub last_sync_epoch_secs: Option<u64>,
    pub last_sync_counts: Option<SyncCounts>,
    pub stored_sessions: usize,
}

impl Default for RecallState {
    fn default() -> Self {
        Self {
            schema_version: 1,
            last_sync_epoch_secs: None,
            last_sync_counts: None,
            stored_sessions: 0,
        }
    }
}

pub fn state_file_path(paths: &RecallPaths) -> PathBuf {
    paths.recall_home.join("state").join("recall_state.json")
}

pub fn load(paths: &RecallPaths) -> Result<RecallState> {
    let file = state_file_path(paths);
    if !file.exists() {
        return Ok(RecallState::default());
    }

    let raw =
        fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
    let parsed: RecallState = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    Ok(parsed)
}

pub fn save(paths: &RecallPaths, state: &RecallState) -> Result<PathBuf> {
    let file = state_file_path(paths);
    if let Some(parent) = file.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let data = serde_json::to_string_pretty(state)?;
    fs::write(&file, format!("{data}\n"))
        .with_context(|| format!("failed to write {}", file.display()))?;
    Ok(file)
}

use crate::recall::paths::RecallPaths;
use crate::recall::util::now_epoch_secs;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at_epoch_secs: u64,
    pub phase: String,
    pub status: String,
    pub message: String,
}

/// Append-only JSONL record of store-changing runs.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_paths(paths: &RecallPaths) -> Self {
        Self::new(paths.logs_dir.join("audit.log"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, phase: &str, status: &str, message: &str) -> Result<()> {
        self.append(&AuditEntry {
            at_epoch_secs: now_epoch_secs()?,
            phase: phase.to_owned(),
            status: status.to_owned(),
            message: message.to_owned(),
        })
    }

    fn append(&self, entry: &AuditEntry) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(&line))
            .with_context(|| format!("failed to append to {}", self.path.display()))
    }
}

use crate::error::RecallError;
use crate::recall::config::RecallConfig;
use crate::recall::paths::RecallPaths;
use crate::recall::util::run_command_with_timeout;
use crate::recall::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Where raw session blobs come from. Enumeration and fetch are both
/// fallible; the ranking pipeline treats failures as "no session".
pub trait SessionSource {
    fn name(&self) -> &'static str;
    fn enumerate(&self) -> Result<Vec<String>>;
    fn fetch(&self, id: &str) -> Result<Option<String>>;
}

/// Line-delimited transcripts stored as `*.jsonl` files below one root.
pub struct TranscriptDirSource {
    root: PathBuf,
}

impl TranscriptDirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

fn is_transcript_file(path: &Path) -> bool {
    let is_jsonl = path.extension().and_then(|ext| ext.to_str()) == Some("jsonl");
    let is_sidechain = path
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("agent-"));
    is_jsonl && !is_sidechain
}

fn collect_transcripts(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let read_dir =
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in read_dir {
        let path = entry?.path();
        if path.is_dir() {
            collect_transcripts(&path, out)?;
        } else if path.is_file() && is_transcript_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}

impl SessionSource for TranscriptDirSource {
    fn name(&self) -> &'static str {
        "transcripts"
    }

    fn enumerate(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        collect_transcripts(&self.root, &mut files)?;
        files.sort();
        Ok(files
            .into_iter()
            .map(|path| path.display().to_string())
            .collect())
    }

    fn fetch(&self, id: &str) -> Result<Option<String>> {
        match fs::read(id) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to read {id}")),
        }
    }
}

/// Sessions listed and exported by an external assistant CLI.
pub struct ExportCommandSource {
    bin: PathBuf,
    timeout_secs: u64,
}

impl ExportCommandSource {
    pub fn new(bin: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            bin: bin.into(),
            timeout_secs,
        }
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.bin);
        cmd.args(args);
        let output = run_command_with_timeout(&mut cmd, Duration::from_secs(self.timeout_secs))
            .with_context(|| format!("failed to run `{}`", self.bin.display()))?;

        if !output.status.success() {
            anyhow::bail!(
                "`{} {}` failed: {}",
                self.bin.display(),
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn parse_session_listing(raw: &str) -> Result<Vec<String>> {
    let parsed: Value = serde_json::from_str(raw.trim()).context("invalid session listing JSON")?;
    let items = parsed
        .as_array()
        .or_else(|| parsed.get("sessions").and_then(Value::as_array))
        .context("session listing is not a JSON array")?;

    Ok(items
        .iter()
        .filter_map(|item| {
            item.as_str()
                .or_else(|| item.get("id").and_then(Value::as_str))
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(ToOwned::to_owned)
        })
        .collect())
}

impl SessionSource for ExportCommandSource {
    fn name(&self) -> &'static str {
        "export"
    }

    fn enumerate(&self) -> Result<Vec<String>> {
        let raw = self.run(&["session", "list", "--format", "json"])?;
        parse_session_listing(&raw)
    }

    fn fetch(&self, id: &str) -> Result<Option<String>> {
        let raw = self.run(&["export", id])?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(raw))
    }
}

pub fn resolve_export_bin(bin: &Path) -> Result<PathBuf> {
    if bin.exists() {
        return Ok(bin.to_path_buf());
    }
    which::which(bin).map_err(|err| {
        RecallError::ExportBinaryUnavailable(format!("{}: {err}", bin.display())).into()
    })
}

pub fn configured_sources(paths: &RecallPaths, cfg: &RecallConfig) -> Vec<Box<dyn SessionSource>> {
    let mut sources: Vec<Box<dyn SessionSource>> = Vec::new();
    if cfg.sources.transcripts_enabled {
        sources.push(Box::new(TranscriptDirSource::new(&paths.transcripts_dir)));
    }
    if cfg.sources.export_enabled {
        match resolve_export_bin(&paths.export_bin) {
            Ok(bin) => sources.push(Box::new(ExportCommandSource::new(
                bin,
                cfg.sources.export_timeout_secs,
            ))),
            Err(err) => warn::emit(WarnEvent {
                code: "EXPORT_BIN_MISSING",
                stage: "sources",
                action: "resolve-export-bin",
                session: "",
                source: "export",
                retry: "set-RECALL_EXPORT_BIN",
                reason: "export-source-disabled",
                err: &format!("{err:#}"),
            }),
        }
    }
    sources
}

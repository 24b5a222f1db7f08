use crate::error::RecallError;
use crate::recall::paths::RecallPaths;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallSearchConfig {
    pub default_limit: usize,
}

impl Default for RecallSearchConfig {
    fn default() -> Self {
        Self { default_limit: 20 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallExtractConfig {
    pub event_log_path_keys: Vec<String>,
    pub export_path_keys: Vec<String>,
}

impl Default for RecallExtractConfig {
    fn default() -> Self {
        Self {
            event_log_path_keys: ["file_path", "filePath", "notebook_path", "path"]
                .into_iter()
                .map(ToOwned::to_owned)
                .collect(),
            export_path_keys: ["filePath", "file_path", "path"]
                .into_iter()
                .map(ToOwned::to_owned)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallSourcesConfig {
    pub transcripts_enabled: bool,
    pub export_enabled: bool,
    pub export_timeout_secs: u64,
}

impl Default for RecallSourcesConfig {
    fn default() -> Self {
        Self {
            transcripts_enabled: true,
            export_enabled: true,
            export_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecallConfig {
    pub search: RecallSearchConfig,
    pub extract: RecallExtractConfig,
    pub sources: RecallSourcesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialRecallConfig {
    search: Option<RecallSearchConfig>,
    extract: Option<RecallExtractConfig>,
    sources: Option<RecallSourcesConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_usize(var: &str, fallback: usize) -> usize {
    match env::var(var) {
        Ok(v) => v.trim().parse::<usize>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => parse_bool(&v).unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "true" | "TRUE" | "yes" | "on" => Some(true),
        "0" | "false" | "FALSE" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn env_or_csv(var: &str, fallback: &[String]) -> Vec<String> {
    match env::var(var) {
        Ok(v) => {
            let out = parse_csv(&v);
            if out.is_empty() {
                fallback.to_vec()
            } else {
                out
            }
        }
        Err(_) => fallback.to_vec(),
    }
}

fn invalid(msg: impl Into<String>) -> anyhow::Error {
    RecallError::InvalidConfig(msg.into()).into()
}

fn validate(cfg: &RecallConfig) -> Result<()> {
    if cfg.search.default_limit == 0 {
        return Err(invalid("search default limit must be >= 1"));
    }
    if cfg.extract.event_log_path_keys.is_empty() {
        return Err(invalid("extract event_log_path_keys cannot be empty"));
    }
    if cfg.extract.export_path_keys.is_empty() {
        return Err(invalid("extract export_path_keys cannot be empty"));
    }
    if cfg.sources.export_timeout_secs == 0 {
        return Err(invalid("export timeout must be >= 1 second"));
    }
    Ok(())
}

pub fn config_path(paths: &RecallPaths) -> PathBuf {
    if let Ok(custom) = env::var("RECALL_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    paths.recall_home.join("config.toml")
}

fn apply_file_config(base: &mut RecallConfig, raw: &str, origin: &str) -> Result<()> {
    let parsed: PartialRecallConfig = toml::from_str(raw)
        .map_err(|err| invalid(format!("failed to parse {origin}: {err}")))?;
    if let Some(search) = parsed.search {
        base.search = search;
    }
    if let Some(extract) = parsed.extract {
        base.extract = extract;
    }
    if let Some(sources) = parsed.sources {
        base.sources = sources;
    }
    Ok(())
}

fn merge_file_config(base: &mut RecallConfig, paths: &RecallPaths) -> Result<()> {
    let path = config_path(paths);
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)
        .map_err(|err| invalid(format!("failed to read {}: {err}", path.display())))?;
    apply_file_config(base, &raw, &path.display().to_string())
}

pub fn load_config(paths: &RecallPaths) -> Result<RecallConfig> {
    let mut cfg = RecallConfig::default();
    merge_file_config(&mut cfg, paths)?;

    cfg.search.default_limit = env_or_usize("RECALL_SEARCH_LIMIT", cfg.search.default_limit);
    cfg.extract.event_log_path_keys = env_or_csv(
        "RECALL_EVENT_LOG_PATH_KEYS",
        &cfg.extract.event_log_path_keys,
    );
    cfg.extract.export_path_keys =
        env_or_csv("RECALL_EXPORT_PATH_KEYS", &cfg.extract.export_path_keys);
    cfg.sources.transcripts_enabled =
        env_or_bool("RECALL_TRANSCRIPTS_ENABLED", cfg.sources.transcripts_enabled);
    cfg.sources.export_enabled = env_or_bool("RECALL_EXPORT_ENABLED", cfg.sources.export_enabled);
    cfg.sources.export_timeout_secs = env_or_u64(
        "RECALL_EXPORT_TIMEOUT_SECS",
        cfg.sources.export_timeout_secs,
    );

    validate(&cfg)?;
    Ok(cfg)
}

use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct RecallPaths {
    pub recall_home: PathBuf,
    pub store_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub transcripts_dir: PathBuf,
    pub export_bin: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<RecallPaths> {
    let home = required_home_dir()?;
    let recall_home = env_or_default_path("RECALL_HOME", home.join(".session-recall"));

    let store_dir = env_or_default_path("RECALL_STORE_DIR", recall_home.join("store"));
    let logs_dir = env_or_default_path("RECALL_LOGS_DIR", recall_home.join("logs"));
    let transcripts_dir =
        env_or_default_path("RECALL_TRANSCRIPTS_DIR", home.join(".claude/projects"));
    let export_bin = env_or_default_path("RECALL_EXPORT_BIN", PathBuf::from("opencode"));

    Ok(RecallPaths {
        recall_home,
        store_dir,
        logs_dir,
        transcripts_dir,
        export_bin,
    })
}

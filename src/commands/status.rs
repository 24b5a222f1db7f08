use anyhow::Result;
use std::env;

use crate::commands::CommandReport;
use crate::recall::audit::AuditLog;
use crate::recall::config::{config_path, load_config};
use crate::recall::paths::resolve_paths;
use crate::recall::source::resolve_export_bin;
use crate::recall::state;
use crate::recall::store::SessionStore;

include!(concat!(env!("OUT_DIR"), "/recall_env_allowlist.rs"));

fn active_overrides() -> Vec<(&'static str, String)> {
    GENERATED_RECALL_ENV_ALLOWLIST
        .iter()
        .filter_map(|key| {
            env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| (*key, v))
        })
        .collect()
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("recall_home={}", paths.recall_home.display()));
    report.detail(format!("store_dir={}", paths.store_dir.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    report.detail(format!("audit_log={}", AuditLog::from_paths(&paths).path().display()));
    report.detail(format!("transcripts_dir={}", paths.transcripts_dir.display()));
    report.detail(format!("config_path={}", config_path(&paths).display()));

    match load_config(&paths) {
        Ok(cfg) => {
            report.detail(format!("search.default_limit={}", cfg.search.default_limit));
            report.detail(format!(
                "extract.event_log_path_keys={}",
                cfg.extract.event_log_path_keys.join(",")
            ));
            report.detail(format!(
                "extract.export_path_keys={}",
                cfg.extract.export_path_keys.join(",")
            ));
            report.detail(format!(
                "sources.transcripts_enabled={}",
                cfg.sources.transcripts_enabled
            ));
            report.detail(format!("sources.export_enabled={}", cfg.sources.export_enabled));
            report.detail(format!(
                "sources.export_timeout_secs={}",
                cfg.sources.export_timeout_secs
            ));
        }
        Err(err) => report.issue(format!("{err:#}")),
    }

    if !paths.transcripts_dir.exists() {
        report.detail("transcripts dir missing; transcript source yields no sessions");
    }
    match resolve_export_bin(&paths.export_bin) {
        Ok(bin) => report.detail(format!("export_bin={}", bin.display())),
        Err(err) => report.detail(format!("export_bin unavailable ({err:#})")),
    }

    let session_store = SessionStore::from_paths(&paths);
    match session_store.load() {
        Ok(records) => report.detail(format!("stored_sessions={}", records.len())),
        Err(err) => report.issue(format!("session store unreadable: {err:#}")),
    }

    match state::load(&paths) {
        Ok(recall_state) => {
            match recall_state.last_sync_epoch_secs {
                Some(at) => report.detail(format!("last_sync_epoch_secs={at}")),
                None => report.detail("last_sync=never"),
            }
            if let Some(counts) = recall_state.last_sync_counts {
                report.detail(format!(
                    "last_sync_counts=synced:{} unchanged:{} empty:{} failed:{} removed:{}",
                    counts.synced, counts.unchanged, counts.empty, counts.failed, counts.removed
                ));
            }
        }
        Err(err) => report.issue(format!("state file unreadable: {err:#}")),
    }

    for (key, value) in active_overrides() {
        report.detail(format!("env.{key}={value}"));
    }

    Ok(report)
}

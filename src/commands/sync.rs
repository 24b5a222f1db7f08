use anyhow::Result;

use crate::commands::CommandReport;
use crate::recall::audit::AuditLog;
use crate::recall::config::load_config;
use crate::recall::extract::ExtractOptions;
use crate::recall::paths::resolve_paths;
use crate::recall::source::configured_sources;
use crate::recall::state;
use crate::recall::store::{self, SessionStore, SyncOptions};
use crate::recall::util::now_epoch_secs;

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncCommandOptions {
    pub force: bool,
    pub dry_run: bool,
}

pub fn run(opts: &SyncCommandOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;
    let mut report = CommandReport::new("sync");

    let session_store = SessionStore::from_paths(&paths);
    report.detail(format!("store_file={}", session_store.records_path().display()));

    let sources = configured_sources(&paths, &cfg);
    let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
    report.detail(format!("sources={}", names.join(",")));
    if sources.is_empty() {
        report.issue("no session sources enabled");
        return Ok(report);
    }

    let extract = ExtractOptions::from_config(&cfg.extract);
    let outcome = store::sync(
        &session_store,
        &sources,
        &extract,
        SyncOptions {
            force: opts.force,
            dry_run: opts.dry_run,
        },
    )?;
    let counts = outcome.counts;

    report.detail(format!("synced={}", counts.synced));
    report.detail(format!("unchanged={}", counts.unchanged));
    report.detail(format!("empty={}", counts.empty));
    report.detail(format!("failed={}", counts.failed));
    report.detail(format!("removed={}", counts.removed));
    report.detail(format!("stored_sessions={}", outcome.total_records));

    if opts.dry_run {
        report.detail("dry-run: store, state and audit log left untouched");
        return Ok(report);
    }
    report.detail(format!("store_written={}", outcome.written));

    let mut recall_state = state::load(&paths)?;
    recall_state.last_sync_epoch_secs = Some(now_epoch_secs()?);
    recall_state.last_sync_counts = Some(counts);
    recall_state.stored_sessions = outcome.total_records;
    let state_file = state::save(&paths, &recall_state)?;
    report.detail(format!("state_file={}", state_file.display()));

    let status = if counts.failed == 0 { "ok" } else { "partial" };
    AuditLog::from_paths(&paths).record(
        "sync",
        status,
        &format!(
            "synced={} unchanged={} empty={} failed={} removed={} force={}",
            counts.synced,
            counts.unchanged,
            counts.empty,
            counts.failed,
            counts.removed,
            opts.force
        ),
    )?;

    Ok(report)
}

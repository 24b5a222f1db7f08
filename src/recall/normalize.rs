use crate::recall::detect::{RawSession, SessionFormat, detect};
use crate::recall::extract::{
    ExtractOptions, Extracted, TokenCounts, extract_event_log, extract_export,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The stable, format-independent record every downstream stage consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedSession {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub message_count: usize,
    pub user_messages: Vec<String>,
    pub tools_used: BTreeSet<String>,
    pub files_from_tool_calls: BTreeSet<String>,
    pub models_used: BTreeSet<String>,
    pub model_tokens: BTreeMap<String, TokenCounts>,
    pub token_totals: TokenCounts,
    pub cwd: String,
    pub git_branch: String,
    pub session_format: SessionFormat,
}

/// Finalize an extracted accumulator. Missing timestamps become the Unix
/// epoch; `started_at <= ended_at` is whatever the source says.
pub fn normalize(extracted: Extracted) -> NormalizedSession {
    let Extracted { acc, meta } = extracted;
    let started_at = meta.started_at.unwrap_or_default();
    let ended_at = meta.ended_at.or(meta.started_at).unwrap_or_default();

    NormalizedSession {
        id: meta.id,
        title: meta.title,
        started_at,
        ended_at,
        message_count: acc.message_count,
        user_messages: acc.user_messages,
        tools_used: acc.tools,
        files_from_tool_calls: acc.files,
        models_used: acc.models,
        model_tokens: acc.model_tokens,
        token_totals: acc.token_totals,
        cwd: meta.cwd,
        git_branch: meta.git_branch,
        session_format: meta.format,
    }
}

/// Detect, extract, and normalize one raw blob. `None` means the blob holds
/// no usable session (empty, unparseable, or no user text).
pub fn parse_session(
    source_ref: &str,
    raw: &str,
    opts: &ExtractOptions,
) -> Option<NormalizedSession> {
    let extracted = match detect(raw) {
        RawSession::Export(root) => extract_export(source_ref, &root, &opts.export_keys),
        RawSession::EventLog(text) => extract_event_log(source_ref, text, &opts.event_log_keys),
    }?;
    Some(normalize(extracted))
}

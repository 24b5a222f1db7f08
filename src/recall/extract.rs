//! Event extraction: walks one decoded transcript and fills a
//! [`SessionAccumulator`]. Both input encodings converge on the same
//! accumulator shape so nothing downstream branches on the source format.

use crate::recall::config::RecallExtractConfig;
use crate::recall::detect::SessionFormat;
use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

/// Model key used for usage records on events that declare no model.
pub const UNKNOWN_MODEL: &str = "unknown";
pub const UNKNOWN_SESSION_ID: &str = "unknown";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
    pub cache_creation: u64,
    pub cache_read: u64,
}

impl TokenCounts {
    fn from_usage(usage: &Value) -> Option<Self> {
        let usage = usage.as_object()?;
        let field = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);
        Some(Self {
            input: field("input_tokens"),
            output: field("output_tokens"),
            cache_creation: field("cache_creation_input_tokens"),
            cache_read: field("cache_read_input_tokens"),
        })
    }

    pub fn add(&mut self, other: &TokenCounts) {
        self.input = self.input.saturating_add(other.input);
        self.output = self.output.saturating_add(other.output);
        self.cache_creation = self.cache_creation.saturating_add(other.cache_creation);
        self.cache_read = self.cache_read.saturating_add(other.cache_read);
    }

    pub fn total(&self) -> u64 {
        self.input
            .saturating_add(self.output)
            .saturating_add(self.cache_creation)
            .saturating_add(self.cache_read)
    }
}

/// Parameter key names whose string values may name a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathKeys(BTreeSet<String>);

impl PathKeys {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(Into::into).collect())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    pub event_log_keys: PathKeys,
    pub export_keys: PathKeys,
}

impl ExtractOptions {
    pub fn from_config(cfg: &RecallExtractConfig) -> Self {
        Self {
            event_log_keys: PathKeys::new(cfg.event_log_path_keys.iter().cloned()),
            export_keys: PathKeys::new(cfg.export_path_keys.iter().cloned()),
        }
    }
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::from_config(&RecallExtractConfig::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionAccumulator {
    pub user_messages: Vec<String>,
    pub tools: BTreeSet<String>,
    pub files: BTreeSet<String>,
    pub models: BTreeSet<String>,
    pub token_totals: TokenCounts,
    pub model_tokens: BTreeMap<String, TokenCounts>,
    pub message_count: usize,
}

impl SessionAccumulator {
    fn push_user_text(&mut self, text: &str) {
        if !text.trim().is_empty() {
            self.user_messages.push(text.to_string());
        }
    }

    fn add_tool(&mut self, name: &str) {
        if !name.is_empty() {
            self.tools.insert(name.to_string());
        }
    }

    fn add_file_candidate(&mut self, value: &str) {
        if is_path_like(value) {
            self.files.insert(value.to_string());
        }
    }

    fn add_model(&mut self, model: &str) {
        if !model.trim().is_empty() {
            self.models.insert(model.to_string());
        }
    }

    fn add_usage(&mut self, model: Option<&str>, counts: &TokenCounts) {
        self.token_totals.add(counts);
        let key = model.unwrap_or(UNKNOWN_MODEL);
        self.model_tokens
            .entry(key.to_string())
            .or_default()
            .add(counts);
    }

    fn is_empty(&self) -> bool {
        self.message_count == 0 || self.user_messages.is_empty()
    }
}

/// Format-specific metadata gathered alongside the accumulator.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMeta {
    pub id: String,
    pub title: Option<String>,
    pub cwd: String,
    pub git_branch: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub format: SessionFormat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub acc: SessionAccumulator,
    pub meta: SessionMeta,
}

pub fn is_path_like(value: &str) -> bool {
    value.contains('/') || value.contains('\\')
}

fn uuid_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}",
            )
            .ok()
        })
        .as_ref()
}

/// Last UUID-shaped run in a transcript path; the file name wins over
/// directory components because it comes last.
pub fn session_id_from_source(source_ref: &str) -> Option<String> {
    uuid_pattern()?
        .find_iter(source_ref)
        .last()
        .map(|m| m.as_str().to_string())
}

pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        Value::Number(num) => {
            let raw = num.as_i64()?;
            // Exports carry epoch milliseconds; tolerate plain seconds too.
            if raw.abs() >= 100_000_000_000 {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        _ => None,
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn collect_path_params(params: &Map<String, Value>, keys: &PathKeys, acc: &mut SessionAccumulator) {
    for (key, value) in params {
        match value {
            Value::String(candidate) if keys.contains(key) => acc.add_file_candidate(candidate),
            Value::Object(nested) => collect_path_params(nested, keys, acc),
            _ => {}
        }
    }
}

fn push_text_parts(content: &Value, acc: &mut SessionAccumulator) {
    match content {
        Value::String(text) => acc.push_user_text(text),
        Value::Array(parts) => {
            for part in parts {
                if part.get("type").and_then(Value::as_str) != Some("text") {
                    continue;
                }
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    acc.push_user_text(text);
                }
            }
        }
        _ => {}
    }
}

fn ingest_assistant_message(message: &Value, keys: &PathKeys, acc: &mut SessionAccumulator) {
    let model = str_field(message, "model");
    if let Some(model) = model {
        acc.add_model(model);
    }
    if let Some(counts) = message.get("usage").and_then(TokenCounts::from_usage) {
        acc.add_usage(model, &counts);
    }

    let Some(content) = message.get("content").and_then(Value::as_array) else {
        return;
    };
    for part in content {
        if part.get("type").and_then(Value::as_str) != Some("tool_use") {
            continue;
        }
        if let Some(name) = part.get("name").and_then(Value::as_str) {
            acc.add_tool(name);
        }
        if let Some(input) = part.get("input").and_then(Value::as_object) {
            collect_path_params(input, keys, acc);
        }
    }
}

/// Extract a line-delimited event log. Lines that fail to parse or carry a
/// non-conversational type are skipped. Returns `None` for sessions with no
/// retained events or no user text.
pub fn extract_event_log(source_ref: &str, raw: &str, keys: &PathKeys) -> Option<Extracted> {
    let mut acc = SessionAccumulator::default();
    let mut event_session_id: Option<String> = None;
    let mut title: Option<String> = None;
    let mut cwd = String::new();
    let mut git_branch = String::new();
    let mut started_at = None;
    let mut ended_at = None;

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let Ok(entry) = serde_json::from_str::<Value>(trimmed) else {
            continue;
        };
        let Some(entry_type) = entry.get("type").and_then(Value::as_str) else {
            continue;
        };

        if entry_type == "summary" {
            if let Some(summary) = str_field(&entry, "summary") {
                title = Some(summary.to_string());
            }
            continue;
        }
        if entry_type != "user" && entry_type != "assistant" {
            continue;
        }

        acc.message_count += 1;
        if acc.message_count == 1 {
            event_session_id = str_field(&entry, "sessionId").map(ToOwned::to_owned);
        }
        if cwd.is_empty()
            && let Some(value) = str_field(&entry, "cwd")
        {
            cwd = value.to_string();
        }
        if git_branch.is_empty()
            && let Some(value) = str_field(&entry, "gitBranch")
        {
            git_branch = value.to_string();
        }
        if let Some(ts) = entry.get("timestamp").and_then(parse_timestamp) {
            started_at.get_or_insert(ts);
            ended_at = Some(ts);
        }

        let Some(message) = entry.get("message") else {
            continue;
        };
        if entry_type == "user" {
            if let Some(content) = message.get("content") {
                push_text_parts(content, &mut acc);
            }
        } else {
            ingest_assistant_message(message, keys, &mut acc);
        }
    }

    if acc.is_empty() {
        return None;
    }

    let id = session_id_from_source(source_ref)
        .or(event_session_id)
        .unwrap_or_else(|| UNKNOWN_SESSION_ID.to_string());

    Some(Extracted {
        acc,
        meta: SessionMeta {
            id,
            title,
            cwd,
            git_branch,
            started_at,
            ended_at,
            format: SessionFormat::EventLog,
        },
    })
}

fn first_str<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| str_field(value, key))
}

fn envelope_role(envelope: &Value) -> Option<&str> {
    str_field(envelope, "role").or_else(|| envelope.get("info").and_then(|i| str_field(i, "role")))
}

fn envelope_model(envelope: &Value) -> Option<&str> {
    first_str(envelope, &["model", "modelID"]).or_else(|| {
        envelope
            .get("info")
            .and_then(|info| first_str(info, &["modelID", "model"]))
    })
}

fn ingest_tool_call(record: &Value, keys: &PathKeys, acc: &mut SessionAccumulator) {
    if let Some(name) = first_str(record, &["name", "tool"]) {
        acc.add_tool(name);
    }
    let params = ["input", "args", "arguments"]
        .iter()
        .find_map(|key| record.get(*key).and_then(Value::as_object));
    let Some(params) = params else {
        return;
    };
    for (key, value) in params {
        if keys.contains(key)
            && let Some(candidate) = value.as_str()
        {
            acc.add_file_candidate(candidate);
        }
    }
}

fn export_timestamp(info: &Value, time_key: &str, flat_key: &str) -> Option<DateTime<Utc>> {
    info.get("time")
        .and_then(|time| time.get(time_key))
        .and_then(parse_timestamp)
        .or_else(|| info.get(flat_key).and_then(parse_timestamp))
}

/// Extract a structured export object. Exports carry no token usage, so the
/// counters stay zero and the per-model map stays empty.
pub fn extract_export(source_ref: &str, root: &Value, keys: &PathKeys) -> Option<Extracted> {
    let mut acc = SessionAccumulator::default();
    let empty = Value::Null;
    let info = root.get("info").unwrap_or(&empty);
    let envelopes = root
        .get("messages")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for envelope in envelopes {
        let role = envelope_role(envelope);
        if matches!(role, Some("user" | "assistant")) {
            acc.message_count += 1;
        }

        if role == Some("user")
            && let Some(parts) = envelope.get("parts")
        {
            push_text_parts(parts, &mut acc);
        }

        let tool_calls = envelope
            .get("toolCalls")
            .or_else(|| envelope.get("tool_calls"))
            .and_then(Value::as_array);
        for record in tool_calls.into_iter().flatten() {
            ingest_tool_call(record, keys, &mut acc);
        }

        if let Some(model) = envelope_model(envelope) {
            acc.add_model(model);
        }
    }

    if acc.is_empty() {
        return None;
    }

    let id = str_field(info, "id")
        .map(ToOwned::to_owned)
        .or_else(|| Some(source_ref.trim().to_string()).filter(|s| !s.is_empty()))
        .unwrap_or_else(|| UNKNOWN_SESSION_ID.to_string());

    Some(Extracted {
        acc,
        meta: SessionMeta {
            id,
            title: str_field(info, "title").map(ToOwned::to_owned),
            cwd: first_str(info, &["directory", "cwd"])
                .unwrap_or_default()
                .to_string(),
            git_branch: String::new(),
            started_at: export_timestamp(info, "created", "createdAt"),
            ended_at: export_timestamp(info, "updated", "updatedAt"),
            format: SessionFormat::Export,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keys() -> PathKeys {
        ExtractOptions::default().event_log_keys
    }

    fn lines(events: &[Value]) -> String {
        events
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn event_log_collects_messages_tools_and_files() {
        let raw = lines(&[
            json!({"type":"user","sessionId":"s-1","timestamp":"2026-10-01T10:00:00Z",
                   "cwd":"/work/septa","gitBranch":"main",
                   "message":{"role":"user","content":"Let's build septa tracker"}}),
            json!({"type":"assistant","timestamp":"2026-10-01T10:01:00Z",
                   "message":{"role":"assistant","model":"claude-sonnet",
                   "content":[{"type":"text","text":"ok"},
                              {"type":"tool_use","name":"Write","input":{"file_path":"src/septa.ts","content":"x"}}]}}),
            json!({"type":"user","timestamp":"2026-10-01T10:02:00Z",
                   "message":{"role":"user","content":[{"type":"text","text":"ship it"}]}}),
        ]);

        let out = extract_event_log("/tmp/x.jsonl", &raw, &keys()).expect("session");
        assert_eq!(
            out.acc.user_messages,
            vec!["Let's build septa tracker", "ship it"]
        );
        assert_eq!(out.acc.files.iter().collect::<Vec<_>>(), vec!["src/septa.ts"]);
        assert!(out.acc.tools.contains("Write"));
        assert!(out.acc.models.contains("claude-sonnet"));
        assert_eq!(out.acc.message_count, 3);
        assert_eq!(out.meta.id, "s-1");
        assert_eq!(out.meta.cwd, "/work/septa");
        assert_eq!(out.meta.git_branch, "main");
        assert_eq!(
            out.meta.started_at.map(|t| t.to_rfc3339()),
            Some("2026-10-01T10:00:00+00:00".to_string())
        );
        assert_eq!(
            out.meta.ended_at.map(|t| t.to_rfc3339()),
            Some("2026-10-01T10:02:00+00:00".to_string())
        );
    }

    #[test]
    fn malformed_and_foreign_lines_are_skipped() {
        let raw = format!(
            "{}\n{{not json at all\n{}\n{}\n",
            json!({"type":"user","message":{"content":"first"}}),
            json!({"type":"file-history-snapshot","snapshot":{}}),
            json!({"type":"user","message":{"content":"second"}}),
        );
        let out = extract_event_log("x", &raw, &keys()).expect("session");
        assert_eq!(out.acc.user_messages, vec!["first", "second"]);
        assert_eq!(out.acc.message_count, 2);
    }

    #[test]
    fn usage_is_bucketed_per_model_and_totalled() {
        let raw = lines(&[
            json!({"type":"user","message":{"content":"go"}}),
            json!({"type":"assistant","message":{"model":"m-a","content":[],
                "usage":{"input_tokens":10,"output_tokens":5,"cache_creation_input_tokens":2,"cache_read_input_tokens":1}}}),
            json!({"type":"assistant","message":{"model":"m-a","content":[],
                "usage":{"input_tokens":1,"output_tokens":1}}}),
            json!({"type":"assistant","message":{"model":"m-b","content":[],
                "usage":{"input_tokens":4}}}),
            json!({"type":"assistant","message":{"content":[],"usage":{"output_tokens":7}}}),
        ]);
        let out = extract_event_log("x", &raw, &keys()).expect("session");
        let a = out.acc.model_tokens["m-a"];
        assert_eq!((a.input, a.output, a.cache_creation, a.cache_read), (11, 6, 2, 1));
        assert_eq!(out.acc.model_tokens["m-b"].input, 4);
        assert_eq!(out.acc.model_tokens[UNKNOWN_MODEL].output, 7);
        assert!(!out.acc.models.contains(UNKNOWN_MODEL));

        let mut sum = TokenCounts::default();
        for counts in out.acc.model_tokens.values() {
            sum.add(counts);
        }
        assert_eq!(sum, out.acc.token_totals);
    }

    #[test]
    fn path_walk_recurses_objects_but_not_arrays() {
        let raw = lines(&[
            json!({"type":"user","message":{"content":"refactor"}}),
            json!({"type":"assistant","message":{"content":[{"type":"tool_use","name":"MultiEdit","input":{
                "file_path":"src/a.rs",
                "path":"no-separator",
                "options":{"nested":{"notebook_path":"nb/x.ipynb"}},
                "edits":[{"file_path":"src/in_array.rs"}],
                "command":"cat src/ignored.rs"
            }}]}}),
        ]);
        let out = extract_event_log("x", &raw, &keys()).expect("session");
        let files: Vec<_> = out.acc.files.iter().map(String::as_str).collect();
        assert_eq!(files, vec!["nb/x.ipynb", "src/a.rs"]);
    }

    #[test]
    fn path_derived_id_wins_over_event_id() {
        let raw = lines(&[json!({"type":"user","sessionId":"stale","message":{"content":"hi"}})]);
        let source = "/home/u/.claude/projects/-work/6F1C2B3A-0D4E-4F5A-9B8C-7D6E5F4A3B2C.jsonl";
        let out = extract_event_log(source, &raw, &keys()).expect("session");
        assert_eq!(out.meta.id, "6F1C2B3A-0D4E-4F5A-9B8C-7D6E5F4A3B2C");
    }

    #[test]
    fn id_falls_back_to_unknown() {
        let raw = lines(&[json!({"type":"user","message":{"content":"hi"}})]);
        let out = extract_event_log("session.jsonl", &raw, &keys()).expect("session");
        assert_eq!(out.meta.id, UNKNOWN_SESSION_ID);
    }

    #[test]
    fn summary_line_sets_title_without_counting() {
        let raw = lines(&[
            json!({"type":"summary","summary":"Septa tracker"}),
            json!({"type":"user","message":{"content":"hi"}}),
        ]);
        let out = extract_event_log("x", &raw, &keys()).expect("session");
        assert_eq!(out.meta.title.as_deref(), Some("Septa tracker"));
        assert_eq!(out.acc.message_count, 1);
    }

    #[test]
    fn empty_and_tool_only_sessions_are_null() {
        assert!(extract_event_log("x", "", &keys()).is_none());

        let tool_only = lines(&[
            json!({"type":"user","message":{"content":[{"type":"tool_result","content":"ok"}]}}),
            json!({"type":"assistant","message":{"content":[{"type":"tool_use","name":"Bash","input":{}}]}}),
        ]);
        assert!(extract_event_log("x", &tool_only, &keys()).is_none());
    }

    #[test]
    fn export_collects_user_parts_tools_and_models() {
        let root = json!({
            "info": {"id":"ses_42","title":"Septa App","directory":"/work/app",
                     "time":{"created":1_790_000_000_000i64,"updated":1_790_000_600_000i64}},
            "messages": [
                {"role":"user","parts":[{"type":"text","text":"fix the bug"},{"type":"file","url":"x"}]},
                {"role":"assistant","model":"gpt-x","parts":[{"type":"text","text":"done"}],
                 "toolCalls":[{"name":"edit","input":{"filePath":"src/app.ts","path":"nosep","nested":{"file_path":"deep/x.rs"}}}]}
            ]
        });
        let keys = ExtractOptions::default().export_keys;
        let out = extract_export("ses_42", &root, &keys).expect("session");
        assert_eq!(out.acc.user_messages, vec!["fix the bug"]);
        assert_eq!(out.acc.files.iter().collect::<Vec<_>>(), vec!["src/app.ts"]);
        assert!(out.acc.tools.contains("edit"));
        assert!(out.acc.models.contains("gpt-x"));
        assert!(out.acc.model_tokens.is_empty());
        assert_eq!(out.acc.token_totals, TokenCounts::default());
        assert_eq!(out.acc.message_count, 2);
        assert_eq!(out.meta.id, "ses_42");
        assert_eq!(out.meta.title.as_deref(), Some("Septa App"));
        assert_eq!(out.meta.cwd, "/work/app");
        assert_eq!(out.meta.git_branch, "");
        assert!(out.meta.started_at < out.meta.ended_at);
    }

    #[test]
    fn export_reads_nested_info_role_and_model() {
        let root = json!({
            "info": {"title":"t"},
            "messages": [
                {"info":{"role":"user"},"parts":[{"type":"text","text":"hello"}]},
                {"info":{"role":"assistant","modelID":"claude-x"},"parts":[]}
            ]
        });
        let keys = ExtractOptions::default().export_keys;
        let out = extract_export("fallback-id", &root, &keys).expect("session");
        assert_eq!(out.meta.id, "fallback-id");
        assert!(out.acc.models.contains("claude-x"));
    }

    #[test]
    fn export_without_user_text_is_null() {
        let root = json!({"info":{"id":"a"},"messages":[{"role":"assistant","parts":[]}]});
        let keys = ExtractOptions::default().export_keys;
        assert!(extract_export("a", &root, &keys).is_none());
    }

    #[test]
    fn timestamps_accept_rfc3339_seconds_and_millis() {
        let a = parse_timestamp(&json!("2026-01-02T03:04:05Z")).expect("rfc3339");
        let b = parse_timestamp(&json!(a.timestamp())).expect("seconds");
        let c = parse_timestamp(&json!(a.timestamp_millis())).expect("millis");
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert!(parse_timestamp(&json!("yesterday")).is_none());
    }
}

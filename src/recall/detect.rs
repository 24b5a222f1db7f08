//! Format detection for raw session blobs.
//!
//! Two encodings are supported: a line-delimited event log (one JSON event
//! per line) and a single structured export object carrying `info` metadata
//! plus a `messages` list. Detection never fails; anything that is not a
//! recognisable export is handed to the line-delimited extractor.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionFormat {
    EventLog,
    Export,
}

impl SessionFormat {
    pub fn label(self) -> &'static str {
        match self {
            Self::EventLog => "event-log",
            Self::Export => "export",
        }
    }
}

/// A raw blob tagged with the encoding it was detected as.
#[derive(Debug, Clone)]
pub enum RawSession<'a> {
    EventLog(&'a str),
    Export(Value),
}

fn looks_like_export(value: &Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    obj.get("info").is_some_and(Value::is_object)
        && obj.get("messages").is_some_and(Value::is_array)
}

pub fn detect(raw: &str) -> RawSession<'_> {
    let trimmed = raw.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) if looks_like_export(&value) => RawSession::Export(value),
        _ => RawSession::EventLog(raw),
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecallError {
    #[error("export binary unavailable: {0}")]
    ExportBinaryUnavailable(String),
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("invalid date `{0}`: use RFC 3339 or YYYY-MM-DD")]
    InvalidDate(String),
    #[error("session store is locked by another process: {0}")]
    StoreLocked(String),
}

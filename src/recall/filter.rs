use crate::error::RecallError;
use crate::recall::normalize::NormalizedSession;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

/// Inclusion rules applied to each normalized session. Every unset rule is
/// vacuously satisfied; set rules are combined with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub days: Option<u32>,
    pub tools: Vec<String>,
    pub file_pattern: Option<String>,
}

impl SessionFilter {
    /// `days` resolves to an implicit lower bound relative to `now`; an
    /// explicit `since` still applies alongside it.
    pub fn matches(&self, session: &NormalizedSession, now: DateTime<Utc>) -> bool {
        let ended = session.ended_at;
        if self.since.is_some_and(|since| ended < since) {
            return false;
        }
        if self.until.is_some_and(|until| ended > until) {
            return false;
        }
        if let Some(days) = self.days
            && let Some(cutoff) = now.checked_sub_signed(Duration::days(i64::from(days)))
            && ended < cutoff
        {
            return false;
        }
        if !self.tools.is_empty() && !matches_any_tool(&self.tools, session) {
            return false;
        }
        if let Some(pattern) = self.file_pattern.as_deref()
            && !matches_file_pattern(pattern, session)
        {
            return false;
        }
        true
    }
}

fn matches_any_tool(requested: &[String], session: &NormalizedSession) -> bool {
    requested.iter().any(|want| {
        let want = want.to_lowercase();
        session
            .tools_used
            .iter()
            .any(|used| used.to_lowercase().contains(&want))
    })
}

fn matches_file_pattern(pattern: &str, session: &NormalizedSession) -> bool {
    let pattern = pattern.to_lowercase();
    session
        .files_from_tool_calls
        .iter()
        .any(|file| file.to_lowercase().contains(&pattern))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateBound {
    Start,
    End,
}

/// Parse a `--since`/`--until` value. Bare dates cover the whole UTC day:
/// a lower bound starts at midnight, an upper bound ends at the last instant.
pub fn parse_date_bound(raw: &str, bound: DateBound) -> Result<DateTime<Utc>, RecallError> {
    let trimmed = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map_err(|_| RecallError::InvalidDate(trimmed.to_string()))?;
    let start = date.and_time(NaiveTime::MIN).and_utc();
    Ok(match bound {
        DateBound::Start => start,
        DateBound::End => start + Duration::days(1) - Duration::milliseconds(1),
    })
}

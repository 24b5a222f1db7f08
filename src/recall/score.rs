//! Weighted substring relevance.
//!
//! Every distinct lowercase query term earns points for each field that
//! contains it. A user message counts once per term however often the term
//! repeats inside it. An empty query scores every session as 1 so that the
//! recency tie-break alone orders the results.

use crate::recall::normalize::NormalizedSession;
use std::collections::BTreeSet;

pub const TITLE_POINTS: u64 = 15;
pub const USER_MESSAGE_POINTS: u64 = 10;
pub const CWD_POINTS: u64 = 5;
pub const TOOL_POINTS: u64 = 3;
pub const FILE_POINTS: u64 = 3;

pub fn query_terms(query: &str) -> BTreeSet<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .map(ToOwned::to_owned)
        .collect()
}

fn count_containing<'a, I>(values: I, term: &str) -> u64
where
    I: IntoIterator<Item = &'a String>,
{
    values
        .into_iter()
        .filter(|value| value.to_lowercase().contains(term))
        .count() as u64
}

pub fn score_session(session: &NormalizedSession, query: Option<&str>) -> u64 {
    let terms = query.map(query_terms).unwrap_or_default();
    if terms.is_empty() {
        return 1;
    }

    let title = session.title.as_deref().unwrap_or_default().to_lowercase();
    let cwd = session.cwd.to_lowercase();

    let mut score = 0u64;
    for term in &terms {
        if title.contains(term.as_str()) {
            score += TITLE_POINTS;
        }
        score += USER_MESSAGE_POINTS * count_containing(&session.user_messages, term);
        if cwd.contains(term.as_str()) {
            score += CWD_POINTS;
        }
        score += TOOL_POINTS * count_containing(&session.tools_used, term);
        score += FILE_POINTS * count_containing(&session.files_from_tool_calls, term);
    }
    score
}

use anyhow::Result;
use chrono::{SecondsFormat, Utc};

use crate::recall::config::load_config;
use crate::recall::extract::ExtractOptions;
use crate::recall::filter::{DateBound, SessionFilter, parse_date_bound};
use crate::recall::paths::resolve_paths;
use crate::recall::search::{SearchOptions, SearchOutcome, search};
use crate::recall::source::configured_sources;
use crate::recall::util::preview_line;

const PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone, Default)]
pub struct SearchCommandOptions {
    pub query: Vec<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub days: Option<u32>,
    pub tools: Vec<String>,
    pub file: Option<String>,
    pub limit: Option<usize>,
}

fn build_request(opts: &SearchCommandOptions, default_limit: usize) -> Result<SearchOptions> {
    let since = opts
        .since
        .as_deref()
        .map(|raw| parse_date_bound(raw, DateBound::Start))
        .transpose()?;
    let until = opts
        .until
        .as_deref()
        .map(|raw| parse_date_bound(raw, DateBound::End))
        .transpose()?;
    let query = opts.query.join(" ");

    Ok(SearchOptions {
        query: (!query.trim().is_empty()).then_some(query),
        filter: SessionFilter {
            since,
            until,
            days: opts.days,
            tools: opts.tools.clone(),
            file_pattern: opts.file.clone(),
        },
        limit: Some(opts.limit.unwrap_or(default_limit)),
    })
}

pub fn run(opts: &SearchCommandOptions) -> Result<SearchOutcome> {
    let paths = resolve_paths()?;
    let cfg = load_config(&paths)?;
    let request = build_request(opts, cfg.search.default_limit)?;
    let sources = configured_sources(&paths, &cfg);
    let extract = ExtractOptions::from_config(&cfg.extract);
    Ok(search(&sources, &request, &extract, Utc::now()))
}

pub fn render_text(outcome: &SearchOutcome) -> String {
    let stats = &outcome.stats;
    let skipped = stats.fetch_failures + stats.enumerate_failures;
    let footer = if skipped > 0 {
        format!(
            "matched {} of {} sessions ({skipped} skipped on error)\n",
            stats.matched, stats.enumerated
        )
    } else {
        format!("matched {} of {} sessions\n", stats.matched, stats.enumerated)
    };
    if outcome.results.is_empty() {
        return format!("no matching sessions\n{footer}");
    }

    let mut out = String::new();
    for (idx, ranked) in outcome.results.iter().enumerate() {
        let s = &ranked.session;
        let title = s
            .title
            .as_deref()
            .or_else(|| s.user_messages.first().map(String::as_str))
            .unwrap_or_default();
        out.push_str(&format!(
            "{}. [{}] {}\n",
            idx + 1,
            ranked.relevance,
            preview_line(title, PREVIEW_CHARS)
        ));
        out.push_str(&format!("   id={} format={}\n", s.id, s.session_format.label()));
        out.push_str(&format!(
            "   ended={} messages={} tokens={}\n",
            s.ended_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            s.message_count,
            s.token_totals.total()
        ));
        if !s.cwd.is_empty() {
            out.push_str(&format!("   cwd={}", s.cwd));
            if !s.git_branch.is_empty() {
                out.push_str(&format!(" branch={}", s.git_branch));
            }
            out.push('\n');
        }
        if !s.tools_used.is_empty() {
            let tools: Vec<&str> = s.tools_used.iter().map(String::as_str).collect();
            out.push_str(&format!("   tools={}\n", tools.join(",")));
        }
    }
    out.push_str(&footer);
    out
}

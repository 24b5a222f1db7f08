use crate::recall::extract::ExtractOptions;
use crate::recall::filter::SessionFilter;
use crate::recall::normalize::{NormalizedSession, parse_session};
use crate::recall::score::score_session;
use crate::recall::source::SessionSource;
use crate::recall::warn::{self, WarnEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: usize = 20;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    pub query: Option<String>,
    pub filter: SessionFilter,
    pub limit: Option<usize>,
}

impl SearchOptions {
    fn query(&self) -> Option<&str> {
        self.query.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedSession {
    #[serde(flatten)]
    pub session: NormalizedSession,
    pub relevance: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    pub enumerated: usize,
    pub fetch_failures: usize,
    pub enumerate_failures: usize,
    pub missing: usize,
    pub empty: usize,
    pub filtered_out: usize,
    pub zero_score: usize,
    pub matched: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub results: Vec<RankedSession>,
    pub stats: SearchStats,
}

/// Relevance descending, then most recently ended first.
pub fn rank(results: &mut [RankedSession]) {
    results.sort_by(|a, b| {
        b.relevance
            .cmp(&a.relevance)
            .then_with(|| b.session.ended_at.cmp(&a.session.ended_at))
    });
}

fn fetch_failed(source: &dyn SessionSource, id: &str, err: &anyhow::Error) {
    warn::emit(WarnEvent {
        code: "FETCH_FAILED",
        stage: "search",
        action: "fetch-session",
        session: id,
        source: source.name(),
        retry: "next-run",
        reason: "session-skipped",
        err: &format!("{err:#}"),
    });
}

/// Evaluate one parsed session against the request; `None` when it is
/// filtered out or, for a non-empty query, scores zero.
fn evaluate(
    session: NormalizedSession,
    opts: &SearchOptions,
    now: DateTime<Utc>,
    stats: &mut SearchStats,
) -> Option<RankedSession> {
    if !opts.filter.matches(&session, now) {
        stats.filtered_out += 1;
        return None;
    }
    let query = opts.query();
    let relevance = score_session(&session, query);
    if query.is_some() && relevance == 0 {
        stats.zero_score += 1;
        return None;
    }
    Some(RankedSession { session, relevance })
}

/// Run the full recall pipeline over every source. Per-session failures are
/// warned about and counted; they never abort the run.
pub fn search(
    sources: &[Box<dyn SessionSource>],
    opts: &SearchOptions,
    extract: &ExtractOptions,
    now: DateTime<Utc>,
) -> SearchOutcome {
    let mut stats = SearchStats::default();
    let mut results = Vec::new();

    for source in sources {
        let ids = match source.enumerate() {
            Ok(ids) => ids,
            Err(err) => {
                stats.enumerate_failures += 1;
                warn::emit(WarnEvent {
                    code: "ENUMERATE_FAILED",
                    stage: "search",
                    action: "enumerate-sessions",
                    session: "",
                    source: source.name(),
                    retry: "next-run",
                    reason: "source-skipped",
                    err: &format!("{err:#}"),
                });
                continue;
            }
        };

        for id in ids {
            stats.enumerated += 1;
            let raw = match source.fetch(&id) {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    stats.missing += 1;
                    continue;
                }
                Err(err) => {
                    stats.fetch_failures += 1;
                    fetch_failed(source.as_ref(), &id, &err);
                    continue;
                }
            };

            let Some(session) = parse_session(&id, &raw, extract) else {
                stats.empty += 1;
                continue;
            };
            if let Some(ranked) = evaluate(session, opts, now, &mut stats) {
                results.push(ranked);
            }
        }
    }

    stats.matched = results.len();
    rank(&mut results);
    results.truncate(opts.limit.unwrap_or(DEFAULT_LIMIT));

    SearchOutcome { results, stats }
}

#[cfg(test)]
mod tests {
    use super::{SearchOptions, SearchOutcome, SessionSource, search};
    use crate::recall::extract::ExtractOptions;
    use crate::recall::filter::SessionFilter;
    use anyhow::Result;
    use chrono::{DateTime, Duration, Utc};
    use serde_json::{Value, json};
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct FixtureSource {
        blobs: BTreeMap<String, Option<String>>,
        fail_enumerate: bool,
    }

    impl FixtureSource {
        fn with(mut self, id: &str, raw: Option<String>) -> Self {
            self.blobs.insert(id.to_string(), raw);
            self
        }
    }

    impl SessionSource for FixtureSource {
        fn name(&self) -> &'static str {
            "fixture"
        }

        fn enumerate(&self) -> Result<Vec<String>> {
            if self.fail_enumerate {
                anyhow::bail!("listing exploded");
            }
            Ok(self.blobs.keys().cloned().collect())
        }

        fn fetch(&self, id: &str) -> Result<Option<String>> {
            match self.blobs.get(id) {
                Some(Some(raw)) if raw == "FAIL" => anyhow::bail!("fetch exploded"),
                Some(raw) => Ok(raw.clone()),
                None => Ok(None),
            }
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-19T12:00:00Z")
            .expect("valid timestamp")
            .with_timezone(&Utc)
    }

    fn jsonl(events: &[Value]) -> String {
        events
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn user_session(text: &str, ended: DateTime<Utc>) -> String {
        jsonl(&[json!({"type":"user","timestamp":ended.to_rfc3339(),"message":{"content":text}})])
    }

    fn run(sources: Vec<Box<dyn SessionSource>>, opts: &SearchOptions) -> SearchOutcome {
        search(&sources, opts, &ExtractOptions::default(), now())
    }

    fn query(q: &str) -> SearchOptions {
        SearchOptions {
            query: Some(q.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn scenario_event_log_scores_message_and_file() {
        let raw = jsonl(&[
            json!({"type":"user","message":{"content":"Let's build septa tracker"}}),
            json!({"type":"assistant","message":{"content":[
                {"type":"tool_use","name":"Write","input":{"file_path":"src/septa.ts"}}]}}),
            json!({"type":"user","message":{"content":"ship it"}}),
        ]);
        let source = FixtureSource::default().with("a", Some(raw));
        let out = run(vec![Box::new(source)], &query("septa"));
        assert_eq!(out.results.len(), 1);
        assert!(out.results[0].relevance >= 13);
    }

    #[test]
    fn scenario_export_title_message_and_miss() {
        let raw = json!({
            "info": {"id":"e","title":"Septa App"},
            "messages": [{"role":"user","parts":[{"type":"text","text":"fix the bug"}]}]
        })
        .to_string();
        let source = || -> Vec<Box<dyn SessionSource>> {
            vec![Box::new(FixtureSource::default().with("e", Some(raw.clone())))]
        };

        assert_eq!(run(source(), &query("septa")).results[0].relevance, 15);
        assert_eq!(run(source(), &query("fix")).results[0].relevance, 10);
        let miss = run(source(), &query("nothing"));
        assert!(miss.results.is_empty());
        assert_eq!(miss.stats.zero_score, 1);
    }

    #[test]
    fn empty_transcript_is_excluded_even_without_filters() {
        let source = FixtureSource::default().with("empty", Some(String::new()));
        let out = run(vec![Box::new(source)], &SearchOptions::default());
        assert!(out.results.is_empty());
        assert_eq!(out.stats.empty, 1);
    }

    #[test]
    fn days_filter_beats_perfect_match() {
        let source = FixtureSource::default().with(
            "old",
            Some(user_session("septa septa", now() - Duration::days(10))),
        );
        let opts = SearchOptions {
            query: Some("septa".into()),
            filter: SessionFilter {
                days: Some(7),
                ..Default::default()
            },
            limit: None,
        };
        let out = run(vec![Box::new(source)], &opts);
        assert!(out.results.is_empty());
        assert_eq!(out.stats.filtered_out, 1);
    }

    #[test]
    fn malformed_line_between_valid_lines_is_ignored() {
        let raw = format!(
            "{}\n{{\"type\":\"user\",broken\n{}",
            json!({"type":"user","message":{"content":"alpha"}}),
            json!({"type":"user","message":{"content":"beta"}}),
        );
        let source = FixtureSource::default().with("m", Some(raw));
        let out = run(vec![Box::new(source)], &SearchOptions::default());
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.results[0].session.user_messages, vec!["alpha", "beta"]);
        assert_eq!(out.results[0].relevance, 1);
    }

    #[test]
    fn results_sort_by_relevance_then_recency() {
        let t = now();
        let source = FixtureSource::default()
            .with("a", Some(user_session("api", t - Duration::days(3))))
            .with("b", Some(user_session("api", t - Duration::days(1))))
            .with("c", Some(jsonl(&[
                json!({"type":"user","timestamp":(t - Duration::days(9)).to_rfc3339(),"message":{"content":"api"}}),
                json!({"type":"user","message":{"content":"api again"}}),
            ])))
            .with("d", Some(user_session("api", t - Duration::days(2))));
        let out = run(vec![Box::new(source)], &query("api"));

        let order: Vec<(u64, DateTime<Utc>)> = out
            .results
            .iter()
            .map(|r| (r.relevance, r.session.ended_at))
            .collect();
        assert_eq!(order[0].0, 20);
        for pair in order.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert!(a.0 > b.0 || (a.0 == b.0 && a.1 >= b.1));
        }
    }

    #[test]
    fn limit_truncates_after_sorting() {
        let t = now();
        let mut source = FixtureSource::default();
        for day in 0..30 {
            source = source.with(
                &format!("s{day:02}"),
                Some(user_session("hello", t - Duration::days(day))),
            );
        }
        let sources: Vec<Box<dyn SessionSource>> = vec![Box::new(source)];

        let default = search(&sources, &SearchOptions::default(), &ExtractOptions::default(), t).results;
        assert_eq!(default.len(), 20);
        assert_eq!(default[0].session.ended_at, t);

        let opts = SearchOptions {
            limit: Some(3),
            ..Default::default()
        };
        let limited = search(&sources, &opts, &ExtractOptions::default(), t).results;
        assert_eq!(limited.len(), 3);
        assert_eq!(limited[2].session.ended_at, t - Duration::days(2));
    }

    #[test]
    fn failures_are_counted_not_fatal() {
        let broken = FixtureSource {
            fail_enumerate: true,
            ..Default::default()
        };
        let flaky = FixtureSource::default()
            .with("bad", Some("FAIL".to_string()))
            .with("gone", None)
            .with("ok", Some(user_session("fine", now())));
        let out = run(vec![Box::new(broken), Box::new(flaky)], &SearchOptions::default());
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.stats.enumerate_failures, 1);
        assert_eq!(out.stats.fetch_failures, 1);
        assert_eq!(out.stats.missing, 1);
        assert_eq!(out.stats.enumerated, 3);
    }

    #[test]
    fn ranked_session_serializes_flat_camel_case() {
        let source = FixtureSource::default().with("x", Some(user_session("hello", now())));
        let out = run(vec![Box::new(source)], &SearchOptions::default());
        let value = serde_json::to_value(&out.results[0]).expect("serialize");
        assert_eq!(value["relevance"], 1);
        assert_eq!(value["messageCount"], 1);
        assert!(value["userMessages"].is_array());
        assert!(value["filesFromToolCalls"].is_array());
        assert!(value.get("session").is_none());
    }
}

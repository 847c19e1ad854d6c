use std::{collections::HashSet, sync::LazyLock};

use regex::Regex;
use runlens_core::models::ErrorContext;
use time::{
    Date, Month, OffsetDateTime, PrimitiveDateTime, Time, format_description::well_known::Rfc3339,
};

/// Lines of context kept before a trigger line.
pub const CONTEXT_BEFORE: usize = 10;
/// Lines of context kept after a trigger line.
pub const CONTEXT_AFTER: usize = 10;
/// How far past a group's end a later trigger still joins the group.
pub const MERGE_EXTENSION: usize = 10;

const GITHUB_ERROR: &str = "##[error]";
const TPCC_SUMMARY: &str = "There are some unexpected error in benchmarksql-error.log.";
const TPCC_TERMINAL: &str = "FATAL jTPCCTerminal";
const TPCH_BOILERPLATE: &[&str] = &[
    "##[error]process completed with exit code",
    "this test has been executed failed, more info, please see the log",
    "process completed with exit code 1",
];

static TIMESTAMP_START: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d{4}-\d{2}-\d{2}[T\s]").unwrap());
static ERROR_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?:^|\s)ERROR\b").unwrap());
static KILLED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bkilled\b|exit code").unwrap());
static LOWER_ERROR_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\berror\b").unwrap());
static ISO_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?Z\b").unwrap()
});
static BASIC_TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\s+(\d{2}):(\d{2}):(\d{2})\b").unwrap()
});

#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractOptions<'a> {
    pub step_name: Option<&'a str>,
    pub job_name: Option<&'a str>,
    /// When nothing else survives, fall back to a window around the last `##[error]` line.
    pub allow_final_error_fallback: bool,
}

/// Workloads with their own notion of a relevant failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Tpcc,
    Tpch,
}

impl Scenario {
    pub fn detect(step_name: Option<&str>, job_name: Option<&str>) -> Option<Self> {
        let source =
            format!("{} {}", step_name.unwrap_or_default(), job_name.unwrap_or_default())
                .to_lowercase();
        if source.contains("tpcc") {
            Some(Self::Tpcc)
        } else if source.contains("tpch") {
            Some(Self::Tpch)
        } else {
            None
        }
    }
}

/// Whether `line` opens an error context.
pub fn is_trigger(line: &str) -> bool {
    if line.trim_start().starts_with(GITHUB_ERROR) {
        return true;
    }
    TIMESTAMP_START.is_match(line)
        && (line.contains("FATAL") || ERROR_WORD.is_match(line) || KILLED.is_match(line))
}

#[derive(Debug, Clone)]
struct Group {
    start: usize,
    end: usize,
    merge_until: usize,
    first_match: usize,
}

struct Candidate {
    start: usize,
    end: usize,
    first_match: usize,
    snippet: String,
}

fn window(index: usize, line_count: usize) -> (usize, usize) {
    (index.saturating_sub(CONTEXT_BEFORE), (index + CONTEXT_AFTER + 1).min(line_count))
}

fn snippet(lines: &[&str], start: usize, end: usize) -> String {
    lines[start..end].join("\n").trim().to_string()
}

fn group_triggers(lines: &[&str]) -> Vec<Group> {
    let mut groups: Vec<Group> = vec![];
    for (i, line) in lines.iter().enumerate() {
        if !is_trigger(line) {
            continue;
        }
        let (start, end) = window(i, lines.len());
        if let Some(last) = groups.last_mut()
            && i <= last.merge_until
        {
            last.start = last.start.min(start);
            last.end = last.end.max(end);
            last.merge_until = last.merge_until.max(end + MERGE_EXTENSION).min(lines.len());
            last.first_match = last.first_match.min(i);
            continue;
        }
        groups.push(Group {
            start,
            end,
            merge_until: (end + MERGE_EXTENSION).min(lines.len()),
            first_match: i,
        });
    }
    groups
}

fn is_tpch_boilerplate(line: &str) -> bool {
    let value = line.trim().to_lowercase();
    !value.is_empty() && TPCH_BOILERPLATE.iter().any(|b| value.contains(b))
}

fn is_tpch_summary(snippet: &str) -> bool {
    let mut lines = snippet.lines().map(str::trim).filter(|l| !l.is_empty()).peekable();
    lines.peek().is_some() && lines.all(is_tpch_boilerplate)
}

fn has_tpch_signal(snippet: &str) -> bool {
    snippet.split('\n').any(|line| {
        if is_tpch_boilerplate(line) {
            return false;
        }
        let value = line.trim().to_lowercase();
        !value.is_empty()
            && (value.contains("error ")
                || value.contains("error:")
                || value.contains("fatal")
                || value.contains("exception")
                || value.contains("timeout")
                || value.contains("fail ")
                || value.ends_with(" fail")
                || LOWER_ERROR_WORD.is_match(&value))
    })
}

fn filter_scenario(
    candidates: Vec<Candidate>,
    scenario: Option<Scenario>,
    lines: &[&str],
) -> Vec<Candidate> {
    match scenario {
        None => candidates,
        Some(Scenario::Tpcc) => {
            let summary = lines.iter().position(|l| l.contains(TPCC_SUMMARY));
            candidates
                .into_iter()
                .filter(|c| summary.is_none_or(|s| c.first_match < s))
                .filter(|c| c.snippet.contains(TPCC_TERMINAL))
                .collect()
        }
        Some(Scenario::Tpch) => candidates
            .into_iter()
            .filter(|c| !is_tpch_summary(&c.snippet) && has_tpch_signal(&c.snippet))
            .collect(),
    }
}

/// Epoch milliseconds of the first timestamp on `line`. ISO-8601 UTC stamps win over the
/// basic `YYYY-MM-DD HH:MM:SS` form, which is read as UTC.
pub fn line_timestamp_ms(line: &str) -> Option<i64> {
    if let Some(m) = ISO_TIMESTAMP.find(line) {
        return OffsetDateTime::parse(m.as_str(), &Rfc3339).ok().map(epoch_ms);
    }
    let caps = BASIC_TIMESTAMP.captures(line)?;
    let field = |i: usize| caps[i].parse::<u16>().ok();
    let month = Month::try_from(field(2)? as u8).ok()?;
    let date = Date::from_calendar_date(field(1)? as i32, month, field(3)? as u8).ok()?;
    let time = Time::from_hms(field(4)? as u8, field(5)? as u8, field(6)? as u8).ok()?;
    Some(epoch_ms(PrimitiveDateTime::new(date, time).assume_utc()))
}

fn epoch_ms(value: OffsetDateTime) -> i64 { (value.unix_timestamp_nanos() / 1_000_000) as i64 }

fn timestamp_range(lines: &[&str]) -> (Option<i64>, Option<i64>) {
    let mut stamps = lines.iter().filter_map(|l| line_timestamp_ms(l));
    let Some(first) = stamps.next() else {
        return (None, None);
    };
    let (min, max) = stamps.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t)));
    (Some(min), Some(max))
}

/// Extract the error contexts of one step log, ordered by start line.
pub fn extract_error_contexts(log: &str, options: &ExtractOptions) -> Vec<ErrorContext> {
    if log.is_empty() {
        return vec![];
    }
    let lines: Vec<&str> = log.split('\n').collect();
    let candidates = group_triggers(&lines)
        .into_iter()
        .map(|g| Candidate {
            start: g.start,
            end: g.end,
            first_match: g.first_match,
            snippet: snippet(&lines, g.start, g.end),
        })
        .collect();
    let scenario = Scenario::detect(options.step_name, options.job_name);
    let candidates = filter_scenario(candidates, scenario, &lines);

    let mut seen = HashSet::new();
    let mut contexts = vec![];
    for candidate in candidates {
        if candidate.snippet.is_empty() || !seen.insert(candidate.snippet.clone()) {
            continue;
        }
        let (start_timestamp, end_timestamp) =
            timestamp_range(&lines[candidate.start..candidate.end]);
        contexts.push(ErrorContext {
            start_line: candidate.start + 1,
            end_line: candidate.end,
            snippet: candidate.snippet,
            start_timestamp,
            end_timestamp,
            grafana_url: None,
            ai_summary: None,
        });
    }

    if contexts.is_empty()
        && options.allow_final_error_fallback
        && let Some(index) = lines.iter().rposition(|l| l.trim_start().starts_with(GITHUB_ERROR))
    {
        let (start, end) = window(index, lines.len());
        let snippet = snippet(&lines, start, end);
        if !snippet.is_empty() {
            contexts.push(ErrorContext {
                start_line: start + 1,
                end_line: end,
                snippet,
                start_timestamp: None,
                end_timestamp: None,
                grafana_url: None,
                ai_summary: None,
            });
        }
    }
    contexts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(n: usize, prefix: &str) -> Vec<String> {
        (0..n).map(|i| format!("{prefix} line {i}")).collect()
    }

    fn log_with_triggers(len: usize, triggers: &[(usize, &str)]) -> String {
        let mut lines = plain(len, "info");
        for &(index, line) in triggers {
            lines[index] = line.to_string();
        }
        lines.join("\n")
    }

    fn extract(log: &str) -> Vec<ErrorContext> {
        extract_error_contexts(log, &ExtractOptions::default())
    }

    #[test]
    fn test_single_error_window() {
        let log = log_with_triggers(31, &[(15, "##[error] boom")]);
        let contexts = extract(&log);
        assert_eq!(contexts.len(), 1);
        let ctx = &contexts[0];
        assert!(ctx.snippet.contains("boom"));
        assert_eq!((ctx.start_line, ctx.end_line), (6, 26));
        assert_eq!(ctx.end_line - ctx.start_line + 1, 21);
        assert_eq!(ctx.snippet.lines().count(), 21);
        assert_eq!(ctx.start_timestamp, None);
    }

    #[test]
    fn test_window_clamped_to_log() {
        let contexts = extract("##[error]first line fails\nafter");
        assert_eq!(contexts.len(), 1);
        assert_eq!((contexts[0].start_line, contexts[0].end_line), (1, 2));
    }

    #[test]
    fn test_merge_distance() {
        let near = log_with_triggers(60, &[(20, "##[error] one"), (25, "##[error] two")]);
        let contexts = extract(&near);
        assert_eq!(contexts.len(), 1);
        assert_eq!((contexts[0].start_line, contexts[0].end_line), (11, 36));

        let far = log_with_triggers(80, &[(20, "##[error] one"), (45, "##[error] two")]);
        let contexts = extract(&far);
        assert_eq!(contexts.len(), 2);
        assert!(contexts[0].snippet.contains("one") && !contexts[0].snippet.contains("two"));
        assert!(contexts[1].snippet.contains("two"));
        assert!(contexts[0].end_line < contexts[1].start_line);
    }

    #[test]
    fn test_ranges_ordered_and_disjoint() {
        let triggers: Vec<(usize, &str)> =
            [3, 9, 40, 58, 90, 121, 125, 170].iter().map(|&i| (i, "##[error] x")).collect();
        let log = log_with_triggers(200, &triggers);
        let contexts = extract(&log);
        assert!(contexts.len() > 1);
        for pair in contexts.windows(2) {
            assert!(pair[0].start_line <= pair[0].end_line);
            assert!(pair[0].end_line < pair[1].start_line);
        }
        assert_eq!(extract(&log), contexts);
    }

    #[test]
    fn test_trigger_detection() {
        let cases: &[(&str, bool)] = &[
            ("##[error]Process completed with exit code 1.", true),
            ("   ##[error]indented", true),
            ("2024-05-01T10:00:00.123Z ERROR something broke", true),
            ("2024-05-01 10:00:00 [FATAL] disk full", true),
            ("2024-05-01T10:00:00Z worker killed by OOM", true),
            ("2024-05-01T10:00:00Z Process exited with Exit Code 137", true),
            ("2024-05-01T10:00:00Z no_ERRORS here", false),
            ("2024-05-01T10:00:00Z error in lowercase", false),
            ("ERROR without a timestamp", false),
            ("plain line", false),
        ];
        for &(line, expected) in cases {
            assert_eq!(is_trigger(line), expected, "{line}");
        }
    }

    #[test]
    fn test_timestamps() {
        let log = "\
2024-05-01T10:00:05.5000000Z step output
2024-05-01T10:00:01.0000000Z ERROR boom
2024-05-01T10:00:09Z trailing";
        let contexts = extract(log);
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].start_timestamp, Some(1_714_557_601_000));
        assert_eq!(contexts[0].end_timestamp, Some(1_714_557_609_000));

        let cases: &[(&str, Option<i64>)] = &[
            ("2024-05-01T10:00:05.5000000Z x", Some(1_714_557_605_500)),
            ("at 2024-05-01 10:00:05 INFO", Some(1_714_557_605_000)),
            ("2024-05-01 10:00:00 and 2024-05-01T10:00:07Z", Some(1_714_557_607_000)),
            ("2024-13-01 10:00:00", None),
            ("no timestamp", None),
        ];
        for &(line, expected) in cases {
            assert_eq!(line_timestamp_ms(line), expected, "{line}");
        }
    }

    #[test]
    fn test_dedup_identical_snippets() {
        let mut lines = vec!["##[error] same".to_string()];
        lines.extend(std::iter::repeat_n(String::new(), 40));
        lines.push("##[error] same".to_string());
        let contexts = extract(&lines.join("\n"));
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].snippet, "##[error] same");
    }

    #[test]
    fn test_scenario_detection() {
        let cases: &[(Option<&str>, Option<&str>, Option<Scenario>)] = &[
            (Some("Run TPCC 10 warehouses"), None, Some(Scenario::Tpcc)),
            (None, Some("tpch-1g"), Some(Scenario::Tpch)),
            (Some("tpch vs tpcc"), None, Some(Scenario::Tpcc)),
            (Some("sysbench"), Some("nightly"), None),
        ];
        for &(step, job, expected) in cases {
            assert_eq!(Scenario::detect(step, job), expected);
        }
    }

    #[test]
    fn test_tpch_drops_boilerplate() {
        let options = ExtractOptions { step_name: Some("Run TPCH 1G"), ..Default::default() };
        let log = "##[error]Process completed with exit code 1.";
        assert!(extract_error_contexts(log, &options).is_empty());

        let mut lines = plain(30, "query");
        lines[2] = "2024-05-01T10:00:00Z ERROR q17 failed: Exception in thread main".to_string();
        lines[28] = "##[error]Process completed with exit code 1.".to_string();
        let log = lines.join("\n");
        let contexts = extract_error_contexts(&log, &options);
        assert_eq!(contexts.len(), 1);
        assert!(contexts[0].snippet.contains("q17"));
    }

    #[test]
    fn test_tpch_requires_signal() {
        let options = ExtractOptions { job_name: Some("tpch"), ..Default::default() };
        let log = "some output\n##[error]Process completed with exit code 1.\nmore output";
        assert!(extract_error_contexts(log, &options).is_empty());
    }

    #[test]
    fn test_tpcc_filter() {
        let mut lines = plain(80, "bench");
        lines[5] = "2024-05-01T10:00:00Z FATAL jTPCCTerminal - terminal 3 died".to_string();
        lines[40] = "2024-05-01T10:05:00Z ERROR connection lost".to_string();
        lines[60] = "There are some unexpected error in benchmarksql-error.log.".to_string();
        lines[62] = "2024-05-01T10:06:00Z FATAL jTPCCTerminal - after summary".to_string();
        let options = ExtractOptions { step_name: Some("Run TPCC"), ..Default::default() };
        let contexts = extract_error_contexts(&lines.join("\n"), &options);
        assert_eq!(contexts.len(), 1);
        assert!(contexts[0].snippet.contains("terminal 3 died"));
    }

    #[test]
    fn test_final_error_fallback() {
        let log = "setup\n##[error]Process completed with exit code 1.\n";
        let options = ExtractOptions {
            step_name: Some("tpch"),
            allow_final_error_fallback: true,
            ..Default::default()
        };
        let contexts = extract_error_contexts(log, &options);
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].snippet, "setup\n##[error]Process completed with exit code 1.");
        assert_eq!(contexts[0].start_timestamp, None);

        let no_errors = ExtractOptions { allow_final_error_fallback: true, ..Default::default() };
        assert!(extract_error_contexts("all good\nbye", &no_errors).is_empty());
        assert!(extract_error_contexts("", &no_errors).is_empty());
    }
}

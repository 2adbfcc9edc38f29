//! Query pipeline: filters, ranking, previews, highlighting.
//!
//! # Architecture overview
//!
//! A query flows through four stages:
//!
//! 1. Tokenize the user string (empty query → empty result, not an error).
//! 2. Score candidate conversations against the index, with last-token
//!    prefix expansion (live-as-you-type) and one-edit fuzzy expansion.
//! 3. Apply repository and date filters against catalog metadata.
//! 4. Enrich the top hits: per-hit match counts and a highlighted preview
//!    window, both computed from a fresh parse of the source file so the
//!    index never has to store text.
//!
//! Stage 4 is the expensive part (file I/O per hit), so the optional
//! deadline is checked between hits there: an exceeded deadline truncates
//! enrichment and sets `timed_out` on the response rather than erroring.
//!
//! # Highlighting protocol
//!
//! Matched tokens in `highlighted_preview` are wrapped with the literal
//! sentinels `[HIGHLIGHT]` and `[/HIGHLIGHT]`. `preview` is always a
//! literal substring of the conversation's concatenated text; stripping
//! the sentinels from `highlighted_preview` yields `preview` exactly.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, LocalResult, NaiveDate, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::error::RecollectError;
use crate::index::IndexStore;
use crate::index::tokenize::tokenize;
use crate::model::Conversation;
use crate::parser;

/// Half-width of the preview window, in whitespace-delimited words on each
/// side of the earliest match (~30 words total).
const PREVIEW_WORDS_EACH_SIDE: usize = 15;

pub const HIGHLIGHT_OPEN: &str = "[HIGHLIGHT]";
pub const HIGHLIGHT_CLOSE: &str = "[/HIGHLIGHT]";

/// Inclusive date window. `None` bounds are open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        if let Some(from) = self.from {
            if ts < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if ts > to {
                return false;
            }
        }
        true
    }

    /// Resolve a named preset against the local wall clock.
    pub fn from_preset(name: &str) -> Result<DateRange, RecollectError> {
        Self::from_preset_at(name, Local::now().date_naive())
    }

    /// Inclusive range from explicit local calendar days; either bound may
    /// be open.
    pub fn from_days(from: Option<NaiveDate>, to: Option<NaiveDate>) -> DateRange {
        DateRange {
            from: from.map(local_day_start),
            to: to.map(|d| {
                local_day_start(d + ChronoDuration::days(1)) - ChronoDuration::milliseconds(1)
            }),
        }
    }

    /// Preset resolution with an injectable "today" for tests.
    pub fn from_preset_at(name: &str, today: NaiveDate) -> Result<DateRange, RecollectError> {
        let canonical: String = name
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        let range = match canonical.as_str() {
            "today" => day_range(today, today),
            "yesterday" => {
                let y = today - ChronoDuration::days(1);
                day_range(y, y)
            }
            "last7days" => day_range(today - ChronoDuration::days(6), today),
            "last30days" => day_range(today - ChronoDuration::days(29), today),
            "last90days" => day_range(today - ChronoDuration::days(89), today),
            "thismonth" => day_range(month_start(today), today),
            "lastmonth" => {
                let this_start = month_start(today);
                let last_end = this_start - ChronoDuration::days(1);
                day_range(month_start(last_end), last_end)
            }
            "thisyear" => day_range(year_start(today), today),
            "lastyear" => {
                let start = year_start(today - ChronoDuration::days(today.ordinal0() as i64 + 1));
                let end = year_start(today) - ChronoDuration::days(1);
                day_range(start, end)
            }
            _ => return Err(RecollectError::UnknownPreset(name.to_string())),
        };
        Ok(range)
    }
}

/// Inclusive `[start-of-from .. end-of-to]` in local time.
fn day_range(from: NaiveDate, to: NaiveDate) -> DateRange {
    DateRange {
        from: Some(local_day_start(from)),
        to: Some(local_day_start(to + ChronoDuration::days(1)) - ChronoDuration::milliseconds(1)),
    }
}

/// Local midnight of `date` as UTC, tolerating DST gaps and ambiguities.
fn local_day_start(date: NaiveDate) -> DateTime<Utc> {
    for (h, m) in [(0u32, 0u32), (1, 0), (2, 0)] {
        if let Some(naive) = date.and_hms_opt(h, m, 0) {
            match naive.and_local_timezone(Local) {
                LocalResult::Single(dt) => return dt.with_timezone(&Utc),
                LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
                // Midnight inside a DST gap: try the next hour.
                LocalResult::None => continue,
            }
        }
    }
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
}

fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}

fn year_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date)
}

/// Repository and date constraints on a search.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    /// Empty set means no repository filter.
    pub repos: BTreeSet<String>,
    pub date_range: Option<DateRange>,
}

impl Filters {
    pub fn matches(&self, conversation: &Conversation) -> bool {
        if !self.repos.is_empty() && !self.repos.contains(&conversation.project) {
            return false;
        }
        if let Some(range) = &self.date_range {
            if !range.contains(conversation.effective_ts()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub filters: Filters,
    pub limit: usize,
    /// Wall-clock budget for the whole query; exceeding it returns partial
    /// results with `timed_out` set.
    pub deadline: Option<Duration>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filters: Filters::default(),
            limit: 10,
            deadline: None,
        }
    }
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hit {
    pub conversation_id: String,
    pub project: String,
    pub path: String,
    pub mtime: DateTime<Utc>,
    pub size_bytes: u64,
    /// Lines of the conversation text containing any query token.
    pub matches: usize,
    /// Normalized score in [0, 1].
    pub relevance: f64,
    pub preview: String,
    pub highlighted_preview: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    /// Conversations matching the query and filters, before `limit`.
    pub total: usize,
    pub hits: Vec<Hit>,
    pub took_ms: u64,
    pub timed_out: bool,
}

impl SearchResponse {
    fn empty(started: Instant) -> Self {
        Self {
            total: 0,
            hits: Vec::new(),
            took_ms: started.elapsed().as_millis() as u64,
            timed_out: false,
        }
    }
}

/// Run the full query pipeline against committed catalog and index state.
pub fn run_search(catalog: &Catalog, index: &IndexStore, request: &SearchRequest) -> SearchResponse {
    let started = Instant::now();
    let deadline = request.deadline.map(|d| started + d);

    let tokens = tokenize(&request.query);
    if tokens.is_empty() {
        return SearchResponse::empty(started);
    }

    let scores = index.match_scores(&tokens, true);

    let mut ranked: Vec<(&Conversation, f64)> = Vec::new();
    let mut max_score = 0.0f64;
    for (id, score) in &scores {
        let Ok(conversation) = catalog.resolve(id) else {
            continue;
        };
        if !request.filters.matches(conversation) {
            continue;
        }
        if *score > max_score {
            max_score = *score;
        }
        ranked.push((conversation, *score));
    }

    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.0.mtime.cmp(&a.0.mtime))
    });

    let total = ranked.len();
    let mut hits = Vec::new();
    let mut timed_out = false;

    for (conversation, score) in ranked.into_iter().take(request.limit.max(1)) {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                timed_out = true;
                break;
            }
        }
        let text = conversation_text(conversation);
        let (matches, preview, highlighted_preview) = preview_with_matches(&text, &tokens);
        hits.push(Hit {
            conversation_id: conversation.id.clone(),
            project: conversation.project.clone(),
            path: conversation.source_path.to_string_lossy().to_string(),
            mtime: conversation.mtime,
            size_bytes: conversation.size_bytes,
            matches,
            relevance: if max_score > 0.0 { score / max_score } else { 0.0 },
            preview,
            highlighted_preview,
        });
    }

    SearchResponse {
        total,
        hits,
        took_ms: started.elapsed().as_millis() as u64,
        timed_out,
    }
}

/// Concatenated searchable text of a conversation, re-read from source.
fn conversation_text(conversation: &Conversation) -> String {
    let parts: Vec<String> = parser::parse(&conversation.source_path)
        .map(|m| m.searchable_text())
        .collect();
    parts.join("\n")
}

/// Count matching lines and build the preview window around the earliest
/// match. Returns `(matches, preview, highlighted_preview)`.
fn preview_with_matches(text: &str, tokens: &[String]) -> (usize, String, String) {
    let Some(matcher) = token_matcher(tokens) else {
        return (0, String::new(), String::new());
    };

    let matches = text.lines().filter(|line| matcher.is_match(line)).count();

    let Some(first) = matcher.find(text) else {
        return (matches, String::new(), String::new());
    };

    // Word spans, then a window of words around the one holding the match.
    let words: Vec<(usize, usize)> = word_spans(text);
    let hit_word = words
        .iter()
        .position(|(start, end)| *start <= first.start() && first.start() < *end)
        .unwrap_or(0);
    let lo = hit_word.saturating_sub(PREVIEW_WORDS_EACH_SIDE);
    let hi = (hit_word + PREVIEW_WORDS_EACH_SIDE).min(words.len().saturating_sub(1));
    let (slice_start, slice_end) = (words[lo].0, words[hi].1);
    let preview = &text[slice_start..slice_end];

    let highlighted = matcher
        .replace_all(preview, format!("{HIGHLIGHT_OPEN}$0{HIGHLIGHT_CLOSE}"))
        .to_string();

    (matches, preview.to_string(), highlighted)
}

/// Case-insensitive alternation over the literal query tokens. `None` when
/// every token escaped to nothing (cannot happen for tokenizer output, but
/// the type-level guard keeps `preview_with_matches` total).
fn token_matcher(tokens: &[String]) -> Option<Regex> {
    if tokens.is_empty() {
        return None;
    }
    let alternation = tokens
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i){alternation}")).ok()
}

fn word_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                spans.push((s, i));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

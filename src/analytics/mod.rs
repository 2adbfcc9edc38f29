//! Analytics aggregators and the snapshot they produce.
//!
//! # Architecture overview
//!
//! Every aggregator consumes the same parsed message stream. Rather than
//! each one re-reading the corpus, a single fold per conversation produces
//! a [`ConversationSlice`] — the per-conversation partial state of every
//! aggregator at once. Section builders then merge slices into the final
//! [`AnalyticsSnapshot`]:
//!
//! ```text
//! messages ──fold──▶ ConversationSlice (one per conversation, cacheable)
//! slices ──merge──▶ TimePatterns / ToolUsage / ContentAnalysis / …
//! ```
//!
//! The split is what makes incremental analytics possible: the cache keeps
//! slices keyed by conversation fingerprint, so a refresh re-folds only
//! changed conversations and re-merges (merging is cheap, folding requires
//! parsing).
//!
//! Aggregators are pure functions of their inputs. A date-range scope
//! filters messages at fold time; scoped requests therefore bypass cached
//! slices, which are whole-conversation.
//!
//! # Failure isolation
//!
//! One aggregator failing must not take the others down: each section
//! merge runs behind a panic guard, and a failed section lands in the
//! snapshot as `null`.

pub mod actions;
pub mod cache;
pub mod comparative;
pub mod content;
pub mod productivity;
pub mod temporal;
pub mod tools;

use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;

use chrono::{DateTime, Datelike, Local, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{ContentBlock, Message, Role};
use crate::query::DateRange;

/// A name with a count; the element type of every ranked "top N" list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCount {
    pub name: String,
    pub count: u64,
}

/// Top `n` entries of a counter map, by count descending then name.
pub fn top_n(map: &BTreeMap<String, u64>, n: usize) -> Vec<NamedCount> {
    let mut entries: Vec<NamedCount> = map
        .iter()
        .map(|(name, count)| NamedCount {
            name: name.clone(),
            count: *count,
        })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    entries.truncate(n);
    entries
}

/// Per-conversation partial aggregate: everything any section builder
/// needs, computed in one pass over the message stream.
///
/// Slices are persisted in the analytics cache keyed by conversation id
/// and fingerprint, so every field must stay serializable and mergeable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationSlice {
    pub project: String,
    pub message_count: u64,
    pub first_ts: Option<DateTime<Utc>>,
    pub last_ts: Option<DateTime<Utc>>,
    pub duration_ms: u64,

    // Temporal, bucketed on local time. Weekday index 0 = Sunday.
    pub hour_counts: [u64; 24],
    pub weekday_counts: [u64; 7],
    pub day_hour: [[u64; 24]; 7],
    pub date_counts: BTreeMap<NaiveDate, u64>,

    // Tool usage.
    pub tool_total: u64,
    pub tool_counts: BTreeMap<String, u64>,
    pub pair_counts: BTreeMap<String, u64>,
    pub triple_counts: BTreeMap<String, u64>,

    // Content.
    pub code_blocks: u64,
    pub languages: BTreeMap<String, u64>,
    pub frameworks: BTreeMap<String, u64>,
    pub user_chars: u64,
    pub user_messages: u64,
    pub assistant_chars: u64,
    pub assistant_messages: u64,
    pub code_chars: u64,
    pub total_chars: u64,
    pub file_mentions: BTreeMap<String, u64>,

    // User actions.
    pub commands: BTreeMap<String, u64>,
    pub hooks: BTreeMap<String, u64>,
}

impl ConversationSlice {
    /// Fold one conversation's messages. With a scope, messages outside the
    /// range (or carrying no timestamp) are excluded entirely.
    pub fn build(project: &str, messages: &[Message], scope: Option<&DateRange>) -> Self {
        let mut slice = ConversationSlice {
            project: project.to_string(),
            ..Default::default()
        };
        let mut tool_sequence: Vec<String> = Vec::new();

        for message in messages {
            if let Some(range) = scope {
                match message.timestamp {
                    Some(ts) if range.contains(ts) => {}
                    _ => continue,
                }
            }

            slice.message_count += 1;

            if let Some(ts) = message.timestamp {
                slice.first_ts = Some(slice.first_ts.map_or(ts, |f| f.min(ts)));
                slice.last_ts = Some(slice.last_ts.map_or(ts, |l| l.max(ts)));

                let local = ts.with_timezone(&Local);
                let hour = local.hour() as usize;
                let weekday = local.weekday().num_days_from_sunday() as usize;
                slice.hour_counts[hour] += 1;
                slice.weekday_counts[weekday] += 1;
                slice.day_hour[weekday][hour] += 1;
                *slice.date_counts.entry(local.date_naive()).or_insert(0) += 1;
            }

            let text = message.searchable_text();
            let chars = text.chars().count() as u64;
            slice.total_chars += chars;
            match message.role {
                Role::User => {
                    slice.user_messages += 1;
                    slice.user_chars += chars;
                }
                Role::Assistant => {
                    slice.assistant_messages += 1;
                    slice.assistant_chars += chars;
                }
                Role::System => {}
            }

            content::count_frameworks(&text, &mut slice.frameworks);

            let mut message_paths: BTreeSet<String> = BTreeSet::new();
            for block in &message.content {
                match block {
                    ContentBlock::Text { text } => {
                        for path in crate::parser::extract::path_like(text) {
                            message_paths.insert(path);
                        }
                    }
                    ContentBlock::CodeBlock { language, body } => {
                        slice.code_blocks += 1;
                        *slice.languages.entry(language.clone()).or_insert(0) += 1;
                        slice.code_chars += body.chars().count() as u64;
                    }
                    ContentBlock::ToolUse { name, .. } => {
                        slice.tool_total += 1;
                        *slice.tool_counts.entry(name.clone()).or_insert(0) += 1;
                        tool_sequence.push(name.clone());
                    }
                    ContentBlock::CommandMarker { name } => {
                        if !actions::is_builtin_command(name) {
                            *slice.commands.entry(name.clone()).or_insert(0) += 1;
                        }
                    }
                    ContentBlock::HookMarker { name, .. } => {
                        *slice.hooks.entry(name.clone()).or_insert(0) += 1;
                    }
                    ContentBlock::ToolResult { .. } => {}
                }
            }
            // One conversation mentioning a file five times in one message
            // still counts once for that message.
            for path in message_paths {
                *slice.file_mentions.entry(path).or_insert(0) += 1;
            }
        }

        for pair in tool_sequence.windows(2) {
            *slice
                .pair_counts
                .entry(tools::pair_key(&pair[0], &pair[1]))
                .or_insert(0) += 1;
        }
        for triple in tool_sequence.windows(3) {
            *slice
                .triple_counts
                .entry(tools::triple_key(&triple[0], &triple[1], &triple[2]))
                .or_insert(0) += 1;
        }

        slice.duration_ms = match (slice.first_ts, slice.last_ts) {
            (Some(first), Some(last)) if last > first => {
                (last - first).num_milliseconds() as u64
            }
            _ => 0,
        };

        slice
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_conversations: u64,
    pub total_messages: u64,
    pub total_tool_invocations: u64,
    pub active_projects: u64,
    pub first_activity: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationStats {
    pub avg_messages_per_conversation: f64,
    pub avg_duration_ms: f64,
    pub max_messages: u64,
    pub total_messages: u64,
}

/// The analytics result set: one section per aggregator family. A section
/// is `None` only when its aggregator failed (rendered as `null` in the
/// cache file); an empty corpus produces zeroed sections instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    pub version: u32,
    pub last_updated: DateTime<Utc>,
    pub overview: Option<Overview>,
    pub conversation_stats: Option<ConversationStats>,
    pub time_patterns: Option<temporal::TimePatterns>,
    pub tool_usage: Option<tools::ToolUsage>,
    pub content_analysis: Option<content::ContentAnalysis>,
    pub productivity_metrics: Option<productivity::ProductivityMetrics>,
    pub user_actions: Option<actions::UserActions>,
    pub comparative: Option<comparative::Comparative>,
}

impl AnalyticsSnapshot {
    pub fn empty(version: u32) -> Self {
        build_snapshot(&[], Local::now().date_naive(), version)
    }
}

/// Merge slices into a full snapshot with trend windows ending at `end`.
pub fn build_snapshot(
    slices: &[&ConversationSlice],
    end: NaiveDate,
    version: u32,
) -> AnalyticsSnapshot {
    let overview = guarded("overview", || build_overview(slices));
    let conversation_stats = guarded("conversationStats", || build_conversation_stats(slices));
    let time_patterns = guarded("timePatterns", || {
        temporal::TimePatterns::build(slices.iter().copied(), end)
    });
    let tool_usage = guarded("toolUsage", || tools::ToolUsage::build(slices.iter().copied()));
    let content_analysis = guarded("contentAnalysis", || {
        content::ContentAnalysis::build(slices.iter().copied())
    });
    let productivity_metrics = guarded("productivityMetrics", || {
        productivity::ProductivityMetrics::build(slices.iter().copied())
    });
    let user_actions = guarded("userActions", || {
        actions::UserActions::build(slices.iter().copied())
    });
    let comparative = time_patterns
        .as_ref()
        .and_then(|tp| guarded("comparative", || comparative::Comparative::build(tp)));

    AnalyticsSnapshot {
        version,
        last_updated: Utc::now(),
        overview,
        conversation_stats,
        time_patterns,
        tool_usage,
        content_analysis,
        productivity_metrics,
        user_actions,
        comparative,
    }
}

/// Run one section builder behind a panic guard; a failed section becomes
/// `None` and the rest of the snapshot survives.
fn guarded<T>(section: &str, build: impl FnOnce() -> T) -> Option<T> {
    match std::panic::catch_unwind(AssertUnwindSafe(build)) {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(section, "aggregator failed; section reported as null");
            None
        }
    }
}

fn build_overview(slices: &[&ConversationSlice]) -> Overview {
    let mut overview = Overview {
        total_conversations: slices.len() as u64,
        ..Default::default()
    };
    let mut projects: BTreeSet<&str> = BTreeSet::new();
    for slice in slices {
        overview.total_messages += slice.message_count;
        overview.total_tool_invocations += slice.tool_total;
        if !slice.project.is_empty() {
            projects.insert(&slice.project);
        }
        overview.first_activity = match (overview.first_activity, slice.first_ts) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        overview.last_activity = match (overview.last_activity, slice.last_ts) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
    overview.active_projects = projects.len() as u64;
    overview
}

fn build_conversation_stats(slices: &[&ConversationSlice]) -> ConversationStats {
    let count = slices.len() as u64;
    let total_messages: u64 = slices.iter().map(|s| s.message_count).sum();
    let total_duration: u64 = slices.iter().map(|s| s.duration_ms).sum();
    let max_messages = slices.iter().map(|s| s.message_count).max().unwrap_or(0);
    ConversationStats {
        avg_messages_per_conversation: if count == 0 {
            0.0
        } else {
            total_messages as f64 / count as f64
        },
        avg_duration_ms: if count == 0 {
            0.0
        } else {
            total_duration as f64 / count as f64
        },
        max_messages,
        total_messages,
    }
}

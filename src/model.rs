//! Core data model for the recollect pipeline.
//!
//! # Architecture overview
//!
//! Recollect indexes and searches a corpus of AI-assistant conversation
//! transcripts. Transcript files come in heterogeneous shapes (wrapped JSONL
//! records, flat tool-use records, rendered markdown archives); the parser
//! normalizes all of them into the types defined here before anything else
//! sees them.
//!
//! ```text
//! Corpus (JSONL/markdown) → Parser → Message stream → { Index, Aggregators }
//!                                                          ↓
//!                                               Query Engine / Analytics Cache
//! ```
//!
//! # Design philosophy
//!
//! The index store and every aggregator consume the same `Message` stream, so
//! extraction quirks (ANSI escapes, embedded command tags, hook path markers)
//! are resolved exactly once, in the parser. Downstream code matches on
//! `ContentBlock` exhaustively and never touches raw JSON.
//!
//! # TRADE-OFFS
//!
//! - `ContentBlock` is a tagged enum rather than a map of arbitrary fields.
//!   Adding a new block type means touching this file and every exhaustive
//!   match on it, in exchange for compile-checked handling everywhere.
//! - `Conversation` carries filesystem metadata (`size_bytes`, `mtime`)
//!   alongside parsed metadata (`first_ts`, `message_count`). The catalog can
//!   cheaply detect change candidates from the former without parsing; the
//!   latter is filled in at ingest time.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker role within a conversation turn.
///
/// A typed enum rather than a raw string so that aggregators can match
/// exhaustively and misspelled role names fail at parse time, not silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// Lifecycle phase of a hook marker, when one was recorded next to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookPhase {
    Pre,
    Post,
}

/// A typed unit of content within a message.
///
/// Blocks preserve source order. Text that yields fenced code blocks is kept
/// in residual form: the parser splits `Text` around each fence and
/// interleaves the resulting `Text` and `CodeBlock` segments, so the original
/// reading order survives normalization.
///
/// TRADE-OFF: `ToolUse` stores the raw `serde_json::Value` input because tool
/// inputs differ per tool name and typing each one at the model level would
/// couple this crate to every tool's schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text from the user or assistant (residual text once fences are
    /// extracted).
    Text { text: String },
    /// Tool invocation from the assistant.
    ToolUse {
        name: String,
        input: serde_json::Value,
    },
    /// Outcome of a tool call.
    ToolResult { output: String },
    /// Fenced code block extracted from text. `language` is lower-cased; an
    /// unlabeled fence becomes `"unknown"`.
    CodeBlock { language: String, body: String },
    /// User-issued slash command captured from a `<command-name>` tag.
    /// `name` includes the leading slash.
    CommandMarker { name: String },
    /// Hook script reference embedded in system output, with the lifecycle
    /// phase when a `PreToolUse:`/`PostToolUse:` marker preceded it.
    HookMarker {
        name: String,
        phase: Option<HookPhase>,
    },
}

impl ContentBlock {
    /// Text this block contributes to search and previews.
    ///
    /// Previews are literal substrings of the concatenation of these values
    /// in block order, so this function is the single definition of "the
    /// text of a conversation" shared by the indexer and the query engine.
    pub fn searchable_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            ContentBlock::CodeBlock { body, .. } => Some(body),
            ContentBlock::ToolResult { output } => Some(output),
            ContentBlock::ToolUse { .. }
            | ContentBlock::CommandMarker { .. }
            | ContentBlock::HookMarker { .. } => None,
        }
    }
}

/// A single conversation turn, which may contain multiple content blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Timestamp of the message; `None` when the record does not carry one.
    pub timestamp: Option<DateTime<Utc>>,
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Concatenated searchable text of every block, newline-joined in block
    /// order.
    pub fn searchable_text(&self) -> String {
        let parts: Vec<&str> = self
            .content
            .iter()
            .filter_map(|b| b.searchable_text())
            .collect();
        parts.join("\n")
    }

    /// Names of tool invocations in this message, in block order.
    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.content.iter().filter_map(|b| match b {
            ContentBlock::ToolUse { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }
}

/// Which indexed field a posting belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Content,
    Project,
    Filename,
}

/// One inverted-index entry: a term's occurrences in one conversation.
///
/// Positions are token ordinals within the field, retained so the query
/// engine can locate the earliest match without a full rescan. The posting
/// deliberately does not store surrounding text; previews are reconstructed
/// from the source file on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub conversation_id: String,
    pub field: Field,
    pub positions: Vec<u32>,
}

/// One transcript file as the catalog sees it.
///
/// The catalog owns these records: created on first enumeration, updated
/// when `mtime` or `size_bytes` change, removed when the source file
/// disappears. Parse-derived fields (`first_ts`, `last_ts`,
/// `message_count`, `duration_ms`, `content_fingerprint`) are `None`/zero
/// until the conversation has been ingested at least once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Stable identifier: the filename UUID when the source provides one,
    /// otherwise a hash of the absolute path.
    pub id: String,
    pub source_path: PathBuf,
    /// Immediate parent directory name under the corpus root; the
    /// "repository" filter key.
    pub project: String,
    pub size_bytes: u64,
    pub mtime: DateTime<Utc>,
    pub first_ts: Option<DateTime<Utc>>,
    pub last_ts: Option<DateTime<Utc>>,
    pub message_count: u64,
    pub duration_ms: u64,
    /// Stable hash over message contents; `None` before first ingest.
    pub content_fingerprint: Option<String>,
}

impl Conversation {
    /// The instant used for recency ranking and date filtering: the last
    /// message timestamp when known, else the file mtime.
    pub fn effective_ts(&self) -> DateTime<Utc> {
        self.last_ts.unwrap_or(self.mtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serde_roundtrip() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
        let parsed: Role = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Role::Assistant);
    }

    #[test]
    fn test_content_block_tagged_serde() {
        let block = ContentBlock::CodeBlock {
            language: "rust".to_string(),
            body: "fn main() {}".to_string(),
        };
        let json = serde_json::to_string(&block).unwrap();
        assert!(json.contains("\"type\":\"code_block\""));
        let parsed: ContentBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, block);
    }

    #[test]
    fn test_searchable_text_skips_markers() {
        let msg = Message {
            role: Role::User,
            timestamp: None,
            content: vec![
                ContentBlock::Text {
                    text: "hello".to_string(),
                },
                ContentBlock::CommandMarker {
                    name: "/remember".to_string(),
                },
                ContentBlock::CodeBlock {
                    language: "ts".to_string(),
                    body: "console.log(1)".to_string(),
                },
            ],
        };
        assert_eq!(msg.searchable_text(), "hello\nconsole.log(1)");
    }

    #[test]
    fn test_tool_names_in_order() {
        let msg = Message {
            role: Role::Assistant,
            timestamp: None,
            content: vec![
                ContentBlock::ToolUse {
                    name: "Read".to_string(),
                    input: serde_json::json!({}),
                },
                ContentBlock::Text {
                    text: "ok".to_string(),
                },
                ContentBlock::ToolUse {
                    name: "Edit".to_string(),
                    input: serde_json::json!({}),
                },
            ],
        };
        let names: Vec<&str> = msg.tool_names().collect();
        assert_eq!(names, vec!["Read", "Edit"]);
    }

    #[test]
    fn test_effective_ts_prefers_last_message() {
        let mtime = Utc::now();
        let last = mtime - chrono::Duration::hours(2);
        let conv = Conversation {
            id: "c1".to_string(),
            source_path: PathBuf::from("/corpus/proj/c1.jsonl"),
            project: "proj".to_string(),
            size_bytes: 10,
            mtime,
            first_ts: None,
            last_ts: Some(last),
            message_count: 0,
            duration_ms: 0,
            content_fingerprint: None,
        };
        assert_eq!(conv.effective_ts(), last);
    }
}

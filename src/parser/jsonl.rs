//! JSONL transcript parsing: one JSON record per line, heterogeneous shapes.
//!
//! # Record shapes
//!
//! The corpus mixes several generations of transcript records:
//!
//! - Wrapped records `{ "message": { role, content, timestamp }, … }` where
//!   `content` is either a plain string or an ordered array of typed blocks
//!   (`text`, `tool_use`, `tool_result`).
//! - Flat records `{ "type": "tool_use", "name": …, "input": … }` with no
//!   `message` envelope, treated as a synthetic assistant message holding a
//!   single tool invocation.
//!
//! Anything else on a line — including malformed JSON — is skipped without
//! aborting the file. The skip count is logged once per file.
//!
//! # TRADE-OFFS
//!
//! Records are navigated as `serde_json::Value` rather than deserialized
//! into one struct per shape. The shapes overlap and omit fields freely
//! enough that a typed union would be mostly `Option`s; `Value` navigation
//! keeps each shape's handling local to one function.

use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use crate::model::{ContentBlock, Message, Role};
use crate::parser::normalize_text;

/// Lazy message iterator over one JSONL transcript file.
///
/// Holds one buffered line at a time; a yielded `Message` is complete and
/// owns its content. An unreadable file produces an empty stream (the
/// constructor logs the warning).
pub struct JsonlMessages {
    lines: Option<Lines<BufReader<std::fs::File>>>,
    skipped: u64,
    path: std::path::PathBuf,
}

impl JsonlMessages {
    pub fn open(path: &Path) -> Self {
        let lines = match std::fs::File::open(path) {
            Ok(file) => Some(BufReader::new(file).lines()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable transcript, yielding empty stream");
                None
            }
        };
        Self {
            lines,
            skipped: 0,
            path: path.to_path_buf(),
        }
    }

    /// Parse from in-memory lines; used by tests and stdin-style callers.
    pub fn from_lines<I: IntoIterator<Item = String>>(lines: I) -> Vec<Message> {
        lines
            .into_iter()
            .filter_map(|l| message_from_line(&l))
            .collect()
    }
}

impl Iterator for JsonlMessages {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        let lines = self.lines.as_mut()?;
        loop {
            match lines.next() {
                Some(Ok(line)) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match message_from_line(trimmed) {
                        Some(msg) => return Some(msg),
                        None => {
                            self.skipped += 1;
                            continue;
                        }
                    }
                }
                Some(Err(_)) | None => {
                    if self.skipped > 0 {
                        warn!(
                            path = %self.path.display(),
                            skipped = self.skipped,
                            "skipped unparseable transcript lines"
                        );
                        self.skipped = 0;
                    }
                    self.lines = None;
                    return None;
                }
            }
        }
    }
}

/// Normalize one JSONL record into a `Message`, or `None` when the line is
/// malformed, empty of content, or an unknown record shape.
pub fn message_from_line(line: &str) -> Option<Message> {
    let record: Value = serde_json::from_str(line).ok()?;
    let record = record.as_object()?;

    // Flat tool-use record: no message envelope, top-level type tag.
    if record.get("message").is_none()
        && record.get("type").and_then(|t| t.as_str()) == Some("tool_use")
    {
        let name = record.get("name")?.as_str()?.to_string();
        let input = record
            .get("input")
            .cloned()
            .unwrap_or(Value::Object(Default::default()));
        return Some(Message {
            role: Role::Assistant,
            timestamp: record_timestamp(record),
            content: vec![ContentBlock::ToolUse { name, input }],
        });
    }

    let message = record.get("message")?.as_object()?;
    let role = parse_role(
        message
            .get("role")
            .and_then(|r| r.as_str())
            .or_else(|| record.get("type").and_then(|t| t.as_str()))?,
    )?;

    let timestamp = record_timestamp(record)
        .or_else(|| message.get("timestamp").and_then(timestamp_from_value));

    let content = message.get("content")?;
    let mut blocks = Vec::new();

    if let Some(text) = content.as_str() {
        blocks.extend(normalize_text(text));
    } else if let Some(arr) = content.as_array() {
        for block in arr {
            let block_type = block.get("type").and_then(|t| t.as_str()).unwrap_or("");
            match block_type {
                "text" => {
                    let text = block.get("text").and_then(|t| t.as_str()).unwrap_or("");
                    blocks.extend(normalize_text(text));
                }
                "tool_use" => {
                    let name = block
                        .get("name")
                        .and_then(|n| n.as_str())
                        .unwrap_or("")
                        .to_string();
                    if name.is_empty() {
                        continue;
                    }
                    let input = block
                        .get("input")
                        .cloned()
                        .unwrap_or(Value::Object(Default::default()));
                    blocks.push(ContentBlock::ToolUse { name, input });
                }
                "tool_result" => {
                    blocks.push(ContentBlock::ToolResult {
                        output: tool_result_text(block),
                    });
                }
                _ => {}
            }
        }
    }

    if blocks.is_empty() {
        return None;
    }

    Some(Message {
        role,
        timestamp,
        content: blocks,
    })
}

fn parse_role(s: &str) -> Option<Role> {
    match s {
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        "system" => Some(Role::System),
        _ => None,
    }
}

fn record_timestamp(record: &serde_json::Map<String, Value>) -> Option<DateTime<Utc>> {
    record.get("timestamp").and_then(timestamp_from_value)
}

/// Timestamps appear as RFC 3339 strings or as epoch millis.
fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    if let Some(s) = value.as_str() {
        return s.parse::<DateTime<Utc>>().ok();
    }
    if let Some(ms) = value.as_i64() {
        return DateTime::from_timestamp_millis(ms);
    }
    None
}

/// Extract readable text from a `tool_result` block.
///
/// `content` is a string in older records and an array of `{type: "text"}`
/// blocks in newer ones. Anything unrecognized yields an empty output rather
/// than raw JSON, so tool payloads never leak into searchable text.
fn tool_result_text(block: &Value) -> String {
    let Some(content) = block.get("content") else {
        return String::new();
    };
    if let Some(s) = content.as_str() {
        return s.to_string();
    }
    if let Some(arr) = content.as_array() {
        let texts: Vec<&str> = arr
            .iter()
            .filter_map(|item| {
                if item.get("type").and_then(|t| t.as_str()) == Some("text") {
                    item.get("text").and_then(|t| t.as_str())
                } else {
                    None
                }
            })
            .collect();
        return texts.join("\n");
    }
    String::new()
}

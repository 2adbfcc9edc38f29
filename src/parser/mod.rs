//! Transcript parsing: format detection, normalization, and the public
//! parse entry points.
//!
//! # Architecture overview
//!
//! This module sits at the boundary between raw transcript files and the
//! normalized message model. Two concrete formats live below it:
//!
//! - [`jsonl`] — line-delimited JSON chunk streams (the primary corpus
//!   format, several record generations).
//! - [`markdown`] — rendered archives delimited by role headings, accepted
//!   by the aggregators.
//!
//! [`extract`] holds every regex that pulls structured data out of raw
//! text; both parsers normalize through [`normalize_text`] so the indexer
//! and aggregators never see a format difference.
//!
//! # Detection strategy
//!
//! 1. **Extension** — `.jsonl` is always JSONL; `.md`/`.markdown`/`.txt`
//!    are always archives. No I/O cost.
//! 2. **Content peek** — anything else is sniffed by its first non-empty
//!    line: a leading `{` means JSONL, otherwise archive.
//!
//! # Error contract
//!
//! Parsing never fails: unreadable files yield an empty stream with a
//! logged warning, malformed lines are skipped and counted. Callers that
//! need to distinguish "empty conversation" from "unreadable file" check
//! the filesystem themselves.

pub mod extract;
pub mod jsonl;
pub mod markdown;

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::model::{ContentBlock, Message};

/// Lazy message stream over one transcript file, format-detected.
///
/// JSONL files stream line by line (one message resident at a time);
/// archives are small rendered exports and buffer eagerly behind the same
/// iterator surface.
pub enum MessageStream {
    Jsonl(jsonl::JsonlMessages),
    Buffered(std::vec::IntoIter<Message>),
}

impl Iterator for MessageStream {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        match self {
            MessageStream::Jsonl(inner) => inner.next(),
            MessageStream::Buffered(inner) => inner.next(),
        }
    }
}

/// Parse a transcript file into a lazy stream of normalized messages.
pub fn parse(path: &Path) -> MessageStream {
    if is_archive(path) {
        MessageStream::Buffered(markdown::parse_archive(path).into_iter())
    } else {
        MessageStream::Jsonl(jsonl::JsonlMessages::open(path))
    }
}

/// A fully parsed transcript plus the ordered tool-invocation names across
/// the whole file.
pub struct ParsedTranscript {
    pub messages: Vec<Message>,
    pub tool_invocations: Vec<String>,
}

/// Parse a transcript and collect the ordered sequence of tool-use names.
pub fn parse_with_tools(path: &Path) -> ParsedTranscript {
    let messages: Vec<Message> = parse(path).collect();
    let tool_invocations = messages
        .iter()
        .flat_map(|m| m.tool_names().map(str::to_string).collect::<Vec<_>>())
        .collect();
    ParsedTranscript {
        messages,
        tool_invocations,
    }
}

fn is_archive(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some("md") | Some("markdown") | Some("txt") => true,
        Some("jsonl") | Some("json") => false,
        _ => !first_line_is_json(path),
    }
}

fn first_line_is_json(path: &Path) -> bool {
    use std::io::BufRead;
    let Ok(file) = std::fs::File::open(path) else {
        // Unreadable either way; the JSONL path logs the warning.
        return true;
    };
    let reader = std::io::BufReader::new(file);
    for line in reader.lines() {
        let Ok(line) = line else { return true };
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            return trimmed.starts_with('{');
        }
    }
    true
}

/// Normalize one raw text body into ordered content blocks.
///
/// Pipeline: strip ANSI escapes, split around fenced code blocks
/// (interleaving residual text with `CodeBlock`s), then append the marker
/// blocks extracted from the stripped text — slash commands, hook markers,
/// and `<invoke name="…">` tool references. Marker blocks follow the text
/// that produced them, so block order still tracks source order.
pub fn normalize_text(raw: &str) -> Vec<ContentBlock> {
    let clean = extract::strip_ansi(raw);
    let mut blocks = Vec::new();

    for segment in extract::split_fences(&clean) {
        match segment {
            extract::TextSegment::Text(text) => blocks.push(ContentBlock::Text { text }),
            extract::TextSegment::Code { language, body } => {
                blocks.push(ContentBlock::CodeBlock { language, body })
            }
        }
    }

    for name in extract::command_markers(&clean) {
        blocks.push(ContentBlock::CommandMarker { name });
    }
    for (name, phase) in extract::hook_markers(&clean) {
        blocks.push(ContentBlock::HookMarker { name, phase });
    }
    for name in extract::invoke_names(&clean) {
        blocks.push(ContentBlock::ToolUse {
            name,
            input: serde_json::Value::Object(Default::default()),
        });
    }

    blocks
}

/// Stable hash over message contents, independent of filesystem metadata.
///
/// Two parses of the same file always produce the same fingerprint, and any
/// content change produces a different one. Serialized message JSON is the
/// hash input because serde field order is stable for our own types.
pub fn content_fingerprint(messages: &[Message]) -> String {
    let mut hasher = Sha256::new();
    for message in messages {
        hasher.update(serde_json::to_vec(message).unwrap_or_default());
        hasher.update([0u8]);
    }
    hex_string(&hasher.finalize())
}

pub(crate) fn hex_string(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

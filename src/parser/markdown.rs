//! Rendered-archive parsing: markdown/plaintext transcripts delimited by
//! role headings.
//!
//! Some corpora hold conversations that were already exported to markdown,
//! with turns introduced by headings like `## User` or `### Assistant:`.
//! Aggregators accept these archives on equal footing with JSONL sources,
//! so this parser produces the same normalized `Message` stream. Rendered
//! archives carry no per-message timestamps; `timestamp` is always `None`
//! and temporal aggregation falls back to file metadata upstream.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use crate::model::{Message, Role};
use crate::parser::normalize_text;

/// Role heading: one to four `#`, a role word, optional trailing colon.
/// `Human` and `Claude` appear in archives rendered by other exporters and
/// map onto the canonical user/assistant roles.
static HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^#{1,4}\s*(user|human|assistant|claude|system)\s*:?\s*$").unwrap()
});

/// Parse a heading-delimited archive into messages, in section order.
///
/// Text before the first role heading (titles, export banners) is dropped.
/// An unreadable file yields an empty vec with a logged warning, matching
/// the JSONL parser's contract.
pub fn parse_archive(path: &Path) -> Vec<Message> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable archive, yielding empty stream");
            return Vec::new();
        }
    };
    parse_str(&content)
}

pub fn parse_str(content: &str) -> Vec<Message> {
    let mut messages = Vec::new();
    let mut current_role: Option<Role> = None;
    let mut body = String::new();

    for line in content.lines() {
        if let Some(caps) = HEADING.captures(line) {
            flush(&mut messages, current_role, &mut body);
            current_role = Some(match caps[1].to_lowercase().as_str() {
                "user" | "human" => Role::User,
                "system" => Role::System,
                _ => Role::Assistant,
            });
        } else if current_role.is_some() {
            body.push_str(line);
            body.push('\n');
        }
    }
    flush(&mut messages, current_role, &mut body);

    messages
}

fn flush(messages: &mut Vec<Message>, role: Option<Role>, body: &mut String) {
    let Some(role) = role else {
        body.clear();
        return;
    };
    let text = body.trim();
    if !text.is_empty() {
        let content = normalize_text(text);
        if !content.is_empty() {
            messages.push(Message {
                role,
                timestamp: None,
                content,
            });
        }
    }
    body.clear();
}

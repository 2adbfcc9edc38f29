//! Centralized regex extraction from raw transcript text.
//!
//! # Architecture overview
//!
//! Transcript text smuggles structured data inside strings: fenced code
//! blocks, `<command-name>` tags around user slash commands, hook script
//! paths printed by the session runtime, `<invoke name="…">` tool markers,
//! and ANSI escape sequences wrapping any of the above. Every extraction
//! lives here so the indexer and the aggregators see one set of rules; no
//! other module compiles its own patterns against transcript text.
//!
//! All matching against runtime-produced text operates on the ANSI-stripped
//! form. Stripping is the caller-visible first step (`strip_ansi`) rather
//! than an internal detail of each function because hook markers arrive
//! mid-escape-sequence often enough that matching raw text silently loses
//! them.
//!
//! # TRADE-OFFS
//!
//! Patterns are compiled once into `LazyLock` statics. A failed compile
//! would panic at first use, which is acceptable because every pattern is a
//! literal in this file and covered by tests.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::HookPhase;

static ANSI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap());

/// Fenced code block: ```lang\n…\n``` . The language tag is optional; the
/// body capture is non-greedy so adjacent fences do not merge.
static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```([A-Za-z0-9_+#.-]*)[ \t]*\r?\n(.*?)```").unwrap());

/// User-issued slash command captured by the structured tag the assistant
/// CLI wraps around it.
static COMMAND_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<command-name>\s*/?([A-Za-z0-9_:-]+)\s*</command-name>").unwrap());

/// Hook script path marker, with an optional `PreToolUse:`/`PostToolUse:`
/// prefix immediately before it. The path tolerates a leading `~`, `.` or
/// neither, and any prefix directories before `.claude/hooks/`.
static HOOK_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:(Pre|Post)ToolUse:([A-Za-z0-9_]+)[^\[\n]{0,80})?\[[^\[\]\n]*\.claude/hooks/([A-Za-z0-9_.-]+)\.sh\]",
    )
    .unwrap()
});

/// Tool name embedded in assistant text as `<invoke name="…">`.
static INVOKE_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<invoke name="([^"]+)">"#).unwrap());

/// Path-like token: at least one directory component followed by a file name
/// with a short extension. Matches both absolute and relative paths.
static PATH_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:~/|\./|/)?(?:[A-Za-z0-9_][A-Za-z0-9_.-]*/)+[A-Za-z0-9_][A-Za-z0-9_.-]*\.[A-Za-z0-9]{1,8}\b")
        .unwrap()
});

/// Remove ANSI escape sequences. Borrows when the text contains none, which
/// is the overwhelmingly common case for user text.
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    if text.contains('\x1b') {
        ANSI.replace_all(text, "")
    } else {
        Cow::Borrowed(text)
    }
}

/// One piece of a text body split around fenced code blocks, in source order.
#[derive(Debug, Clone, PartialEq)]
pub enum TextSegment {
    /// Residual text between (or outside) fences.
    Text(String),
    /// The interior of one fence. `language` is lower-cased; an unlabeled
    /// fence yields `"unknown"`.
    Code { language: String, body: String },
}

/// Split `text` into residual-text and code segments, preserving order.
///
/// Empty residual segments are dropped; an unterminated trailing fence is
/// treated as plain text rather than a code block.
pub fn split_fences(text: &str) -> Vec<TextSegment> {
    let mut segments = Vec::new();
    let mut cursor = 0;

    for caps in FENCE.captures_iter(text) {
        let whole = caps.get(0).unwrap();
        let before = &text[cursor..whole.start()];
        if !before.trim().is_empty() {
            segments.push(TextSegment::Text(before.to_string()));
        }

        let lang = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let language = if lang.is_empty() {
            "unknown".to_string()
        } else {
            lang.to_lowercase()
        };
        let body = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        segments.push(TextSegment::Code {
            language,
            body: body.trim_end_matches('\n').to_string(),
        });

        cursor = whole.end();
    }

    let rest = &text[cursor..];
    if !rest.trim().is_empty() {
        segments.push(TextSegment::Text(rest.to_string()));
    }

    segments
}

/// Slash commands captured by `<command-name>` tags, normalized to carry a
/// leading slash. Order follows source order; duplicates are kept.
pub fn command_markers(text: &str) -> Vec<String> {
    COMMAND_TAG
        .captures_iter(text)
        .map(|caps| format!("/{}", &caps[1]))
        .collect()
}

/// Hook markers in `text`, with the lifecycle phase when a
/// `PreToolUse:`/`PostToolUse:` sequence immediately preceded the path.
///
/// The input must already be ANSI-stripped; callers go through
/// [`strip_ansi`] first.
pub fn hook_markers(text: &str) -> Vec<(String, Option<HookPhase>)> {
    HOOK_MARKER
        .captures_iter(text)
        .map(|caps| {
            let phase = caps.get(1).map(|m| match m.as_str() {
                "Pre" => HookPhase::Pre,
                _ => HookPhase::Post,
            });
            (caps[3].to_string(), phase)
        })
        .collect()
}

/// Tool names referenced by `<invoke name="…">` tags in raw text.
pub fn invoke_names(text: &str) -> Vec<String> {
    INVOKE_TAG
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Path-like tokens in `text`, in source order with duplicates kept.
/// Callers dedup per message as required.
pub fn path_like(text: &str) -> Vec<String> {
    PATH_LIKE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi_plain_borrows() {
        let out = strip_ansi("plain text");
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(out, "plain text");
    }

    #[test]
    fn test_strip_ansi_removes_color_codes() {
        let out = strip_ansi("\x1b[32mgreen\x1b[0m and \x1b[1;31mbold red\x1b[0m");
        assert_eq!(out, "green and bold red");
    }

    #[test]
    fn test_split_fences_basic() {
        let text = "Before\n```rust\nfn main() {}\n```\nAfter";
        let segs = split_fences(text);
        assert_eq!(segs.len(), 3);
        assert_eq!(
            segs[1],
            TextSegment::Code {
                language: "rust".to_string(),
                body: "fn main() {}".to_string(),
            }
        );
        assert!(matches!(&segs[0], TextSegment::Text(t) if t.contains("Before")));
        assert!(matches!(&segs[2], TextSegment::Text(t) if t.contains("After")));
    }

    #[test]
    fn test_split_fences_unlabeled_is_unknown() {
        let segs = split_fences("```\nls -la\n```");
        assert_eq!(
            segs,
            vec![TextSegment::Code {
                language: "unknown".to_string(),
                body: "ls -la".to_string(),
            }]
        );
    }

    #[test]
    fn test_split_fences_lowercases_language() {
        let segs = split_fences("```TypeScript\nlet x = 1\n```");
        assert!(matches!(
            &segs[0],
            TextSegment::Code { language, .. } if language == "typescript"
        ));
    }

    #[test]
    fn test_split_fences_adjacent_blocks_do_not_merge() {
        let text = "```ts\na\n```\n```py\nb\n```";
        let segs = split_fences(text);
        let codes: Vec<_> = segs
            .iter()
            .filter(|s| matches!(s, TextSegment::Code { .. }))
            .collect();
        assert_eq!(codes.len(), 2);
    }

    #[test]
    fn test_split_fences_unterminated_is_text() {
        let segs = split_fences("```rust\nno closing fence");
        assert_eq!(segs.len(), 1);
        assert!(matches!(&segs[0], TextSegment::Text(_)));
    }

    #[test]
    fn test_command_markers() {
        let text = "ran <command-name>/remember</command-name> then <command-name>/deploy</command-name>";
        assert_eq!(command_markers(text), vec!["/remember", "/deploy"]);
    }

    #[test]
    fn test_command_markers_normalizes_missing_slash() {
        assert_eq!(
            command_markers("<command-name>remember</command-name>"),
            vec!["/remember"]
        );
    }

    #[test]
    fn test_hook_markers_plain_path() {
        let hooks = hook_markers("running [~/.claude/hooks/format.sh] now");
        assert_eq!(hooks, vec![("format".to_string(), None)]);
    }

    #[test]
    fn test_hook_markers_without_tilde() {
        let hooks = hook_markers("[/home/u/.claude/hooks/lint-check.sh]");
        assert_eq!(hooks, vec![("lint-check".to_string(), None)]);
    }

    #[test]
    fn test_hook_markers_with_phase() {
        let hooks = hook_markers("PreToolUse:Bash running [~/.claude/hooks/guard.sh]");
        assert_eq!(hooks, vec![("guard".to_string(), Some(HookPhase::Pre))]);

        let hooks = hook_markers("PostToolUse:Edit → [.claude/hooks/fmt.sh]");
        assert_eq!(hooks, vec![("fmt".to_string(), Some(HookPhase::Post))]);
    }

    #[test]
    fn test_hook_markers_after_ansi_strip() {
        let raw = "\x1b[2mPreToolUse:Bash\x1b[0m [~/.claude/hooks/audit.sh]";
        let clean = strip_ansi(raw);
        let hooks = hook_markers(&clean);
        assert_eq!(hooks, vec![("audit".to_string(), Some(HookPhase::Pre))]);
    }

    #[test]
    fn test_invoke_names() {
        let text = r#"<invoke name="Read"> then <invoke name="Edit">"#;
        assert_eq!(invoke_names(text), vec!["Read", "Edit"]);
    }

    #[test]
    fn test_path_like_matches_paths_only() {
        let text = "edited src/main.rs and /etc/hosts.conf but not version 1.2.3";
        let paths = path_like(text);
        assert!(paths.contains(&"src/main.rs".to_string()));
        assert!(paths.contains(&"/etc/hosts.conf".to_string()));
        assert!(!paths.iter().any(|p| p.contains("1.2.3")));
    }
}

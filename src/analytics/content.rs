//! Content analysis: code blocks, languages, frameworks, message lengths,
//! and the most-edited-file ranking.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::analytics::{ConversationSlice, NamedCount, top_n};

const TOP_FILES: usize = 10;

/// Fixed catalog of framework and tooling patterns, matched
/// case-insensitively against message text. Each regex hit increments the
/// counter by one, so a conversation that mentions a framework five times
/// contributes five.
///
/// Coverage, by category: web UI kits (react, vue, angular, svelte,
/// tailwind), test runners (jest, vitest, pytest, mocha, junit), build
/// tools (webpack, vite, gradle, maven, cmake), a container runtime
/// (docker), and a cluster orchestrator (kubernetes/k8s/kubectl).
static FRAMEWORKS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("react", r"(?i)\breact(?:\.js)?\b"),
        ("vue", r"(?i)\bvue(?:\.js)?\b"),
        ("angular", r"(?i)\bangular\b"),
        ("svelte", r"(?i)\bsvelte(?:kit)?\b"),
        ("tailwind", r"(?i)\btailwind(?:css)?\b"),
        ("jest", r"(?i)\bjest\b"),
        ("vitest", r"(?i)\bvitest\b"),
        ("pytest", r"(?i)\bpytest\b"),
        ("mocha", r"(?i)\bmocha\b"),
        ("junit", r"(?i)\bjunit\b"),
        ("webpack", r"(?i)\bwebpack\b"),
        ("vite", r"(?i)\bvite\b"),
        ("gradle", r"(?i)\bgradle\b"),
        ("maven", r"(?i)\bmaven\b"),
        ("cmake", r"(?i)\bcmake\b"),
        ("docker", r"(?i)\bdocker(?:file)?\b"),
        ("kubernetes", r"(?i)\b(?:kubernetes|k8s|kubectl)\b"),
    ]
    .into_iter()
    .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|re| (name, re)))
    .collect()
});

/// Count framework pattern hits in `text` into `into`.
pub fn count_frameworks(text: &str, into: &mut BTreeMap<String, u64>) {
    for (name, regex) in FRAMEWORKS.iter() {
        let hits = regex.find_iter(text).count() as u64;
        if hits > 0 {
            *into.entry((*name).to_string()).or_insert(0) += hits;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvgMessageLength {
    pub user: f64,
    pub assistant: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentAnalysis {
    pub total_code_blocks: u64,
    pub languages: BTreeMap<String, u64>,
    pub frameworks: BTreeMap<String, u64>,
    /// Average message length per role, in characters.
    pub avg_message_length: AvgMessageLength,
    /// Estimated share of code in all text. Estimator: actual fenced-block
    /// body characters over total text characters (the parser retains code
    /// bodies, so no block-count proxy is needed).
    pub code_to_text_ratio: f64,
    pub most_edited_files: Vec<NamedCount>,
}

impl ContentAnalysis {
    pub fn build<'a, I>(slices: I) -> ContentAnalysis
    where
        I: IntoIterator<Item = &'a ConversationSlice>,
    {
        let mut out = ContentAnalysis::default();
        let mut files: BTreeMap<String, u64> = BTreeMap::new();
        let mut user_chars = 0u64;
        let mut user_messages = 0u64;
        let mut assistant_chars = 0u64;
        let mut assistant_messages = 0u64;
        let mut code_chars = 0u64;
        let mut total_chars = 0u64;

        for slice in slices {
            out.total_code_blocks += slice.code_blocks;
            for (lang, count) in &slice.languages {
                *out.languages.entry(lang.clone()).or_insert(0) += count;
            }
            for (name, count) in &slice.frameworks {
                *out.frameworks.entry(name.clone()).or_insert(0) += count;
            }
            for (path, count) in &slice.file_mentions {
                *files.entry(path.clone()).or_insert(0) += count;
            }
            user_chars += slice.user_chars;
            user_messages += slice.user_messages;
            assistant_chars += slice.assistant_chars;
            assistant_messages += slice.assistant_messages;
            code_chars += slice.code_chars;
            total_chars += slice.total_chars;
        }

        out.avg_message_length = AvgMessageLength {
            user: ratio(user_chars, user_messages),
            assistant: ratio(assistant_chars, assistant_messages),
        };
        out.code_to_text_ratio = if total_chars > 0 {
            code_chars as f64 / total_chars as f64
        } else {
            0.0
        };
        out.most_edited_files = top_n(&files, TOP_FILES);
        out
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_frameworks_case_insensitive_multi_hit() {
        let mut counts = BTreeMap::new();
        count_frameworks("React and REACT and react-dom... plus Docker", &mut counts);
        assert_eq!(counts["react"], 3);
        assert_eq!(counts["docker"], 1);
    }

    #[test]
    fn test_count_frameworks_orchestrator_aliases() {
        let mut counts = BTreeMap::new();
        count_frameworks("deployed to k8s with kubectl apply", &mut counts);
        assert_eq!(counts["kubernetes"], 2);
    }

    #[test]
    fn test_count_frameworks_no_partial_words() {
        let mut counts = BTreeMap::new();
        count_frameworks("viteration invited", &mut counts);
        assert!(counts.is_empty());
    }

    #[test]
    fn test_build_averages_and_ratio() {
        let mut a = ConversationSlice::default();
        a.user_chars = 100;
        a.user_messages = 2;
        a.assistant_chars = 300;
        a.assistant_messages = 3;
        a.code_chars = 50;
        a.total_chars = 400;
        a.code_blocks = 1;
        a.languages.insert("ts".to_string(), 1);

        let analysis = ContentAnalysis::build([&a]);
        assert_eq!(analysis.avg_message_length.user, 50.0);
        assert_eq!(analysis.avg_message_length.assistant, 100.0);
        assert!((analysis.code_to_text_ratio - 0.125).abs() < 1e-9);
        assert_eq!(analysis.languages["ts"], 1);
    }

    #[test]
    fn test_build_empty_defaults() {
        let none: [&ConversationSlice; 0] = [];
        let analysis = ContentAnalysis::build(none);
        assert_eq!(analysis.total_code_blocks, 0);
        assert_eq!(analysis.code_to_text_ratio, 0.0);
        assert!(analysis.most_edited_files.is_empty());
    }

    #[test]
    fn test_most_edited_files_ranked() {
        let mut a = ConversationSlice::default();
        a.file_mentions.insert("src/main.rs".to_string(), 5);
        a.file_mentions.insert("src/lib.rs".to_string(), 2);
        let mut b = ConversationSlice::default();
        b.file_mentions.insert("src/lib.rs".to_string(), 4);

        let analysis = ContentAnalysis::build([&a, &b]);
        assert_eq!(analysis.most_edited_files[0].name, "src/lib.rs");
        assert_eq!(analysis.most_edited_files[0].count, 6);
        assert_eq!(analysis.most_edited_files[1].name, "src/main.rs");
    }
}

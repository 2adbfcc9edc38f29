//! Conversation catalog: corpus enumeration and change detection.
//!
//! # Architecture overview
//!
//! The catalog is the first step in every refresh. It answers two
//! questions:
//!
//! 1. **Which transcript files exist?** — a walk of
//!    `<root>/<project>/<conversation>.jsonl` (rendered `.md` archives are
//!    accepted alongside), tagging each file with the enclosing project
//!    directory.
//! 2. **What changed since last time?** — [`Catalog::scan`] diffs the walk
//!    against the in-memory conversation map by `mtime` and `size_bytes`
//!    and returns a [`Delta`] of additions, updates, and removals.
//!
//! This module deliberately knows nothing about parsing. Parse-derived
//! fields on [`Conversation`] (timestamps, message counts, fingerprints)
//! are filled in by the engine after ingest via [`Catalog::record_parsed`].
//!
//! # File selection
//!
//! Any `*.jsonl` file is a conversation; `.bak` variants are leftovers from
//! interrupted writes and are never enumerated. `*.md` / `*.markdown`
//! files are rendered archives and enumerate the same way.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::RecollectError;
use crate::model::Conversation;
use crate::parser::hex_string;

/// Result of one [`Catalog::scan`]: what appeared, changed, or vanished
/// since the previous scan. `added` and `updated` are ordered by `mtime`
/// descending with ties broken by path, so ingest handles the most recent
/// conversations first.
#[derive(Debug, Default)]
pub struct Delta {
    pub added: Vec<Conversation>,
    pub updated: Vec<Conversation>,
    pub removed: Vec<String>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Owner of all [`Conversation`] records for one corpus root.
pub struct Catalog {
    root: PathBuf,
    conversations: HashMap<String, Conversation>,
}

impl Catalog {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            conversations: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the corpus root and diff against the known conversation set.
    ///
    /// A conversation is `updated` when its `mtime` or `size_bytes` moved;
    /// parse-derived fields of an updated record are reset so stale
    /// fingerprints cannot suppress re-ingest. A missing root is a
    /// corpus-level error; an unreadable individual file is skipped.
    pub fn scan(&mut self) -> Result<Delta, RecollectError> {
        if !self.root.is_dir() {
            return Err(RecollectError::CorpusRootMissing(self.root.clone()));
        }

        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut delta = Delta::default();

        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !is_transcript(path) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            let size_bytes = meta.len();
            let mtime = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            let id = conversation_id(path);
            seen.insert(id.clone());

            match self.conversations.entry(id.clone()) {
                std::collections::hash_map::Entry::Vacant(slot) => {
                    let conv = Conversation {
                        id,
                        source_path: path.to_path_buf(),
                        project: project_of(path, &self.root),
                        size_bytes,
                        mtime,
                        first_ts: None,
                        last_ts: None,
                        message_count: 0,
                        duration_ms: 0,
                        content_fingerprint: None,
                    };
                    delta.added.push(conv.clone());
                    slot.insert(conv);
                }
                std::collections::hash_map::Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    if existing.mtime != mtime || existing.size_bytes != size_bytes {
                        existing.mtime = mtime;
                        existing.size_bytes = size_bytes;
                        existing.first_ts = None;
                        existing.last_ts = None;
                        existing.message_count = 0;
                        existing.duration_ms = 0;
                        existing.content_fingerprint = None;
                        delta.updated.push(existing.clone());
                    }
                }
            }
        }

        let gone: Vec<String> = self
            .conversations
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for id in gone {
            self.conversations.remove(&id);
            delta.removed.push(id);
        }

        sort_recent_first(&mut delta.added);
        sort_recent_first(&mut delta.updated);
        delta.removed.sort();

        Ok(delta)
    }

    pub fn resolve(&self, id: &str) -> Result<&Conversation, RecollectError> {
        self.conversations
            .get(id)
            .ok_or_else(|| RecollectError::UnknownConversation(id.to_string()))
    }

    /// Unique project names across the catalog, sorted.
    pub fn repositories(&self) -> BTreeSet<String> {
        self.conversations
            .values()
            .map(|c| c.project.clone())
            .collect()
    }

    pub fn conversations(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.values()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Record parse-derived fields after an ingest pass.
    pub fn record_parsed(
        &mut self,
        id: &str,
        first_ts: Option<DateTime<Utc>>,
        last_ts: Option<DateTime<Utc>>,
        message_count: u64,
        fingerprint: String,
    ) {
        if let Some(conv) = self.conversations.get_mut(id) {
            conv.first_ts = first_ts;
            conv.last_ts = last_ts;
            conv.message_count = message_count;
            conv.duration_ms = match (first_ts, last_ts) {
                (Some(first), Some(last)) if last >= first => {
                    (last - first).num_milliseconds() as u64
                }
                _ => 0,
            };
            conv.content_fingerprint = Some(fingerprint);
        }
    }
}

fn sort_recent_first(conversations: &mut [Conversation]) {
    conversations.sort_by(|a, b| {
        b.mtime
            .cmp(&a.mtime)
            .then_with(|| a.source_path.cmp(&b.source_path))
    });
}

fn is_transcript(path: &Path) -> bool {
    if !path.is_file() {
        return false;
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    if name.contains(".bak") {
        return false;
    }
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("jsonl") | Some("md") | Some("markdown")
    )
}

/// Stable conversation id: the filename stem when the source already names
/// the file with a UUID, otherwise a 16-hex-char hash of the absolute path.
pub fn conversation_id(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    if is_uuid(&stem) {
        return stem.to_lowercase();
    }
    let absolute = path
        .canonicalize()
        .unwrap_or_else(|_| path.to_path_buf());
    let digest = Sha256::digest(absolute.to_string_lossy().as_bytes());
    hex_string(&digest)[..16].to_string()
}

fn is_uuid(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    for (i, b) in bytes.iter().enumerate() {
        match i {
            8 | 13 | 18 | 23 => {
                if *b != b'-' {
                    return false;
                }
            }
            _ => {
                if !b.is_ascii_hexdigit() {
                    return false;
                }
            }
        }
    }
    true
}

/// Immediate parent directory name; the "repository" filter key. Files
/// sitting directly in the root fall back to the root's own name.
fn project_of(path: &Path, root: &Path) -> String {
    path.parent()
        .filter(|p| *p != root)
        .and_then(|p| p.file_name())
        .or_else(|| root.file_name())
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_file(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_is_uuid() {
        assert!(is_uuid("0199a1b2-3c4d-5e6f-8901-234567890abc"));
        assert!(!is_uuid("not-a-uuid"));
        assert!(!is_uuid("0199a1b23c4d5e6f8901234567890abc"));
    }

    #[test]
    fn test_conversation_id_prefers_uuid_stem() {
        let id = conversation_id(Path::new(
            "/corpus/proj/0199A1B2-3c4d-5e6f-8901-234567890abc.jsonl",
        ));
        assert_eq!(id, "0199a1b2-3c4d-5e6f-8901-234567890abc");
    }

    #[test]
    fn test_conversation_id_hashes_other_names() {
        let id = conversation_id(Path::new("/corpus/proj/notes.jsonl"));
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_scan_missing_root_errors() {
        let mut catalog = Catalog::new(PathBuf::from("/nonexistent/recollect-root"));
        assert!(matches!(
            catalog.scan(),
            Err(RecollectError::CorpusRootMissing(_))
        ));
    }

    #[test]
    fn test_scan_add_update_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "projectX/conv.jsonl",
            r#"{"message":{"role":"user","content":"hi"}}"#,
        );

        let mut catalog = Catalog::new(dir.path().to_path_buf());
        let delta = catalog.scan().unwrap();
        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.added[0].project, "projectX");
        assert!(delta.updated.is_empty());
        assert!(delta.removed.is_empty());

        // No change: empty delta.
        let delta = catalog.scan().unwrap();
        assert!(delta.is_empty());

        // Grow the file: update.
        fs::write(
            &path,
            r#"{"message":{"role":"user","content":"hi there again"}}"#,
        )
        .unwrap();
        let delta = catalog.scan().unwrap();
        assert_eq!(delta.updated.len(), 1);
        assert!(delta.updated[0].content_fingerprint.is_none());

        // Delete: removed.
        fs::remove_file(&path).unwrap();
        let delta = catalog.scan().unwrap();
        assert_eq!(delta.removed.len(), 1);
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_scan_skips_bak_files() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "proj/a.jsonl", "{}");
        write_file(dir.path(), "proj/a.jsonl.bak", "{}");

        let mut catalog = Catalog::new(dir.path().to_path_buf());
        let delta = catalog.scan().unwrap();
        assert_eq!(delta.added.len(), 1);
    }

    #[test]
    fn test_repositories_unique_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "beta/a.jsonl", "{}");
        write_file(dir.path(), "alpha/b.jsonl", "{}");
        write_file(dir.path(), "alpha/c.jsonl", "{}");

        let mut catalog = Catalog::new(dir.path().to_path_buf());
        catalog.scan().unwrap();
        let repos: Vec<String> = catalog.repositories().into_iter().collect();
        assert_eq!(repos, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_record_parsed_fills_duration() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "proj/a.jsonl", "{}");
        let mut catalog = Catalog::new(dir.path().to_path_buf());
        let delta = catalog.scan().unwrap();
        let id = delta.added[0].id.clone();

        let first = Utc::now();
        let last = first + chrono::Duration::minutes(10);
        catalog.record_parsed(&id, Some(first), Some(last), 4, "abc".to_string());

        let conv = catalog.resolve(&id).unwrap();
        assert_eq!(conv.message_count, 4);
        assert_eq!(conv.duration_ms, 600_000);
        assert_eq!(conv.content_fingerprint.as_deref(), Some("abc"));
    }
}

//! Persistent inverted index over conversations.
//!
//! # Architecture overview
//!
//! The index maps terms to postings (`conversation_id`, field, token
//! positions). Ingest is incremental and fingerprint-keyed: the engine
//! skips conversations whose content fingerprint is unchanged, and an
//! updated conversation is committed atomically as remove-then-insert
//! under the write lock. Queries take the read lock only, so concurrent
//! readers always observe either the pre- or post-update state of any
//! conversation, never a mixture.
//!
//! Scoring is per-term TF-IDF with square-root length normalization,
//! summed over matched terms. Fuzzy expansion (one edit, query tokens of
//! four or more characters) and last-token prefix expansion contribute at
//! diminished weight so an exact term always outranks its expansions.
//!
//! # Persistence
//!
//! The whole index serializes into one checksummed snapshot file
//! ([`snapshot`]). A corrupt snapshot is recovered by starting empty — the
//! fingerprint map goes with it, so the next refresh re-ingests every
//! conversation and rewrites a valid file.
//!
//! # TRADE-OFFS
//!
//! - `BTreeMap` keyed by term costs a little on insert versus a hash map
//!   but gives prefix expansion an ordered range scan and makes persisted
//!   snapshots byte-deterministic for identical contents.
//! - Fuzzy expansion scans the whole term dictionary. At the corpus sizes
//!   this tool targets (tens of thousands of conversations, low hundreds
//!   of thousands of terms) the scan stays comfortably inside the query
//!   latency budget and needs no auxiliary n-gram structure.

pub mod snapshot;
pub mod tokenize;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::RecollectError;
use crate::model::{Conversation, Field, Message, Posting};
use self::tokenize::tokenize_with_positions;

/// Score weight for an exactly matched term.
const EXACT_WEIGHT: f64 = 1.0;
/// Score weight for a last-token prefix expansion.
const PREFIX_WEIGHT: f64 = 0.6;
/// Score weight for a one-edit fuzzy expansion.
const FUZZY_WEIGHT: f64 = 0.4;
/// Query tokens shorter than this are never fuzzy-expanded.
const FUZZY_MIN_LEN: usize = 4;

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexData {
    /// term → postings, each vec sorted by (conversation_id, field).
    postings: BTreeMap<String, Vec<Posting>>,
    /// conversation → every term it contributed, for O(terms) removal.
    doc_terms: BTreeMap<String, Vec<String>>,
    /// conversation → content token count, for length normalization.
    doc_lengths: BTreeMap<String, u32>,
    /// conversation → content fingerprint at last ingest.
    fingerprints: BTreeMap<String, String>,
}

/// The only writable shared resource in the system. Writes are serialized
/// by the write lock; reads run concurrently against committed state.
pub struct IndexStore {
    path: Option<PathBuf>,
    inner: RwLock<IndexData>,
    dirty: AtomicBool,
    recovered: bool,
}

impl IndexStore {
    /// Open the index at `path`, recovering from a corrupt snapshot by
    /// starting empty (the emptied fingerprint map forces full re-ingest
    /// on the next refresh).
    pub fn open(path: &Path) -> Self {
        let (data, recovered) = match snapshot::load::<IndexData>(path) {
            Ok(Some(data)) => (data, false),
            Ok(None) => (IndexData::default(), false),
            Err(e) => {
                warn!(error = %e, "index snapshot corrupt, rebuilding from scratch");
                (IndexData::default(), true)
            }
        };
        Self {
            path: Some(path.to_path_buf()),
            inner: RwLock::new(data),
            dirty: AtomicBool::new(recovered),
            recovered,
        }
    }

    /// In-memory index with no backing file.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            inner: RwLock::new(IndexData::default()),
            dirty: AtomicBool::new(false),
            recovered: false,
        }
    }

    /// True when `open` discarded a corrupt snapshot.
    pub fn recovered_from_corruption(&self) -> bool {
        self.recovered
    }

    /// Replace a conversation's postings with ones derived from `messages`.
    ///
    /// Remove-then-insert runs under one write-lock acquisition, so the
    /// update is atomic with respect to readers.
    pub fn ingest(&self, conversation: &Conversation, messages: &[Message], fingerprint: String) {
        let mut per_term: BTreeMap<(String, Field), Vec<u32>> = BTreeMap::new();

        let content: Vec<String> = messages.iter().map(|m| m.searchable_text()).collect();
        let content = content.join("\n");
        let content_tokens = tokenize_with_positions(&content);
        let doc_length = content_tokens.len() as u32;
        for (token, position) in content_tokens {
            per_term
                .entry((token, Field::Content))
                .or_default()
                .push(position);
        }
        for (token, position) in tokenize_with_positions(&conversation.project) {
            per_term
                .entry((token, Field::Project))
                .or_default()
                .push(position);
        }
        let filename = conversation
            .source_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        for (token, position) in tokenize_with_positions(&filename) {
            per_term
                .entry((token, Field::Filename))
                .or_default()
                .push(position);
        }

        let id = &conversation.id;
        let mut data = self.inner.write().unwrap_or_else(|e| e.into_inner());
        remove_locked(&mut data, id);

        let mut terms: Vec<String> = Vec::with_capacity(per_term.len());
        for ((term, field), positions) in per_term {
            let vec = data.postings.entry(term.clone()).or_default();
            vec.push(Posting {
                conversation_id: id.clone(),
                field,
                positions,
            });
            vec.sort_by(|a, b| {
                a.conversation_id
                    .cmp(&b.conversation_id)
                    .then_with(|| field_rank(a.field).cmp(&field_rank(b.field)))
            });
            if terms.last() != Some(&term) {
                terms.push(term);
            }
        }
        data.doc_terms.insert(id.clone(), terms);
        data.doc_lengths.insert(id.clone(), doc_length);
        data.fingerprints.insert(id.clone(), fingerprint);
        drop(data);
        self.dirty.store(true, Ordering::Release);
    }

    /// Purge every posting and the fingerprint entry for a conversation.
    pub fn remove(&self, conversation_id: &str) {
        let mut data = self.inner.write().unwrap_or_else(|e| e.into_inner());
        remove_locked(&mut data, conversation_id);
        drop(data);
        self.dirty.store(true, Ordering::Release);
    }

    /// The fingerprint stored at last ingest, or `None` when the
    /// conversation has never been ingested.
    pub fn fingerprint(&self, conversation_id: &str) -> Option<String> {
        let data = self.inner.read().unwrap_or_else(|e| e.into_inner());
        data.fingerprints.get(conversation_id).cloned()
    }

    pub fn doc_count(&self) -> usize {
        let data = self.inner.read().unwrap_or_else(|e| e.into_inner());
        data.doc_lengths.len()
    }

    /// Snapshot of the fingerprint map, used to check analytics-cache
    /// divergence.
    pub fn fingerprints(&self) -> BTreeMap<String, String> {
        let data = self.inner.read().unwrap_or_else(|e| e.into_inner());
        data.fingerprints.clone()
    }

    /// Aggregate TF-IDF scores per conversation for the given query tokens.
    ///
    /// `prefix_last` enables prefix expansion for the final token (the one
    /// the user is still typing). Expansion weights never exceed the exact
    /// weight, and a term reachable through several expansions counts once
    /// at its best weight.
    pub fn match_scores(&self, tokens: &[String], prefix_last: bool) -> BTreeMap<String, f64> {
        let data = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut scores: BTreeMap<String, f64> = BTreeMap::new();
        if tokens.is_empty() {
            return scores;
        }
        let doc_count = data.doc_lengths.len().max(1) as f64;

        for (i, token) in tokens.iter().enumerate() {
            let is_last = i + 1 == tokens.len();
            let mut expansions: BTreeMap<&str, f64> = BTreeMap::new();

            if data.postings.contains_key(token.as_str()) {
                expansions.insert(token.as_str(), EXACT_WEIGHT);
            }
            if prefix_last && is_last {
                for (term, _) in data
                    .postings
                    .range::<str, _>((
                        std::ops::Bound::Excluded(token.as_str()),
                        std::ops::Bound::Unbounded,
                    ))
                    .take_while(|(term, _)| term.starts_with(token.as_str()))
                {
                    expansions.entry(term.as_str()).or_insert(PREFIX_WEIGHT);
                }
            }
            if token.chars().count() >= FUZZY_MIN_LEN {
                for term in data.postings.keys() {
                    if term.as_str() != token.as_str() && within_one_edit(token, term) {
                        expansions.entry(term.as_str()).or_insert(FUZZY_WEIGHT);
                    }
                }
            }

            for (term, weight) in expansions {
                let Some(postings) = data.postings.get(term) else {
                    continue;
                };
                let df = distinct_conversations(postings).max(1) as f64;
                let idf = (1.0 + doc_count / df).ln();
                for posting in postings {
                    let tf = posting.positions.len() as f64;
                    let len_norm = match posting.field {
                        Field::Content => {
                            let len = data
                                .doc_lengths
                                .get(&posting.conversation_id)
                                .copied()
                                .unwrap_or(1)
                                .max(1);
                            (len as f64).sqrt()
                        }
                        Field::Project | Field::Filename => 1.0,
                    };
                    *scores.entry(posting.conversation_id.clone()).or_insert(0.0) +=
                        weight * tf * idf / len_norm;
                }
            }
        }

        scores
    }

    /// Flush to disk when the index changed since the last flush.
    pub fn persist(&self) -> Result<(), RecollectError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let data = self.inner.read().unwrap_or_else(|e| e.into_inner());
        snapshot::save(path, &*data)
    }

    /// Drop all state, e.g. before a forced full rebuild.
    pub fn wipe(&self) {
        let mut data = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *data = IndexData::default();
        drop(data);
        self.dirty.store(true, Ordering::Release);
    }

    #[cfg(test)]
    fn postings_of(&self, conversation_id: &str) -> Vec<(String, Posting)> {
        let data = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::new();
        for (term, postings) in &data.postings {
            for posting in postings {
                if posting.conversation_id == conversation_id {
                    out.push((term.clone(), posting.clone()));
                }
            }
        }
        out
    }
}

fn remove_locked(data: &mut IndexData, conversation_id: &str) {
    if let Some(terms) = data.doc_terms.remove(conversation_id) {
        for term in terms {
            if let Some(postings) = data.postings.get_mut(&term) {
                postings.retain(|p| p.conversation_id != conversation_id);
                if postings.is_empty() {
                    data.postings.remove(&term);
                }
            }
        }
    }
    data.doc_lengths.remove(conversation_id);
    data.fingerprints.remove(conversation_id);
}

fn distinct_conversations(postings: &[Posting]) -> usize {
    let mut count = 0;
    let mut last: Option<&str> = None;
    for posting in postings {
        if last != Some(posting.conversation_id.as_str()) {
            count += 1;
            last = Some(posting.conversation_id.as_str());
        }
    }
    count
}

fn field_rank(field: Field) -> u8 {
    match field {
        Field::Content => 0,
        Field::Project => 1,
        Field::Filename => 2,
    }
}

/// True when `a` and `b` are within one insertion, deletion, or
/// substitution of each other (equality included).
fn within_one_edit(a: &str, b: &str) -> bool {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    match long.len() - short.len() {
        0 => {
            let mismatches = short.iter().zip(long.iter()).filter(|(x, y)| x != y).count();
            mismatches <= 1
        }
        1 => {
            let mut i = 0;
            let mut j = 0;
            let mut skipped = false;
            while i < short.len() && j < long.len() {
                if short[i] == long[j] {
                    i += 1;
                    j += 1;
                } else if skipped {
                    return false;
                } else {
                    skipped = true;
                    j += 1;
                }
            }
            true
        }
        _ => false,
    }
}

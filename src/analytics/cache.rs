//! Versioned on-disk analytics cache with incremental refresh.
//!
//! # File shape
//!
//! Plain JSON. The top level carries the snapshot sections (`version`,
//! `lastUpdated`, `overview`, `conversationStats`, `timePatterns`,
//! `toolUsage`, `contentAnalysis`, `productivityMetrics`, `userActions`,
//! `comparative`) plus two bookkeeping maps: `fingerprints`
//! (conversation id → content fingerprint at fold time) and `slices`
//! (conversation id → per-conversation partial aggregates).
//!
//! # Consistency rule
//!
//! The cache is either consistent with the set of conversations whose
//! fingerprints it lists, or it is stale and rebuilt. Staleness triggers:
//! a version bump, an unreadable/corrupt file (treated as empty), or the
//! fingerprint map diverging from the index's fingerprints for more than
//! `rebuild_threshold` of conversations. Below the threshold, refresh
//! re-folds only the diverging conversations and re-merges the snapshot
//! from cached slices.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::analytics::{AnalyticsSnapshot, ConversationSlice, build_snapshot};
use crate::error::RecollectError;

/// Bump when the snapshot or slice schema changes; a mismatch forces a
/// full rebuild.
pub const CACHE_VERSION: u32 = 3;

/// Default divergence fraction above which incremental refresh gives way
/// to a full rebuild.
pub const DEFAULT_REBUILD_THRESHOLD: f64 = 0.25;

#[derive(Serialize, Deserialize)]
struct CacheFile {
    #[serde(flatten)]
    snapshot: AnalyticsSnapshot,
    #[serde(default)]
    fingerprints: BTreeMap<String, String>,
    #[serde(default)]
    slices: BTreeMap<String, ConversationSlice>,
}

/// Single-writer cache handle; readers get the last committed snapshot.
pub struct AnalyticsCache {
    path: Option<PathBuf>,
    snapshot: AnalyticsSnapshot,
    fingerprints: BTreeMap<String, String>,
    slices: BTreeMap<String, ConversationSlice>,
    rebuild_threshold: f64,
    dirty: bool,
}

impl AnalyticsCache {
    /// Load the cache at `path`. Missing, unreadable, corrupt, or
    /// version-mismatched files all degrade to an empty cache — the next
    /// refresh rebuilds from scratch, and analytics keeps working.
    pub fn load(path: &Path, rebuild_threshold: f64) -> Self {
        let loaded: Option<CacheFile> = std::fs::read(path)
            .ok()
            .and_then(|bytes| match serde_json::from_slice(&bytes) {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "analytics cache unreadable, rebuilding");
                    None
                }
            });

        match loaded {
            Some(file) if file.snapshot.version == CACHE_VERSION => Self {
                path: Some(path.to_path_buf()),
                snapshot: file.snapshot,
                fingerprints: file.fingerprints,
                slices: file.slices,
                rebuild_threshold,
                dirty: false,
            },
            Some(_) => {
                warn!(path = %path.display(), "analytics cache version changed, rebuilding");
                Self::fresh(Some(path.to_path_buf()), rebuild_threshold)
            }
            None => Self::fresh(Some(path.to_path_buf()), rebuild_threshold),
        }
    }

    pub fn in_memory() -> Self {
        Self::fresh(None, DEFAULT_REBUILD_THRESHOLD)
    }

    fn fresh(path: Option<PathBuf>, rebuild_threshold: f64) -> Self {
        Self {
            path,
            snapshot: AnalyticsSnapshot::empty(CACHE_VERSION),
            fingerprints: BTreeMap::new(),
            slices: BTreeMap::new(),
            rebuild_threshold,
            dirty: false,
        }
    }

    pub fn snapshot(&self) -> &AnalyticsSnapshot {
        &self.snapshot
    }

    pub fn fingerprint(&self, conversation_id: &str) -> Option<&str> {
        self.fingerprints.get(conversation_id).map(|s| s.as_str())
    }

    /// True when incremental refresh is no longer sound: the fingerprint
    /// map diverges from the index's for more than the configured fraction
    /// of conversations.
    pub fn needs_rebuild(&self, index_fingerprints: &BTreeMap<String, String>) -> bool {
        let mut diverging = 0usize;
        for (id, fp) in index_fingerprints {
            if self.fingerprints.get(id) != Some(fp) {
                diverging += 1;
            }
        }
        for id in self.fingerprints.keys() {
            if !index_fingerprints.contains_key(id) {
                diverging += 1;
            }
        }
        let denominator = index_fingerprints.len().max(1);
        diverging as f64 / denominator as f64 > self.rebuild_threshold
    }

    /// Install or replace one conversation's slice.
    pub fn upsert(&mut self, conversation_id: &str, fingerprint: String, slice: ConversationSlice) {
        self.fingerprints
            .insert(conversation_id.to_string(), fingerprint);
        self.slices.insert(conversation_id.to_string(), slice);
        self.dirty = true;
    }

    pub fn remove(&mut self, conversation_id: &str) {
        let had = self.fingerprints.remove(conversation_id).is_some();
        let had_slice = self.slices.remove(conversation_id).is_some();
        if had || had_slice {
            self.dirty = true;
        }
    }

    pub fn clear(&mut self) {
        if !self.fingerprints.is_empty() || !self.slices.is_empty() {
            self.dirty = true;
        }
        self.fingerprints.clear();
        self.slices.clear();
    }

    /// Re-merge the snapshot from the cached slices, with trend windows
    /// ending at `end`.
    pub fn rebuild_snapshot(&mut self, end: NaiveDate) {
        let slices: Vec<&ConversationSlice> = self.slices.values().collect();
        self.snapshot = build_snapshot(&slices, end, CACHE_VERSION);
        self.dirty = true;
    }

    /// Persist to disk (atomic replace). A no-op when nothing changed or
    /// the cache is memory-only.
    pub fn save(&mut self) -> Result<(), RecollectError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        let file = CacheFile {
            snapshot: self.snapshot.clone(),
            fingerprints: self.fingerprints.clone(),
            slices: self.slices.clone(),
        };
        let body = serde_json::to_vec_pretty(&file)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        {
            let mut out = std::fs::File::create(&tmp)?;
            out.write_all(&body)?;
            out.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_slice(messages: u64) -> ConversationSlice {
        ConversationSlice {
            message_count: messages,
            ..Default::default()
        }
    }

    fn end() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 29).unwrap()
    }

    #[test]
    fn test_roundtrip_and_required_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics.json");

        let mut cache = AnalyticsCache::load(&path, DEFAULT_REBUILD_THRESHOLD);
        cache.upsert("c1", "fp1".to_string(), sample_slice(3));
        cache.rebuild_snapshot(end());
        cache.save().unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        for key in [
            "version",
            "lastUpdated",
            "overview",
            "conversationStats",
            "timePatterns",
            "toolUsage",
            "contentAnalysis",
            "productivityMetrics",
            "userActions",
            "comparative",
            "fingerprints",
            "slices",
        ] {
            assert!(raw.get(key).is_some(), "missing key {key}");
        }

        let reloaded = AnalyticsCache::load(&path, DEFAULT_REBUILD_THRESHOLD);
        assert_eq!(reloaded.fingerprint("c1"), Some("fp1"));
        assert_eq!(
            reloaded.snapshot().overview.as_ref().unwrap().total_messages,
            3
        );
    }

    #[test]
    fn test_corrupt_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let cache = AnalyticsCache::load(&path, DEFAULT_REBUILD_THRESHOLD);
        assert!(cache.fingerprint("anything").is_none());
    }

    #[test]
    fn test_version_mismatch_forces_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analytics.json");

        let mut cache = AnalyticsCache::load(&path, DEFAULT_REBUILD_THRESHOLD);
        cache.upsert("c1", "fp1".to_string(), sample_slice(1));
        cache.rebuild_snapshot(end());
        cache.save().unwrap();

        // Rewrite with a bumped version field.
        let mut raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        raw["version"] = serde_json::json!(CACHE_VERSION + 1);
        std::fs::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        let reloaded = AnalyticsCache::load(&path, DEFAULT_REBUILD_THRESHOLD);
        assert!(reloaded.fingerprint("c1").is_none());
    }

    #[test]
    fn test_needs_rebuild_threshold() {
        let mut cache = AnalyticsCache::in_memory();
        let mut index_fps = BTreeMap::new();
        for i in 0..10 {
            let id = format!("c{i}");
            cache.upsert(&id, "same".to_string(), sample_slice(1));
            index_fps.insert(id, "same".to_string());
        }
        assert!(!cache.needs_rebuild(&index_fps));

        // Two of ten diverge: under the 25% default threshold.
        index_fps.insert("c0".to_string(), "changed".to_string());
        index_fps.insert("c1".to_string(), "changed".to_string());
        assert!(!cache.needs_rebuild(&index_fps));

        // Four of ten diverge: over it.
        index_fps.insert("c2".to_string(), "changed".to_string());
        index_fps.insert("c3".to_string(), "changed".to_string());
        assert!(cache.needs_rebuild(&index_fps));
    }

    #[test]
    fn test_remove_updates_snapshot_after_rebuild() {
        let mut cache = AnalyticsCache::in_memory();
        cache.upsert("c1", "f1".to_string(), sample_slice(5));
        cache.upsert("c2", "f2".to_string(), sample_slice(7));
        cache.rebuild_snapshot(end());
        assert_eq!(
            cache.snapshot().overview.as_ref().unwrap().total_messages,
            12
        );

        cache.remove("c2");
        cache.rebuild_snapshot(end());
        assert_eq!(
            cache.snapshot().overview.as_ref().unwrap().total_messages,
            5
        );
    }
}

//! The engine: one value owning the catalog, index store, and analytics
//! cache, coordinating refresh and serving queries.
//!
//! # Architecture overview
//!
//! ```text
//! refresh():  catalog.scan() ─▶ delta ─▶ worker pool ─▶ parse + fingerprint
//!                                            │
//!                              index.ingest (atomic per conversation)
//!                                            │
//!                              cache.upsert slices ─▶ snapshot re-merge
//! search():   catalog + index (read-only, committed state)
//! analytics(): cached snapshot, or a scoped re-fold
//! ```
//!
//! # Concurrency model
//!
//! Refresh parallelizes the I/O- and CPU-bound per-conversation work
//! (reading, tokenizing, folding) across a worker pool bounded by the core
//! count, using scoped threads over a shared job queue. All index writes
//! go through the store's write lock, one conversation at a time, so a
//! concurrent query observes either the pre- or post-update state of any
//! conversation. Cancellation is checked between conversations; a
//! cancelled refresh leaves the index consistent because each
//! conversation's update committed atomically before the flag was read.
//!
//! The interactive query path never blocks on ingestion longer than one
//! per-conversation commit: queries take read locks only.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock, mpsc};
use std::time::Instant;

use chrono::{DateTime, Local, Utc};
use tracing::{debug, info, warn};

use crate::analytics::cache::AnalyticsCache;
use crate::analytics::{AnalyticsSnapshot, ConversationSlice};
use crate::catalog::Catalog;
use crate::config::Config;
use crate::error::RecollectError;
use crate::index::IndexStore;
use crate::parser;
use crate::query::{DateRange, SearchRequest, SearchResponse, run_search};

/// Everything `Engine::new` needs; built from [`Config`] in the CLI or
/// assembled directly in tests.
pub struct EngineOptions {
    pub root: PathBuf,
    /// `None` keeps the index in memory (tests, one-shot runs).
    pub index_path: Option<PathBuf>,
    /// `None` keeps the analytics cache in memory.
    pub cache_path: Option<PathBuf>,
    pub flush_interval: std::time::Duration,
    pub rebuild_threshold: f64,
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            root: config.root_path(),
            index_path: Some(config.index_file()),
            cache_path: Some(config.cache_file()),
            flush_interval: config.flush_interval(),
            rebuild_threshold: config.rebuild_threshold_value(),
        }
    }

    /// Memory-only engine over `root`; nothing touches the disk outside
    /// the corpus.
    pub fn ephemeral(root: PathBuf) -> Self {
        Self {
            root,
            index_path: None,
            cache_path: None,
            flush_interval: std::time::Duration::from_secs(30),
            rebuild_threshold: crate::analytics::cache::DEFAULT_REBUILD_THRESHOLD,
        }
    }
}

/// Counters from one refresh pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Conversations whose postings were actually rewritten (fingerprint
    /// changed or first ingest).
    pub ingested: usize,
    /// Conversations parsed but skipped because their fingerprint was
    /// unchanged.
    pub unchanged: usize,
    pub cancelled: bool,
}

pub struct Engine {
    root: PathBuf,
    catalog: RwLock<Catalog>,
    index: IndexStore,
    cache: Mutex<AnalyticsCache>,
    flush_interval: std::time::Duration,
}

/// What one worker hands back to the coordinating thread per conversation.
struct IngestOutcome {
    id: String,
    first_ts: Option<DateTime<Utc>>,
    last_ts: Option<DateTime<Utc>>,
    message_count: u64,
    fingerprint: String,
    slice: ConversationSlice,
    rewrote_index: bool,
    /// Zero parseable messages: the conversation is dropped from the index
    /// and the analytics rather than indexed by filename alone.
    empty: bool,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        let index = match &options.index_path {
            Some(path) => IndexStore::open(path),
            None => IndexStore::in_memory(),
        };
        let cache = match &options.cache_path {
            Some(path) => AnalyticsCache::load(path, options.rebuild_threshold),
            None => AnalyticsCache::in_memory(),
        };
        Self {
            catalog: RwLock::new(Catalog::new(options.root.clone())),
            root: options.root,
            index,
            cache: Mutex::new(cache),
            flush_interval: options.flush_interval,
        }
    }

    /// True when opening the index discarded a corrupt snapshot; the next
    /// refresh rebuilds it.
    pub fn index_recovered(&self) -> bool {
        self.index.recovered_from_corruption()
    }

    /// Scan the corpus and apply the delta: parse, ingest, and fold each
    /// added or updated conversation; purge removed ones; re-merge the
    /// analytics snapshot; flush.
    ///
    /// `cancel` is observed between conversations. A cancelled refresh
    /// returns the partial report; everything committed so far is durable
    /// and consistent.
    pub fn refresh(&self, cancel: Option<&AtomicBool>) -> Result<RefreshReport, RecollectError> {
        let delta = self
            .catalog
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .scan()?;

        let mut report = RefreshReport {
            added: delta.added.len(),
            updated: delta.updated.len(),
            removed: delta.removed.len(),
            ..Default::default()
        };

        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            for id in &delta.removed {
                self.index.remove(id);
                cache.remove(id);
            }
        }

        let jobs: VecDeque<_> = delta
            .added
            .into_iter()
            .chain(delta.updated.into_iter())
            .collect();
        let job_count = jobs.len();

        if job_count > 0 {
            info!(jobs = job_count, "refreshing conversations");
            report = self.run_ingest_pool(jobs, cancel, report);
        }

        if cancel.map(|c| c.load(Ordering::Acquire)).unwrap_or(false) {
            report.cancelled = true;
        }

        if !report.cancelled {
            self.reconcile_cache();
        }

        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.rebuild_snapshot(Local::now().date_naive());
            cache.save()?;
        }
        self.index.persist()?;

        Ok(report)
    }

    /// Parse and commit `jobs` across a bounded worker pool.
    fn run_ingest_pool(
        &self,
        jobs: VecDeque<crate::model::Conversation>,
        cancel: Option<&AtomicBool>,
        mut report: RefreshReport,
    ) -> RefreshReport {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(jobs.len().max(1));
        let queue = Mutex::new(jobs);
        let (tx, rx) = mpsc::channel::<IngestOutcome>();

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let queue = &queue;
                let index = &self.index;
                scope.spawn(move || {
                    loop {
                        if cancel.map(|c| c.load(Ordering::Acquire)).unwrap_or(false) {
                            break;
                        }
                        let job = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
                        let Some(conversation) = job else { break };

                        let parsed = parser::parse_with_tools(&conversation.source_path);
                        let fingerprint = parser::content_fingerprint(&parsed.messages);
                        let empty = parsed.messages.is_empty();
                        let mut rewrote_index = false;
                        if empty {
                            index.remove(&conversation.id);
                        } else {
                            rewrote_index = index.fingerprint(&conversation.id).as_deref()
                                != Some(fingerprint.as_str());
                            if rewrote_index {
                                index.ingest(&conversation, &parsed.messages, fingerprint.clone());
                            }
                        }
                        let slice = ConversationSlice::build(
                            &conversation.project,
                            &parsed.messages,
                            None,
                        );
                        let outcome = IngestOutcome {
                            id: conversation.id,
                            first_ts: slice.first_ts,
                            last_ts: slice.last_ts,
                            message_count: slice.message_count,
                            fingerprint,
                            slice,
                            rewrote_index,
                            empty,
                        };
                        if tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            let mut last_flush = Instant::now();
            for outcome in rx.iter() {
                if outcome.rewrote_index {
                    report.ingested += 1;
                } else {
                    report.unchanged += 1;
                }
                self.catalog
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .record_parsed(
                        &outcome.id,
                        outcome.first_ts,
                        outcome.last_ts,
                        outcome.message_count,
                        outcome.fingerprint.clone(),
                    );
                let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
                if outcome.empty {
                    cache.remove(&outcome.id);
                } else {
                    cache.upsert(&outcome.id, outcome.fingerprint, outcome.slice);
                }
                drop(cache);

                if last_flush.elapsed() >= self.flush_interval {
                    if let Err(e) = self.index.persist() {
                        warn!(error = %e, "periodic index flush failed");
                    }
                    last_flush = Instant::now();
                }
            }
        });

        report
    }

    /// Rebuild the analytics slices wholesale when the cache has drifted
    /// too far from the index (foreign cache file, version reset, partial
    /// corruption).
    fn reconcile_cache(&self) {
        let index_fingerprints = self.index.fingerprints();
        let needs_rebuild = {
            let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.needs_rebuild(&index_fingerprints)
        };
        if !needs_rebuild {
            return;
        }

        debug!("analytics cache diverged from index, re-folding all conversations");
        let conversations: Vec<_> = {
            let catalog = self.catalog.read().unwrap_or_else(|e| e.into_inner());
            catalog.conversations().cloned().collect()
        };
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.clear();
        for conversation in conversations {
            let messages: Vec<_> = parser::parse(&conversation.source_path).collect();
            let fingerprint = parser::content_fingerprint(&messages);
            let slice = ConversationSlice::build(&conversation.project, &messages, None);
            cache.upsert(&conversation.id, fingerprint, slice);
        }
    }

    /// Run a search against the committed catalog and index state.
    pub fn search(&self, request: &SearchRequest) -> SearchResponse {
        let catalog = self.catalog.read().unwrap_or_else(|e| e.into_inner());
        run_search(&catalog, &self.index, request)
    }

    /// The current analytics snapshot, or a fresh scoped fold when a date
    /// range is given (cached slices are whole-conversation and cannot be
    /// re-scoped).
    pub fn analytics(&self, scope: Option<DateRange>) -> AnalyticsSnapshot {
        match scope {
            None => {
                let cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
                cache.snapshot().clone()
            }
            Some(range) => {
                let conversations: Vec<_> = {
                    let catalog = self.catalog.read().unwrap_or_else(|e| e.into_inner());
                    catalog.conversations().cloned().collect()
                };
                let slices: Vec<ConversationSlice> = conversations
                    .iter()
                    .map(|conversation| {
                        let messages: Vec<_> =
                            parser::parse(&conversation.source_path).collect();
                        ConversationSlice::build(&conversation.project, &messages, Some(&range))
                    })
                    .collect();
                let refs: Vec<&ConversationSlice> = slices.iter().collect();
                let end = range
                    .to
                    .map(|to| to.with_timezone(&Local).date_naive())
                    .unwrap_or_else(|| Local::now().date_naive());
                crate::analytics::build_snapshot(
                    &refs,
                    end,
                    crate::analytics::cache::CACHE_VERSION,
                )
            }
        }
    }

    /// Unique project names known to the catalog.
    pub fn repositories(&self) -> std::collections::BTreeSet<String> {
        let catalog = self.catalog.read().unwrap_or_else(|e| e.into_inner());
        catalog.repositories()
    }

    /// Drop all derived state and re-ingest the whole corpus.
    pub fn rebuild(&self) -> Result<RefreshReport, RecollectError> {
        self.index.wipe();
        {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.clear();
        }
        {
            let mut catalog = self.catalog.write().unwrap_or_else(|e| e.into_inner());
            *catalog = Catalog::new(self.root.clone());
        }
        self.refresh(None)
    }

    /// Clean-shutdown flush: persist the index and the analytics cache.
    pub fn shutdown(&self) -> Result<(), RecollectError> {
        self.index.persist()?;
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .save()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;

    fn write_jsonl(root: &Path, rel: &str, lines: &[&str]) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, lines.join("\n")).unwrap();
    }

    fn user_line(text: &str, ts: &str) -> String {
        format!(
            r#"{{"type":"user","timestamp":"{ts}","message":{{"role":"user","content":"{text}"}}}}"#
        )
    }

    #[test]
    fn test_refresh_then_search() {
        let dir = tempfile::tempdir().unwrap();
        write_jsonl(
            dir.path(),
            "projA/conv1.jsonl",
            &[&user_line("How do I use typescript?", "2025-09-29T10:00:00Z")],
        );

        let engine = Engine::new(EngineOptions::ephemeral(dir.path().to_path_buf()));
        let report = engine.refresh(None).unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.ingested, 1);

        let response = engine.search(&SearchRequest::new("typescript"));
        assert_eq!(response.total, 1);
        assert_eq!(response.hits[0].project, "projA");
        assert!(response.hits[0].matches >= 1);
        assert!(!response.timed_out);
    }

    #[test]
    fn test_second_refresh_skips_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        write_jsonl(
            dir.path(),
            "projA/conv1.jsonl",
            &[&user_line("stable content", "2025-09-29T10:00:00Z")],
        );

        let engine = Engine::new(EngineOptions::ephemeral(dir.path().to_path_buf()));
        engine.refresh(None).unwrap();

        let report = engine.refresh(None).unwrap();
        assert_eq!(report.added, 0);
        assert_eq!(report.updated, 0);
        assert_eq!(report.ingested, 0);
    }

    #[test]
    fn test_modify_one_reingests_one() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            write_jsonl(
                dir.path(),
                &format!("proj/conv{i}.jsonl"),
                &[&user_line("original text", "2025-09-29T10:00:00Z")],
            );
        }

        let engine = Engine::new(EngineOptions::ephemeral(dir.path().to_path_buf()));
        engine.refresh(None).unwrap();

        write_jsonl(
            dir.path(),
            "proj/conv3.jsonl",
            &[&user_line("zanzibar appears here now", "2025-09-29T11:00:00Z")],
        );
        let report = engine.refresh(None).unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.ingested, 1);

        let response = engine.search(&SearchRequest::new("zanzibar"));
        assert_eq!(response.total, 1);
        assert!(response.hits[0].path.ends_with("conv3.jsonl"));
    }

    #[test]
    fn test_removed_conversation_leaves_search() {
        let dir = tempfile::tempdir().unwrap();
        write_jsonl(
            dir.path(),
            "proj/gone.jsonl",
            &[&user_line("ephemeral marker word", "2025-09-29T10:00:00Z")],
        );

        let engine = Engine::new(EngineOptions::ephemeral(dir.path().to_path_buf()));
        engine.refresh(None).unwrap();
        assert_eq!(engine.search(&SearchRequest::new("ephemeral")).total, 1);

        fs::remove_file(dir.path().join("proj/gone.jsonl")).unwrap();
        let report = engine.refresh(None).unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(engine.search(&SearchRequest::new("ephemeral")).total, 0);
    }

    #[test]
    fn test_cancelled_refresh_reports_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        write_jsonl(
            dir.path(),
            "proj/a.jsonl",
            &[&user_line("content", "2025-09-29T10:00:00Z")],
        );

        let engine = Engine::new(EngineOptions::ephemeral(dir.path().to_path_buf()));
        let cancel = AtomicBool::new(true);
        let report = engine.refresh(Some(&cancel)).unwrap();
        assert!(report.cancelled);
    }

    #[test]
    fn test_analytics_snapshot_after_refresh() {
        let dir = tempfile::tempdir().unwrap();
        write_jsonl(
            dir.path(),
            "proj/a.jsonl",
            &[
                &user_line("hello", "2025-09-29T10:00:00Z"),
                r#"{"type":"assistant","timestamp":"2025-09-29T10:01:00Z","message":{"role":"assistant","content":[{"type":"text","text":"hi\n```ts\nconsole.log(1)\n```"}]}}"#,
            ],
        );

        let engine = Engine::new(EngineOptions::ephemeral(dir.path().to_path_buf()));
        engine.refresh(None).unwrap();

        let snapshot = engine.analytics(None);
        let overview = snapshot.overview.unwrap();
        assert_eq!(overview.total_conversations, 1);
        assert_eq!(overview.total_messages, 2);
        let content = snapshot.content_analysis.unwrap();
        assert_eq!(content.languages.get("ts"), Some(&1));
        assert_eq!(content.total_code_blocks, 1);
    }

    #[test]
    fn test_scoped_analytics_excludes_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        write_jsonl(
            dir.path(),
            "proj/a.jsonl",
            &[
                &user_line("early message", "2025-01-05T10:00:00Z"),
                &user_line("late message", "2025-09-29T10:00:00Z"),
            ],
        );

        let engine = Engine::new(EngineOptions::ephemeral(dir.path().to_path_buf()));
        engine.refresh(None).unwrap();

        let scope = DateRange {
            from: Some("2025-09-01T00:00:00Z".parse().unwrap()),
            to: Some("2025-09-30T23:59:59Z".parse().unwrap()),
        };
        let snapshot = engine.analytics(Some(scope));
        assert_eq!(snapshot.overview.unwrap().total_messages, 1);
    }

    #[test]
    fn test_repositories() {
        let dir = tempfile::tempdir().unwrap();
        write_jsonl(
            dir.path(),
            "alpha/a.jsonl",
            &[&user_line("x", "2025-09-29T10:00:00Z")],
        );
        write_jsonl(
            dir.path(),
            "beta/b.jsonl",
            &[&user_line("y", "2025-09-29T10:00:00Z")],
        );

        let engine = Engine::new(EngineOptions::ephemeral(dir.path().to_path_buf()));
        engine.refresh(None).unwrap();
        let repos: Vec<String> = engine.repositories().into_iter().collect();
        assert_eq!(repos, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_persistent_engine_survives_restart() {
        let corpus = tempfile::tempdir().unwrap();
        let state = tempfile::tempdir().unwrap();
        write_jsonl(
            corpus.path(),
            "proj/a.jsonl",
            &[&user_line("durable content here", "2025-09-29T10:00:00Z")],
        );

        let options = || EngineOptions {
            root: corpus.path().to_path_buf(),
            index_path: Some(state.path().join("index.bin")),
            cache_path: Some(state.path().join("analytics.json")),
            flush_interval: std::time::Duration::from_secs(30),
            rebuild_threshold: 0.25,
        };

        {
            let engine = Engine::new(options());
            engine.refresh(None).unwrap();
            engine.shutdown().unwrap();
        }

        let engine = Engine::new(options());
        assert!(!engine.index_recovered());
        // A refresh on the restarted engine re-parses but does not rewrite
        // unchanged postings.
        let report = engine.refresh(None).unwrap();
        assert_eq!(report.ingested, 0);
        assert_eq!(report.unchanged, 1);
        assert_eq!(engine.search(&SearchRequest::new("durable")).total, 1);
    }
}

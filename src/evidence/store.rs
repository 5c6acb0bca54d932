//! Per-run evidence storage with content-hash deduplication.
//!
//! Each run gets its own scope behind its own lock; the global map is only
//! locked long enough to find (or create) a scope. Within a scope:
//!
//! - a content hash maps to exactly one handle for the life of the run, even
//!   after the item is pruned, so re-submitting pruned content restores the
//!   original handle;
//! - handles are allocated sequentially from 1 and never reassigned.

use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::rank::{EvidenceScorer, WeightedScorer};
use super::{content_hash, normalize_text, CitationHandle, EvidenceItem, RawResult};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EvidenceError {
    #[error("evidence store for run is full ({cap} items)")]
    StorageFull { cap: usize },
    #[error("unknown run: {0}")]
    UnknownRun(String),
    #[error("result from {adapter} has no text")]
    EmptyContent { adapter: String },
}

#[derive(Default)]
struct RunEvidence {
    items: BTreeMap<CitationHandle, EvidenceItem>,
    /// Includes hashes of pruned items.
    by_hash: HashMap<String, CitationHandle>,
    next_handle: u32,
}

impl RunEvidence {
    fn allocate(&mut self) -> CitationHandle {
        self.next_handle += 1;
        CitationHandle(self.next_handle)
    }
}

pub struct EvidenceStore {
    runs: Mutex<HashMap<String, Arc<Mutex<RunEvidence>>>>,
    max_items: usize,
    scorer: Arc<dyn EvidenceScorer>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Scope state stays consistent across a panic: every mutation is a single
    // map insert or remove.
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EvidenceStore {
    pub fn new(max_items: usize) -> Self {
        Self::with_scorer(max_items, Arc::new(WeightedScorer::default()))
    }

    pub fn with_scorer(max_items: usize, scorer: Arc<dyn EvidenceScorer>) -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            max_items: max_items.max(1),
            scorer,
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_items
    }

    /// Create the scope for a run. Opening an existing run is a no-op.
    pub fn open_run(&self, run_id: &str) {
        lock(&self.runs).entry(run_id.to_string()).or_default();
    }

    /// Drop a run's scope and everything in it.
    pub fn release(&self, run_id: &str) {
        lock(&self.runs).remove(run_id);
    }

    fn scope(&self, run_id: &str) -> Result<Arc<Mutex<RunEvidence>>, EvidenceError> {
        lock(&self.runs)
            .get(run_id)
            .cloned()
            .ok_or_else(|| EvidenceError::UnknownRun(run_id.to_string()))
    }

    /// Score a raw result as `submit` would, without storing it.
    pub fn score_raw(&self, raw: &RawResult) -> f64 {
        self.scorer.score(raw, Utc::now())
    }

    /// Store a result and return its handle.
    ///
    /// Known content returns the existing handle and keeps the higher score.
    /// Content pruned earlier comes back under its original handle.
    pub fn submit(&self, run_id: &str, raw: RawResult) -> Result<CitationHandle, EvidenceError> {
        if normalize_text(&raw.text).is_empty() {
            return Err(EvidenceError::EmptyContent {
                adapter: raw.adapter,
            });
        }

        let scope = self.scope(run_id)?;
        let mut run = lock(&scope);

        let now = Utc::now();
        let hash = content_hash(&raw.text);
        let score = self.scorer.score(&raw, now);

        let known = run.by_hash.get(&hash).copied();
        if let Some(handle) = known {
            if let Some(item) = run.items.get_mut(&handle) {
                item.score = item.score.max(score);
                tracing::trace!(run_id, %handle, "duplicate evidence merged");
                return Ok(handle);
            }
        }

        if run.items.len() >= self.max_items {
            return Err(EvidenceError::StorageFull {
                cap: self.max_items,
            });
        }

        let handle = match known {
            Some(handle) => {
                tracing::debug!(run_id, %handle, "pruned evidence re-admitted");
                handle
            }
            None => {
                let handle = run.allocate();
                run.by_hash.insert(hash.clone(), handle);
                handle
            }
        };

        run.items.insert(
            handle,
            EvidenceItem {
                handle,
                source_id: raw.source_id,
                title: raw.title,
                text: raw.text,
                retrieved_at: now,
                adapter: raw.adapter,
                confidence: raw.confidence,
                content_hash: hash,
                score,
            },
        );
        Ok(handle)
    }

    pub fn get(&self, run_id: &str, handle: CitationHandle) -> Option<EvidenceItem> {
        let scope = self.scope(run_id).ok()?;
        let run = lock(&scope);
        run.items.get(&handle).cloned()
    }

    /// Every live item, ordered by handle.
    pub fn snapshot(&self, run_id: &str) -> Vec<EvidenceItem> {
        match self.scope(run_id) {
            Ok(scope) => lock(&scope).items.values().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self, run_id: &str) -> usize {
        self.scope(run_id)
            .map(|scope| lock(&scope).items.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, run_id: &str) -> bool {
        self.len(run_id) == 0
    }

    /// Highest-scoring `k` items; ties go to the older handle.
    pub fn top_k(&self, run_id: &str, k: usize) -> Vec<EvidenceItem> {
        let mut items = self.snapshot(run_id);
        items.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.handle.cmp(&b.handle)));
        items.truncate(k);
        items
    }

    pub fn lowest_score(&self, run_id: &str) -> Option<f64> {
        let scope = self.scope(run_id).ok()?;
        let run = lock(&scope);
        run.items.values().map(|i| i.score).min_by(f64::total_cmp)
    }

    /// Remove up to `n` lowest-scoring items not in `protected`. Their hashes
    /// keep their handles for re-admission. Returns the pruned handles.
    pub fn prune_lowest(
        &self,
        run_id: &str,
        n: usize,
        protected: &[CitationHandle],
    ) -> Vec<CitationHandle> {
        let Ok(scope) = self.scope(run_id) else {
            return Vec::new();
        };
        let mut run = lock(&scope);

        let mut candidates: Vec<(CitationHandle, f64)> = run
            .items
            .values()
            .filter(|i| !protected.contains(&i.handle))
            .map(|i| (i.handle, i.score))
            .collect();
        // Lowest score first; among equals the newest goes first.
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)));

        let pruned: Vec<CitationHandle> = candidates.into_iter().take(n).map(|(h, _)| h).collect();
        for handle in &pruned {
            run.items.remove(handle);
        }
        if !pruned.is_empty() {
            tracing::debug!(run_id, count = pruned.len(), "evidence pruned");
        }
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn raw(text: &str, confidence: f64) -> RawResult {
        RawResult::new("test", format!("https://example.org/{}", text.len()), text, confidence)
    }

    fn store(cap: usize) -> EvidenceStore {
        let store = EvidenceStore::new(cap);
        store.open_run("run");
        store
    }

    #[test]
    fn handles_start_at_one_and_increase() {
        let store = store(10);
        assert_eq!(store.submit("run", raw("alpha", 0.5)).unwrap(), CitationHandle(1));
        assert_eq!(store.submit("run", raw("beta", 0.5)).unwrap(), CitationHandle(2));
    }

    #[test]
    fn duplicate_content_reuses_handle_and_keeps_max_score() {
        let store = store(10);
        let first = store.submit("run", raw("Paris is the capital", 0.2)).unwrap();
        let again = store.submit("run", raw("paris  IS the capital", 0.9)).unwrap();

        assert_eq!(first, again);
        assert_eq!(store.len("run"), 1);
        let item = store.get("run", first).unwrap();
        assert_eq!(item.score, store.score_raw(&raw("paris  IS the capital", 0.9)));
        assert_eq!(item.text, "Paris is the capital");
    }

    #[test]
    fn full_store_rejects_new_content() {
        let store = store(2);
        store.submit("run", raw("a", 0.5)).unwrap();
        store.submit("run", raw("b", 0.5)).unwrap();

        assert_eq!(
            store.submit("run", raw("c", 0.5)).unwrap_err(),
            EvidenceError::StorageFull { cap: 2 }
        );
        // Known content is still accepted when full.
        assert!(store.submit("run", raw("a", 0.9)).is_ok());
    }

    #[test]
    fn pruned_content_returns_under_original_handle() {
        let store = store(2);
        let low = store.submit("run", raw("low", 0.1)).unwrap();
        let high = store.submit("run", raw("high value text", 0.9)).unwrap();

        assert_eq!(store.prune_lowest("run", 1, &[]), vec![low]);
        assert!(store.get("run", low).is_none());

        let third = store.submit("run", raw("third", 0.5)).unwrap();
        assert_eq!(third, CitationHandle(3));

        store.prune_lowest("run", 1, &[high]);
        let back = store.submit("run", raw("low", 0.1)).unwrap();
        assert_eq!(back, low);
    }

    #[test]
    fn prune_respects_protected_handles() {
        let store = store(5);
        let low = store.submit("run", raw("low", 0.1)).unwrap();
        let mid = store.submit("run", raw("mid", 0.5)).unwrap();

        assert_eq!(store.prune_lowest("run", 1, &[low]), vec![mid]);
    }

    #[test]
    fn top_k_orders_by_score() {
        let store = store(5);
        store.submit("run", raw("one", 0.1)).unwrap();
        let best = store.submit("run", raw("two", 0.9)).unwrap();
        store.submit("run", raw("three", 0.5)).unwrap();

        let top = store.top_k("run", 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].handle, best);
        assert!(top[0].score >= top[1].score);
    }

    #[test]
    fn runs_are_isolated() {
        let store = store(5);
        store.open_run("other");
        store.submit("run", raw("shared", 0.5)).unwrap();
        let h = store.submit("other", raw("different", 0.5)).unwrap();

        assert_eq!(h, CitationHandle(1));
        assert_eq!(store.snapshot("other").len(), 1);

        store.release("other");
        assert!(matches!(
            store.submit("other", raw("x", 0.5)),
            Err(EvidenceError::UnknownRun(_))
        ));
        assert_eq!(store.len("run"), 1);
    }

    #[test]
    fn empty_text_rejected() {
        let store = store(5);
        assert!(matches!(
            store.submit("run", raw("  \n ", 0.5)),
            Err(EvidenceError::EmptyContent { .. })
        ));
    }

    proptest! {
        #[test]
        fn same_normalized_content_same_handle(
            words in proptest::collection::vec("[a-zA-Z]{1,8}", 1..6),
            others in proptest::collection::vec("[a-z]{1,8}", 0..6),
        ) {
            let store = store(64);
            let text = words.join(" ");
            let first = store.submit("run", raw(&text, 0.5)).unwrap();
            for other in &others {
                let _ = store.submit("run", raw(other, 0.5));
            }
            let variant = format!("  {}  ", words.join("\n\t").to_uppercase());
            let second = store.submit("run", raw(&variant, 0.3)).unwrap();
            prop_assert_eq!(first, second);

            let hashes: std::collections::HashSet<_> =
                store.snapshot("run").into_iter().map(|i| i.content_hash).collect();
            prop_assert_eq!(hashes.len(), store.len("run"));
        }
    }
}

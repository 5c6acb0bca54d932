//! Concurrent fan-out to retrieval adapters.
//!
//! [`RetrievalDispatcher::fetch`] never fails. Adapters that error, time out,
//! or are still running at the overall deadline contribute no results and are
//! reported in [`FetchOutcome::degraded`].

pub mod adapter;
pub mod duckduckgo;
pub mod rate_limit;
pub mod scrape;
pub mod wikipedia;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RetrievalConfig;
use crate::evidence::{content_hash, RawResult};
pub use adapter::{build_adapters, AdapterError, RetrievalAdapter};
use rate_limit::RateLimiter;

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub query: String,
    /// Restrict to these adapter names; `None` means all registered adapters.
    pub adapters: Option<Vec<String>>,
    pub deadline: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeKind {
    Timeout,
    Error,
}

/// An adapter that contributed nothing to a fetch, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedAdapter {
    pub adapter: String,
    pub kind: DegradeKind,
    pub detail: String,
}

impl std::fmt::Display for DegradedAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            DegradeKind::Timeout => "timeout",
            DegradeKind::Error => "error",
        };
        write!(f, "{} ({kind}: {})", self.adapter, self.detail)
    }
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Merged results, highest confidence first.
    pub results: Vec<RawResult>,
    pub degraded: Vec<DegradedAdapter>,
    pub cancelled: bool,
}

struct AdapterSlot {
    adapter: Arc<dyn RetrievalAdapter>,
    limiter: RateLimiter,
}

pub struct RetrievalDispatcher {
    slots: Vec<AdapterSlot>,
    adapter_timeout: Duration,
    max_results_per_adapter: usize,
}

impl RetrievalDispatcher {
    pub fn new(adapters: Vec<Arc<dyn RetrievalAdapter>>, config: &RetrievalConfig) -> Self {
        let slots = adapters
            .into_iter()
            .map(|adapter| AdapterSlot {
                adapter,
                limiter: RateLimiter::new(config.min_interval()),
            })
            .collect();
        Self {
            slots,
            adapter_timeout: config.adapter_timeout(),
            max_results_per_adapter: config.max_results_per_adapter.max(1),
        }
    }

    pub fn adapter_names(&self) -> Vec<&str> {
        self.slots.iter().map(|s| s.adapter.name()).collect()
    }

    /// Query the selected adapters concurrently and merge what arrives in time.
    pub async fn fetch(&self, request: FetchRequest, cancel: &CancellationToken) -> FetchOutcome {
        let mut outcome = FetchOutcome::default();

        let selected: Vec<&AdapterSlot> = match &request.adapters {
            None => self.slots.iter().collect(),
            Some(names) => {
                for name in names {
                    if !self.slots.iter().any(|s| s.adapter.name() == name) {
                        outcome.degraded.push(DegradedAdapter {
                            adapter: name.clone(),
                            kind: DegradeKind::Error,
                            detail: "adapter not registered".into(),
                        });
                    }
                }
                self.slots
                    .iter()
                    .filter(|s| names.iter().any(|n| n == s.adapter.name()))
                    .collect()
            }
        };

        let timeout = self.adapter_timeout;
        let query = request.query.as_str();
        let mut pending: BTreeSet<String> = BTreeSet::new();
        let mut calls = FuturesUnordered::new();
        for slot in selected {
            let name = slot.adapter.name().to_string();
            pending.insert(name.clone());
            calls.push(async move {
                slot.limiter.acquire().await;
                let result = tokio::time::timeout(timeout, slot.adapter.fetch(query, timeout)).await;
                (name, result)
            });
        }

        let mut per_adapter: Vec<Vec<RawResult>> = Vec::new();
        let deadline = tokio::time::sleep_until(request.deadline);
        tokio::pin!(deadline);

        while !calls.is_empty() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    outcome.cancelled = true;
                    break;
                }
                _ = &mut deadline => break,
                Some((name, result)) = calls.next() => {
                    pending.remove(&name);
                    match result {
                        Ok(Ok(mut results)) => {
                            results.retain(|r| !r.text.trim().is_empty());
                            results.truncate(self.max_results_per_adapter);
                            tracing::debug!(adapter = %name, count = results.len(), "adapter returned");
                            per_adapter.push(results);
                        }
                        Ok(Err(e)) => {
                            tracing::warn!(adapter = %name, error = %e, "adapter failed");
                            let kind = if e.is_timeout() { DegradeKind::Timeout } else { DegradeKind::Error };
                            outcome.degraded.push(DegradedAdapter { adapter: name, kind, detail: e.to_string() });
                        }
                        Err(_) => {
                            tracing::warn!(adapter = %name, timeout_ms = timeout.as_millis() as u64, "adapter timed out");
                            outcome.degraded.push(DegradedAdapter {
                                adapter: name,
                                kind: DegradeKind::Timeout,
                                detail: format!("no response within {}ms", timeout.as_millis()),
                            });
                        }
                    }
                }
            }
        }
        // Dropping the set cancels whatever is still in flight.
        drop(calls);

        if !outcome.cancelled {
            for name in pending {
                tracing::warn!(adapter = %name, "adapter still pending at fetch deadline");
                outcome.degraded.push(DegradedAdapter {
                    adapter: name,
                    kind: DegradeKind::Timeout,
                    detail: "still pending at fetch deadline".into(),
                });
            }
        }

        outcome.results = merge_results(per_adapter);
        outcome
    }
}

/// Flatten, collapse exact duplicates (keeping the higher confidence), and
/// order by confidence then text length, both descending.
pub fn merge_results(batches: Vec<Vec<RawResult>>) -> Vec<RawResult> {
    let mut by_hash: HashMap<String, RawResult> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for raw in batches.into_iter().flatten() {
        let hash = content_hash(&raw.text);
        match by_hash.get_mut(&hash) {
            Some(existing) => {
                if raw.confidence > existing.confidence {
                    *existing = raw;
                }
            }
            None => {
                order.push(hash.clone());
                by_hash.insert(hash, raw);
            }
        }
    }

    let mut merged: Vec<RawResult> = order
        .into_iter()
        .filter_map(|hash| by_hash.remove(&hash))
        .collect();
    merged.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| b.text.len().cmp(&a.text.len()))
    });
    merged
}

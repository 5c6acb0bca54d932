//! Evidence accumulated during a run.
//!
//! Retrieved snippets are normalized, hashed, and stored once per run under a
//! small citation handle. Reasoning steps and answers refer to evidence by
//! handle only; the store is the single owner of the text.

pub mod rank;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub use rank::{EvidenceScorer, WeightedScorer};
pub use store::{EvidenceError, EvidenceStore};

/// Per-run citation handle, rendered as `[n]`. Starts at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CitationHandle(pub u32);

impl std::fmt::Display for CitationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0)
    }
}

/// A result as returned by a retrieval adapter, before deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResult {
    /// URL or other stable source identifier.
    pub source_id: String,
    pub title: Option<String>,
    pub text: String,
    /// Adapter-reported confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    pub adapter: String,
    /// Publication time when the source reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl RawResult {
    pub fn new(
        adapter: impl Into<String>,
        source_id: impl Into<String>,
        text: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            title: None,
            text: text.into(),
            confidence,
            adapter: adapter.into(),
            published_at: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// A deduplicated, scored snippet owned by the evidence store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub handle: CitationHandle,
    pub source_id: String,
    pub title: Option<String>,
    pub text: String,
    pub retrieved_at: DateTime<Utc>,
    pub adapter: String,
    pub confidence: f64,
    /// SHA-256 hex of the normalized text.
    pub content_hash: String,
    pub score: f64,
}

/// Collapse whitespace and case-fold, so cosmetic differences hash the same.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(normalize_text(text).as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_renders_as_bracketed_number() {
        assert_eq!(CitationHandle(3).to_string(), "[3]");
    }

    #[test]
    fn hash_ignores_case_and_whitespace() {
        assert_eq!(
            content_hash("Paris is  the capital\nof France."),
            content_hash("  paris IS the capital of france. ")
        );
        assert_ne!(content_hash("Paris"), content_hash("Lyon"));
    }

    #[test]
    fn hash_is_hex_sha256() {
        let hash = content_hash("x");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

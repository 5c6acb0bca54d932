//! Memory type definitions.
//!
//! Defines [`MemoryScope`] (session vs. cross-session lifetime), [`MemoryRecord`]
//! (a full row), and [`EvictionPolicy`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifetime of a memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    /// Turn-by-turn notes for one session; removed when the session ends.
    ShortTerm,
    /// Topic records that persist across sessions until evicted or deleted.
    LongTerm,
}

impl MemoryScope {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::LongTerm => "long_term",
        }
    }
}

impl std::fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short_term" | "short" => Ok(Self::ShortTerm),
            "long_term" | "long" => Ok(Self::LongTerm),
            _ => Err(format!("unknown memory scope: {s}")),
        }
    }
}

/// A memory record, matching the `memories` table schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// UUID v7 (time-sortable) primary key.
    pub id: String,
    pub scope: MemoryScope,
    /// Topic key for long-term records, session id for short-term ones.
    pub key: String,
    /// Session that wrote the record, if any.
    pub session_id: Option<String>,
    /// Condensed text.
    pub value: String,
    pub created_at: DateTime<Utc>,
    /// Never moves backwards.
    pub last_accessed_at: DateTime<Utc>,
    /// Relevance in `[0.0, 1.0]`.
    pub relevance: f64,
    /// User-pinned records are promotable and exempt from LRU eviction.
    pub pinned: bool,
    /// Produced by consolidation; eligible for long-term promotion.
    pub consolidated: bool,
}

/// How [`super::MemoryManager::evict`] selects long-term records to remove.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Keep at most `capacity` unpinned long-term records, dropping the
    /// least recently accessed first.
    LeastRecentlyAccessed { capacity: usize },
    /// Explicit user deletion of one long-term topic.
    Key(String),
}

/// Derive the long-term topic key for a query: case-folded words with
/// punctuation stripped, joined by single spaces.
pub fn topic_key(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

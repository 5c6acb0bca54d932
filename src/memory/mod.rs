//! Short-term and long-term memory backed by SQLite.
//!
//! [`MemoryManager`] owns one connection behind a mutex. Individual operations
//! are single transactions; read-modify-write sequences that span more than one
//! lock acquisition (consolidation, reinforcement) also hold a per-key lock so
//! two of them never interleave on the same session or topic.
//!
//! All methods are synchronous. Async callers go through
//! `tokio::task::spawn_blocking`.

pub mod forget;
pub mod maintenance;
pub mod stats;
pub mod store;
pub mod types;

use anyhow::Result;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::MemoryConfig;
use maintenance::{ConcatSummarizer, ConsolidateResult, EvictResult, Summarizer};
use types::{EvictionPolicy, MemoryRecord, MemoryScope};

pub use forget::ForgetResult;
pub use stats::StatsResponse;
pub use store::WriteResult;
pub use types::topic_key;

type KeyLock = Arc<Mutex<()>>;

pub struct MemoryManager {
    conn: Arc<Mutex<Connection>>,
    key_locks: Mutex<HashMap<(MemoryScope, String), KeyLock>>,
    config: MemoryConfig,
    summarizer: Arc<dyn Summarizer>,
    db_path: Option<PathBuf>,
}

impl MemoryManager {
    pub fn new(conn: Connection, config: MemoryConfig) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            key_locks: Mutex::new(HashMap::new()),
            config,
            summarizer: Arc::new(ConcatSummarizer),
            db_path: None,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Record the on-disk location so `stats` can report the file size.
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Shared handle to the underlying connection (run archive, doctor).
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))
    }

    fn key_lock(&self, scope: MemoryScope, key: &str) -> Result<KeyLock> {
        let mut locks = self
            .key_locks
            .lock()
            .map_err(|e| anyhow::anyhow!("key lock table poisoned: {e}"))?;
        Ok(Arc::clone(
            locks.entry((scope, key.to_string())).or_default(),
        ))
    }

    /// Run `f` while holding the `(scope, key)` lock. The table entry is
    /// dropped again once no other caller holds it.
    fn with_key_lock<T>(
        &self,
        scope: MemoryScope,
        key: &str,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let key_lock = self.key_lock(scope, key)?;
        let result = match key_lock.lock() {
            Ok(_guard) => f(),
            Err(e) => Err(anyhow::anyhow!("{scope} lock for {key} poisoned: {e}")),
        };
        drop(key_lock);

        if let Ok(mut locks) = self.key_locks.lock() {
            let entry = (scope, key.to_string());
            if locks.get(&entry).is_some_and(|l| Arc::strong_count(l) == 1) {
                locks.remove(&entry);
            }
        }
        result
    }

    #[cfg(test)]
    fn key_lock_count(&self) -> usize {
        self.key_locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Most recently written record for `(scope, key)`; bumps its access time.
    pub fn read(&self, scope: MemoryScope, key: &str) -> Result<Option<MemoryRecord>> {
        let conn = self.lock_conn()?;
        store::read_memory(&conn, scope, key)
    }

    /// Append (short-term) or upsert (long-term) a record. A new long-term
    /// topic may push the oldest unpinned topic out.
    pub fn write(
        &self,
        scope: MemoryScope,
        key: &str,
        session_id: Option<&str>,
        text: &str,
    ) -> Result<WriteResult> {
        let mut conn = self.lock_conn()?;
        let result = store::write_memory(&mut conn, scope, key, session_id, text)?;
        drop(conn);
        tracing::debug!(id = %result.id, %scope, key, created = result.created, "memory written");
        if scope == MemoryScope::LongTerm && result.created {
            self.enforce_capacity()?;
        }
        Ok(result)
    }

    pub fn get(&self, id: &str) -> Result<Option<MemoryRecord>> {
        let conn = self.lock_conn()?;
        store::get_record(&conn, id)
    }

    pub fn list(
        &self,
        scope: Option<MemoryScope>,
        key: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let conn = self.lock_conn()?;
        store::list_records(&conn, scope, key, limit)
    }

    pub fn short_term_count(&self, session_id: &str) -> Result<usize> {
        let conn = self.lock_conn()?;
        store::short_term_count(&conn, session_id)
    }

    /// Fold a session's short-term records into one consolidated record once
    /// the session exceeds the configured threshold.
    ///
    /// The connection lock is released while the summarizer runs; the session
    /// key lock keeps concurrent consolidations of the same session apart.
    pub fn consolidate(&self, session_id: &str) -> Result<ConsolidateResult> {
        self.with_key_lock(MemoryScope::ShortTerm, session_id, || {
            self.consolidate_locked(session_id)
        })
    }

    fn consolidate_locked(&self, session_id: &str) -> Result<ConsolidateResult> {
        let plan = {
            let conn = self.lock_conn()?;
            maintenance::consolidation_plan(&conn, session_id, self.config.short_term_threshold)?
        };
        let Some((kept, folded)) = plan else {
            return Ok(ConsolidateResult::noop());
        };

        let summary = self
            .summarizer
            .summarize(&folded, self.config.summary_max_chars)?;

        let mut conn = self.lock_conn()?;
        maintenance::apply_consolidation(&mut conn, session_id, &kept, &folded, &summary)
    }

    pub fn evict(&self, policy: &EvictionPolicy) -> Result<EvictResult> {
        let mut conn = self.lock_conn()?;
        maintenance::evict(&mut conn, policy)
    }

    /// LRU eviction down to the configured long-term capacity.
    pub fn enforce_capacity(&self) -> Result<EvictResult> {
        self.evict(&EvictionPolicy::LeastRecentlyAccessed {
            capacity: self.config.long_term_capacity,
        })
    }

    pub fn pin(&self, id: &str) -> Result<MemoryRecord> {
        let mut conn = self.lock_conn()?;
        maintenance::pin_record(&mut conn, id)
    }

    /// Promote a consolidated or pinned short-term record to long-term `key`.
    pub fn promote(&self, id: &str, key: &str) -> Result<MemoryRecord> {
        let record = self.with_key_lock(MemoryScope::LongTerm, key, || {
            let mut conn = self.lock_conn()?;
            maintenance::promote_record(&mut conn, id, key)
        })?;
        self.enforce_capacity()?;
        Ok(record)
    }

    /// Refresh a long-term topic that already exists. Never creates one.
    pub fn reinforce(&self, key: &str, text: &str) -> Result<Option<MemoryRecord>> {
        self.with_key_lock(MemoryScope::LongTerm, key, || {
            let mut conn = self.lock_conn()?;
            maintenance::reinforce_topic(&mut conn, key, text, self.config.reinforce_boost)
        })
    }

    pub fn delete(&self, id: &str, reason: Option<&str>) -> Result<ForgetResult> {
        let mut conn = self.lock_conn()?;
        forget::forget_memory(&mut conn, id, reason)
    }

    /// Drop the session's short-term records.
    pub fn end_session(&self, session_id: &str) -> Result<usize> {
        let mut conn = self.lock_conn()?;
        let removed = maintenance::end_session(&mut conn, session_id)?;
        tracing::debug!(session_id, removed, "session memory released");
        Ok(removed)
    }

    /// Delete every record in `scope`, or all records when `scope` is `None`.
    pub fn wipe(&self, scope: Option<MemoryScope>) -> Result<usize> {
        let mut conn = self.lock_conn()?;
        maintenance::wipe(&mut conn, scope)
    }

    /// Bounded memory context for a reasoning step: the long-term record for
    /// the topic (if any) followed by the session's latest short-term notes.
    pub fn excerpt(&self, session_id: &str, topic: &str) -> Result<String> {
        let max_chars = self.config.excerpt_chars;
        let conn = self.lock_conn()?;

        let mut parts = Vec::new();
        let key = topic_key(topic);
        if !key.is_empty() {
            if let Some(record) = store::read_memory(&conn, MemoryScope::LongTerm, &key)? {
                parts.push(format!("Known about \"{}\": {}", record.key, record.value));
            }
        }
        let notes = store::session_records(&conn, session_id)?;
        for record in notes.iter().rev() {
            parts.push(format!("Earlier in this session: {}", record.value));
        }
        drop(conn);

        let mut excerpt = String::new();
        for part in parts {
            let sep = if excerpt.is_empty() { 0 } else { 1 };
            if excerpt.len() + sep + part.len() > max_chars {
                if excerpt.is_empty() {
                    excerpt = maintenance::truncate(&part, max_chars.saturating_sub(3));
                }
                break;
            }
            if sep == 1 {
                excerpt.push('\n');
            }
            excerpt.push_str(&part);
        }
        Ok(excerpt)
    }

    pub fn stats(&self) -> Result<StatsResponse> {
        let conn = self.lock_conn()?;
        stats::memory_stats(&conn, self.db_path.as_deref())
    }
}

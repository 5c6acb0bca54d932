use anyhow::{bail, Result};
use chrono::Utc;
use rusqlite::{params, Connection};
use serde::Serialize;

use super::store::{
    get_record, insert_record, long_term_id, session_records, touch, write_audit_log,
    DEFAULT_RELEVANCE,
};
use super::types::{EvictionPolicy, MemoryRecord, MemoryScope};
use crate::db::format_timestamp;

// ── Result types ─────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ConsolidateResult {
    /// Number of records folded into the summary (and deleted).
    pub records_consolidated: usize,
    pub summary_id: Option<String>,
    /// Most recently accessed record, kept verbatim.
    pub kept_id: Option<String>,
}

impl ConsolidateResult {
    pub(crate) fn noop() -> Self {
        Self {
            records_consolidated: 0,
            summary_id: None,
            kept_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EvictResult {
    pub evicted: Vec<String>,
}

// ── Summarization ────────────────────────────────────────────────────────────

/// Compresses a batch of short-term records into one denser text.
///
/// Synchronous like the rest of the memory layer; async callers go through
/// `spawn_blocking`.
pub trait Summarizer: Send + Sync {
    fn summarize(&self, records: &[MemoryRecord], max_chars: usize) -> Result<String>;
}

/// Default summarizer: one bullet per record, oldest first, bounded length.
#[derive(Debug, Default, Clone)]
pub struct ConcatSummarizer;

impl Summarizer for ConcatSummarizer {
    fn summarize(&self, records: &[MemoryRecord], max_chars: usize) -> Result<String> {
        let combined = records
            .iter()
            .map(|r| format!("- {}", collapse_whitespace(&r.value)))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(truncate(&combined, max_chars))
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate content to max_chars, appending "..." if truncated.
pub(crate) fn truncate(content: &str, max_chars: usize) -> String {
    if content.len() <= max_chars {
        content.to_string()
    } else {
        let end = content
            .char_indices()
            .take_while(|(i, _)| *i < max_chars)
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(max_chars);
        format!("{}...", &content[..end])
    }
}

// ── Consolidation ────────────────────────────────────────────────────────────

/// Records a consolidation pass would fold, or `None` when the session is
/// within `threshold`. The most recently accessed record is split off.
pub fn consolidation_plan(
    conn: &Connection,
    session_id: &str,
    threshold: usize,
) -> Result<Option<(MemoryRecord, Vec<MemoryRecord>)>> {
    let mut records = session_records(conn, session_id)?;
    if records.len() <= threshold {
        return Ok(None);
    }

    // Latest access wins; creation time breaks ties.
    let keep_idx = records
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            a.last_accessed_at
                .cmp(&b.last_accessed_at)
                .then(a.created_at.cmp(&b.created_at))
        })
        .map(|(i, _)| i)
        .unwrap_or(0);
    let keep = records.remove(keep_idx);

    // Folding a single record into a summary would not shrink anything.
    if records.len() < 2 {
        return Ok(None);
    }
    Ok(Some((keep, records)))
}

/// Fold the given records into one consolidated short-term record and delete
/// the originals, in one transaction.
pub fn apply_consolidation(
    conn: &mut Connection,
    session_id: &str,
    kept: &MemoryRecord,
    folded: &[MemoryRecord],
    summary: &str,
) -> Result<ConsolidateResult> {
    let tx = conn.transaction()?;
    let now = Utc::now();

    let relevance = folded
        .iter()
        .map(|r| r.relevance)
        .fold(DEFAULT_RELEVANCE, f64::max);
    let summary_id = insert_record(
        &tx,
        MemoryScope::ShortTerm,
        session_id,
        Some(session_id),
        summary,
        relevance,
        true,
        &now,
    )?;

    // The summary must not outrank the kept record on access time.
    let last_access = folded
        .iter()
        .map(|r| r.last_accessed_at)
        .max()
        .unwrap_or(now)
        .min(kept.last_accessed_at);
    tx.execute(
        "UPDATE memories SET last_accessed_at = ?1 WHERE id = ?2",
        params![format_timestamp(&last_access), summary_id],
    )?;

    let mut deleted = 0;
    for record in folded {
        deleted += tx.execute("DELETE FROM memories WHERE id = ?1", params![record.id])?;
    }

    write_audit_log(
        &tx,
        "consolidate",
        &summary_id,
        Some(&serde_json::json!({
            "session_id": session_id,
            "source_count": deleted,
            "kept_id": kept.id,
        })),
    )?;
    tx.commit()?;

    tracing::info!(session_id, folded = deleted, summary_id = %summary_id, "short-term memory consolidated");

    Ok(ConsolidateResult {
        records_consolidated: deleted,
        summary_id: Some(summary_id),
        kept_id: Some(kept.id.clone()),
    })
}

/// Plan, summarize, and apply in one call.
#[cfg(test)]
fn consolidate_session(
    conn: &mut Connection,
    session_id: &str,
    threshold: usize,
    summarizer: &dyn Summarizer,
    max_chars: usize,
) -> Result<ConsolidateResult> {
    let Some((kept, folded)) = consolidation_plan(conn, session_id, threshold)? else {
        return Ok(ConsolidateResult::noop());
    };
    let summary = summarizer.summarize(&folded, max_chars)?;
    apply_consolidation(conn, session_id, &kept, &folded, &summary)
}

// ── Promotion, pinning, reinforcement ────────────────────────────────────────

/// Pin a record: it becomes promotable and exempt from LRU eviction.
pub fn pin_record(conn: &mut Connection, id: &str) -> Result<MemoryRecord> {
    let tx = conn.transaction()?;
    let rows = tx.execute("UPDATE memories SET pinned = 1 WHERE id = ?1", params![id])?;
    if rows == 0 {
        bail!("memory not found: {id}");
    }
    write_audit_log(&tx, "pin", id, None)?;
    tx.commit()?;

    get_record(conn, id)?.ok_or_else(|| anyhow::anyhow!("memory not found: {id}"))
}

/// Promote a consolidated or pinned short-term record into long-term memory
/// under `key`. An existing long-term record for the key is overwritten.
pub fn promote_record(conn: &mut Connection, id: &str, key: &str) -> Result<MemoryRecord> {
    anyhow::ensure!(!key.trim().is_empty(), "long-term key must not be empty");

    let Some(source) = get_record(conn, id)? else {
        bail!("memory not found: {id}");
    };
    if source.scope != MemoryScope::ShortTerm {
        bail!("memory {id} is already long-term");
    }
    if !(source.consolidated || source.pinned) {
        bail!("only consolidated or pinned records can be promoted");
    }

    let tx = conn.transaction()?;
    let now = Utc::now();
    let target_id = match long_term_id(&tx, key)? {
        Some(existing) => {
            tx.execute(
                "UPDATE memories SET value = ?1, relevance = MAX(relevance, ?2), \
                 pinned = MAX(pinned, ?3) WHERE id = ?4",
                params![source.value, source.relevance, source.pinned, existing],
            )?;
            touch(&tx, &existing, &now)?;
            existing
        }
        None => {
            let new_id = insert_record(
                &tx,
                MemoryScope::LongTerm,
                key,
                source.session_id.as_deref(),
                &source.value,
                source.relevance,
                source.consolidated,
                &now,
            )?;
            tx.execute(
                "UPDATE memories SET pinned = ?1 WHERE id = ?2",
                params![source.pinned, new_id],
            )?;
            new_id
        }
    };
    write_audit_log(
        &tx,
        "promote",
        &target_id,
        Some(&serde_json::json!({"source_id": id, "key": key})),
    )?;
    tx.commit()?;

    get_record(conn, &target_id)?.ok_or_else(|| anyhow::anyhow!("memory not found: {target_id}"))
}

/// Refresh an existing long-term topic with new content and a relevance
/// boost (capped at 1.0). Returns `None` when no record exists for the key.
pub fn reinforce_topic(
    conn: &mut Connection,
    key: &str,
    value: &str,
    boost: f64,
) -> Result<Option<MemoryRecord>> {
    let tx = conn.transaction()?;
    let Some(id) = long_term_id(&tx, key)? else {
        return Ok(None);
    };
    tx.execute(
        "UPDATE memories SET value = ?1, relevance = MIN(relevance + ?2, 1.0) WHERE id = ?3",
        params![value, boost.max(0.0), id],
    )?;
    touch(&tx, &id, &Utc::now())?;
    write_audit_log(
        &tx,
        "update",
        &id,
        Some(&serde_json::json!({"reason": "reinforce", "boost": boost})),
    )?;
    tx.commit()?;

    get_record(conn, &id)
}

// ── Eviction and session teardown ────────────────────────────────────────────

/// Apply a long-term eviction policy.
pub fn evict(conn: &mut Connection, policy: &EvictionPolicy) -> Result<EvictResult> {
    let tx = conn.transaction()?;

    let victims: Vec<String> = match policy {
        EvictionPolicy::LeastRecentlyAccessed { capacity } => {
            let total: i64 = tx.query_row(
                "SELECT COUNT(*) FROM memories WHERE scope = 'long_term'",
                [],
                |row| row.get(0),
            )?;
            let excess = (total as usize).saturating_sub(*capacity);
            if excess == 0 {
                Vec::new()
            } else {
                let mut stmt = tx.prepare(
                    "SELECT id FROM memories WHERE scope = 'long_term' AND pinned = 0 \
                     ORDER BY last_accessed_at ASC, rowid ASC LIMIT ?1",
                )?;
                let ids = stmt
                    .query_map(params![excess as i64], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                ids
            }
        }
        EvictionPolicy::Key(key) => long_term_id(&tx, key)?.into_iter().collect(),
    };

    for id in &victims {
        write_audit_log(
            &tx,
            "evict",
            id,
            Some(&serde_json::json!({"policy": format!("{policy:?}")})),
        )?;
        tx.execute("DELETE FROM memories WHERE id = ?1", params![id])?;
    }
    tx.commit()?;

    if !victims.is_empty() {
        tracing::info!(count = victims.len(), ?policy, "long-term memory evicted");
    }
    Ok(EvictResult { evicted: victims })
}

/// Drop every short-term record of a session. Returns the number removed.
pub fn end_session(conn: &mut Connection, session_id: &str) -> Result<usize> {
    let tx = conn.transaction()?;
    let removed = tx.execute(
        "DELETE FROM memories WHERE scope = 'short_term' AND session_id = ?1",
        params![session_id],
    )?;
    if removed > 0 {
        write_audit_log(
            &tx,
            "delete",
            &format!("session:{session_id}"),
            Some(&serde_json::json!({"reason": "session_end", "removed": removed})),
        )?;
    }
    tx.commit()?;
    Ok(removed)
}

/// Delete every record in `scope` (all scopes when `None`). The audit log
/// keeps one entry for the whole wipe.
pub fn wipe(conn: &mut Connection, scope: Option<MemoryScope>) -> Result<usize> {
    let tx = conn.transaction()?;
    let removed = match scope {
        Some(scope) => tx.execute(
            "DELETE FROM memories WHERE scope = ?1",
            params![scope.as_str()],
        )?,
        None => tx.execute("DELETE FROM memories", [])?,
    };
    let target = scope.map_or("all", |s| s.as_str());
    write_audit_log(
        &tx,
        "delete",
        &format!("wipe:{target}"),
        Some(&serde_json::json!({"reason": "wipe", "removed": removed})),
    )?;
    tx.commit()?;

    tracing::info!(scope = target, removed, "memory wiped");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::memory::store::{read_memory, short_term_count, write_memory};

    fn test_db() -> Connection {
        db::open_in_memory().unwrap()
    }

    fn note(conn: &mut Connection, session: &str, text: &str) -> String {
        write_memory(conn, MemoryScope::ShortTerm, session, Some(session), text)
            .unwrap()
            .id
    }

    /// Backdate a record's access time by `secs` seconds.
    fn age(conn: &Connection, id: &str, secs: i64) {
        let ts = format_timestamp(&(Utc::now() - chrono::Duration::seconds(secs)));
        conn.execute(
            "UPDATE memories SET last_accessed_at = ?1 WHERE id = ?2",
            params![ts, id],
        )
        .unwrap();
    }

    // ── Consolidation tests ──────────────────────────────────────────────────

    #[test]
    fn test_consolidate_below_threshold_is_noop() {
        let mut conn = test_db();
        note(&mut conn, "s", "one");
        note(&mut conn, "s", "two");

        let result = consolidate_session(&mut conn, "s", 3, &ConcatSummarizer, 1000).unwrap();
        assert_eq!(result, ConsolidateResult::noop());
        assert_eq!(short_term_count(&conn, "s").unwrap(), 2);
    }

    #[test]
    fn test_consolidate_keeps_most_recently_accessed() {
        let mut conn = test_db();
        let ids: Vec<String> = (0..5).map(|i| note(&mut conn, "s", &format!("turn {i}"))).collect();
        for (i, id) in ids.iter().enumerate() {
            age(&conn, id, 100 - i as i64);
        }
        // An old record that was just read is the most recently accessed one.
        touch(&conn, &ids[1], &Utc::now()).unwrap();

        let result = consolidate_session(&mut conn, "s", 3, &ConcatSummarizer, 1000).unwrap();

        assert_eq!(result.records_consolidated, 4);
        assert_eq!(result.kept_id.as_deref(), Some(ids[1].as_str()));
        assert_eq!(short_term_count(&conn, "s").unwrap(), 2);

        let kept = get_record(&conn, &ids[1]).unwrap().unwrap();
        assert_eq!(kept.value, "turn 1");

        let summary = get_record(&conn, result.summary_id.as_deref().unwrap())
            .unwrap()
            .unwrap();
        assert!(summary.consolidated);
        assert!(summary.value.contains("turn 0"));
        assert!(summary.value.contains("turn 4"));
        assert!(!summary.value.contains("turn 1"));
        assert!(summary.last_accessed_at <= kept.last_accessed_at);
    }

    #[test]
    fn test_consolidate_only_touches_own_session() {
        let mut conn = test_db();
        for i in 0..4 {
            note(&mut conn, "a", &format!("a{i}"));
        }
        note(&mut conn, "b", "b0");

        consolidate_session(&mut conn, "a", 2, &ConcatSummarizer, 1000).unwrap();
        assert_eq!(short_term_count(&conn, "b").unwrap(), 1);
    }

    #[test]
    fn test_concat_summarizer_truncates() {
        let mut conn = test_db();
        note(&mut conn, "s", &"x".repeat(50));
        let records = crate::memory::store::session_records(&conn, "s").unwrap();
        let summary = ConcatSummarizer.summarize(&records, 10).unwrap();
        assert!(summary.ends_with("..."));
        assert!(summary.len() <= 13);
    }

    // ── Promotion tests ──────────────────────────────────────────────────────

    #[test]
    fn test_promote_requires_consolidated_or_pinned() {
        let mut conn = test_db();
        let id = note(&mut conn, "s", "plain note");

        let err = promote_record(&mut conn, &id, "topic").unwrap_err();
        assert!(err.to_string().contains("consolidated or pinned"));

        pin_record(&mut conn, &id).unwrap();
        let promoted = promote_record(&mut conn, &id, "topic").unwrap();
        assert_eq!(promoted.scope, MemoryScope::LongTerm);
        assert_eq!(promoted.key, "topic");
        assert!(promoted.pinned);
    }

    #[test]
    fn test_promote_consolidated_summary() {
        let mut conn = test_db();
        for i in 0..4 {
            note(&mut conn, "s", &format!("fact {i}"));
        }
        let result = consolidate_session(&mut conn, "s", 2, &ConcatSummarizer, 1000).unwrap();
        let summary_id = result.summary_id.unwrap();

        let promoted = promote_record(&mut conn, &summary_id, "facts").unwrap();
        assert!(promoted.value.contains("fact 0"));
        let read = read_memory(&conn, MemoryScope::LongTerm, "facts").unwrap().unwrap();
        assert_eq!(read.id, promoted.id);
    }

    #[test]
    fn test_reinforce_caps_relevance() {
        let mut conn = test_db();
        write_memory(&mut conn, MemoryScope::LongTerm, "paris", None, "old").unwrap();

        let mut last = None;
        for _ in 0..10 {
            last = reinforce_topic(&mut conn, "paris", "new", 0.1).unwrap();
        }
        let record = last.unwrap();
        assert_eq!(record.value, "new");
        assert!((record.relevance - 1.0).abs() < 1e-9);

        assert!(reinforce_topic(&mut conn, "unknown", "x", 0.1).unwrap().is_none());
    }

    // ── Eviction tests ───────────────────────────────────────────────────────

    #[test]
    fn test_evict_least_recently_accessed() {
        let mut conn = test_db();
        let old = write_memory(&mut conn, MemoryScope::LongTerm, "old", None, "v").unwrap().id;
        let mid = write_memory(&mut conn, MemoryScope::LongTerm, "mid", None, "v").unwrap().id;
        let new = write_memory(&mut conn, MemoryScope::LongTerm, "new", None, "v").unwrap().id;
        age(&conn, &old, 300);
        age(&conn, &mid, 200);
        age(&conn, &new, 100);

        let result = evict(&mut conn, &EvictionPolicy::LeastRecentlyAccessed { capacity: 2 }).unwrap();
        assert_eq!(result.evicted, vec![old]);
        assert!(get_record(&conn, &mid).unwrap().is_some());
    }

    #[test]
    fn test_evict_skips_pinned() {
        let mut conn = test_db();
        let old = write_memory(&mut conn, MemoryScope::LongTerm, "old", None, "v").unwrap().id;
        let new = write_memory(&mut conn, MemoryScope::LongTerm, "new", None, "v").unwrap().id;
        age(&conn, &old, 300);
        pin_record(&mut conn, &old).unwrap();

        let result = evict(&mut conn, &EvictionPolicy::LeastRecentlyAccessed { capacity: 1 }).unwrap();
        assert_eq!(result.evicted, vec![new]);
    }

    #[test]
    fn test_evict_by_key() {
        let mut conn = test_db();
        write_memory(&mut conn, MemoryScope::LongTerm, "gone", None, "v").unwrap();

        let result = evict(&mut conn, &EvictionPolicy::Key("gone".into())).unwrap();
        assert_eq!(result.evicted.len(), 1);
        assert!(read_memory(&conn, MemoryScope::LongTerm, "gone").unwrap().is_none());
    }

    #[test]
    fn test_end_session_removes_short_term_only() {
        let mut conn = test_db();
        note(&mut conn, "s", "a");
        note(&mut conn, "s", "b");
        write_memory(&mut conn, MemoryScope::LongTerm, "topic", Some("s"), "kept").unwrap();

        assert_eq!(end_session(&mut conn, "s").unwrap(), 2);
        assert!(read_memory(&conn, MemoryScope::LongTerm, "topic").unwrap().is_some());
    }
}

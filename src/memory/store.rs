//! Read and write paths for memory records, plus audit logging.
//!
//! Short-term writes always append a new row keyed by session id. Long-term
//! writes upsert on the topic key. Every read bumps `last_accessed_at`, and the
//! bump uses `MAX(old, new)` so the column never moves backwards.

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::db::{format_timestamp, parse_timestamp};
use crate::memory::types::{MemoryRecord, MemoryScope};

/// Relevance assigned to freshly written records.
pub const DEFAULT_RELEVANCE: f64 = 0.5;

pub(crate) const RECORD_COLUMNS: &str = "id, scope, key, session_id, value, created_at, \
     last_accessed_at, relevance, pinned, consolidated";

/// Result returned from a write.
#[derive(Debug, Serialize)]
pub struct WriteResult {
    pub id: String,
    pub scope: MemoryScope,
    /// `false` when an existing long-term record for the key was updated.
    pub created: bool,
}

/// Raw row before timestamp and enum parsing.
pub(crate) struct MemoryRow {
    id: String,
    scope: String,
    key: String,
    session_id: Option<String>,
    value: String,
    created_at: String,
    last_accessed_at: String,
    relevance: f64,
    pinned: bool,
    consolidated: bool,
}

impl MemoryRow {
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            scope: row.get(1)?,
            key: row.get(2)?,
            session_id: row.get(3)?,
            value: row.get(4)?,
            created_at: row.get(5)?,
            last_accessed_at: row.get(6)?,
            relevance: row.get(7)?,
            pinned: row.get(8)?,
            consolidated: row.get(9)?,
        })
    }

    pub(crate) fn into_record(self) -> Result<MemoryRecord> {
        Ok(MemoryRecord {
            scope: self.scope.parse().map_err(anyhow::Error::msg)?,
            created_at: parse_timestamp(&self.created_at)?,
            last_accessed_at: parse_timestamp(&self.last_accessed_at)?,
            id: self.id,
            key: self.key,
            session_id: self.session_id,
            value: self.value,
            relevance: self.relevance,
            pinned: self.pinned,
            consolidated: self.consolidated,
        })
    }
}

/// Full write path: short-term append or long-term upsert, then audit log.
pub fn write_memory(
    conn: &mut Connection,
    scope: MemoryScope,
    key: &str,
    session_id: Option<&str>,
    value: &str,
) -> Result<WriteResult> {
    anyhow::ensure!(!key.trim().is_empty(), "memory key must not be empty");
    anyhow::ensure!(!value.trim().is_empty(), "memory value must not be empty");

    let tx = conn.transaction()?;
    let now = Utc::now();

    if scope == MemoryScope::LongTerm {
        if let Some(existing_id) = long_term_id(&tx, key)? {
            tx.execute(
                "UPDATE memories SET value = ?1, session_id = COALESCE(?2, session_id) WHERE id = ?3",
                params![value, session_id, existing_id],
            )?;
            touch(&tx, &existing_id, &now)?;
            write_audit_log(
                &tx,
                "update",
                &existing_id,
                Some(&serde_json::json!({"reason": "overwrite"})),
            )?;
            tx.commit()?;
            return Ok(WriteResult {
                id: existing_id,
                scope,
                created: false,
            });
        }
    }

    let id = insert_record(&tx, scope, key, session_id, value, DEFAULT_RELEVANCE, false, &now)?;
    write_audit_log(&tx, "create", &id, Some(&serde_json::json!({"scope": scope})))?;
    tx.commit()?;

    Ok(WriteResult {
        id,
        scope,
        created: true,
    })
}

/// Insert a new row and return its id.
#[allow(clippy::too_many_arguments)]
pub(crate) fn insert_record(
    conn: &Connection,
    scope: MemoryScope,
    key: &str,
    session_id: Option<&str>,
    value: &str,
    relevance: f64,
    consolidated: bool,
    now: &DateTime<Utc>,
) -> Result<String> {
    let id = uuid::Uuid::now_v7().to_string();
    let ts = format_timestamp(now);
    conn.execute(
        "INSERT INTO memories (id, scope, key, session_id, value, created_at, last_accessed_at, relevance, pinned, consolidated) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, 0, ?8)",
        params![
            id,
            scope.as_str(),
            key,
            session_id,
            value,
            ts,
            relevance.clamp(0.0, 1.0),
            consolidated,
        ],
    )?;
    Ok(id)
}

/// Most recently written record for `(scope, key)`, with its access time bumped.
pub fn read_memory(
    conn: &Connection,
    scope: MemoryScope,
    key: &str,
) -> Result<Option<MemoryRecord>> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM memories WHERE scope = ?1 AND key = ?2 \
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            params![scope.as_str(), key],
            |row| row.get(0),
        )
        .optional()?;

    match id {
        Some(id) => {
            touch(conn, &id, &Utc::now())?;
            get_record(conn, &id)
        }
        None => Ok(None),
    }
}

/// Fetch a record by id without touching it.
pub fn get_record(conn: &Connection, id: &str) -> Result<Option<MemoryRecord>> {
    let row = conn
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM memories WHERE id = ?1"),
            params![id],
            MemoryRow::from_row,
        )
        .optional()?;
    row.map(MemoryRow::into_record).transpose()
}

/// List records, newest first. `key` filters on the key column.
pub fn list_records(
    conn: &Connection,
    scope: Option<MemoryScope>,
    key: Option<&str>,
    limit: usize,
) -> Result<Vec<MemoryRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM memories \
         WHERE (?1 IS NULL OR scope = ?1) AND (?2 IS NULL OR key = ?2) \
         ORDER BY created_at DESC, rowid DESC LIMIT ?3"
    ))?;
    let rows = stmt
        .query_map(
            params![scope.map(|s| s.as_str()), key, limit as i64],
            MemoryRow::from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(MemoryRow::into_record).collect()
}

/// Short-term records written by one session, oldest first.
pub fn session_records(conn: &Connection, session_id: &str) -> Result<Vec<MemoryRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM memories \
         WHERE scope = 'short_term' AND session_id = ?1 \
         ORDER BY created_at ASC, rowid ASC"
    ))?;
    let rows = stmt
        .query_map(params![session_id], MemoryRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(MemoryRow::into_record).collect()
}

/// Count short-term records written by one session.
pub fn short_term_count(conn: &Connection, session_id: &str) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM memories WHERE scope = 'short_term' AND session_id = ?1",
        params![session_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Bump `last_accessed_at` without ever moving it backwards.
pub(crate) fn touch(conn: &Connection, id: &str, now: &DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE memories SET last_accessed_at = MAX(last_accessed_at, ?1) WHERE id = ?2",
        params![format_timestamp(now), id],
    )?;
    Ok(())
}

pub(crate) fn long_term_id(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT id FROM memories WHERE scope = 'long_term' AND key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

/// Write an entry to the memory_log audit table.
pub(crate) fn write_audit_log(
    conn: &Connection,
    operation: &str,
    memory_id: &str,
    details: Option<&serde_json::Value>,
) -> Result<()> {
    let now = format_timestamp(&Utc::now());
    let details_json = details.map(|d| d.to_string());
    conn.execute(
        "INSERT INTO memory_log (operation, memory_id, details, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![operation, memory_id, details_json, now],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_db() -> Connection {
        db::open_in_memory().unwrap()
    }

    #[test]
    fn test_short_term_writes_append() {
        let mut conn = test_db();
        let a = write_memory(&mut conn, MemoryScope::ShortTerm, "s1", Some("s1"), "first").unwrap();
        let b = write_memory(&mut conn, MemoryScope::ShortTerm, "s1", Some("s1"), "second").unwrap();

        assert!(a.created && b.created);
        assert_ne!(a.id, b.id);
        assert_eq!(short_term_count(&conn, "s1").unwrap(), 2);

        let latest = read_memory(&conn, MemoryScope::ShortTerm, "s1").unwrap().unwrap();
        assert_eq!(latest.value, "second");
    }

    #[test]
    fn test_long_term_writes_upsert() {
        let mut conn = test_db();
        let a = write_memory(&mut conn, MemoryScope::LongTerm, "rust", None, "v1").unwrap();
        let b = write_memory(&mut conn, MemoryScope::LongTerm, "rust", Some("s2"), "v2").unwrap();

        assert!(a.created);
        assert!(!b.created);
        assert_eq!(a.id, b.id);

        let record = read_memory(&conn, MemoryScope::LongTerm, "rust").unwrap().unwrap();
        assert_eq!(record.value, "v2");
        assert_eq!(record.session_id.as_deref(), Some("s2"));
    }

    #[test]
    fn test_read_missing_is_none() {
        let conn = test_db();
        assert!(read_memory(&conn, MemoryScope::LongTerm, "nothing").unwrap().is_none());
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let mut conn = test_db();
        let w = write_memory(&mut conn, MemoryScope::ShortTerm, "s1", Some("s1"), "note").unwrap();
        let before = get_record(&conn, &w.id).unwrap().unwrap().last_accessed_at;

        touch(&conn, &w.id, &(before - chrono::Duration::days(1))).unwrap();
        let after = get_record(&conn, &w.id).unwrap().unwrap().last_accessed_at;
        assert_eq!(after, before);

        let later = before + chrono::Duration::seconds(5);
        touch(&conn, &w.id, &later).unwrap();
        let bumped = get_record(&conn, &w.id).unwrap().unwrap().last_accessed_at;
        assert_eq!(bumped, later);
    }

    #[test]
    fn test_empty_value_rejected() {
        let mut conn = test_db();
        let err = write_memory(&mut conn, MemoryScope::ShortTerm, "s1", None, "   ").unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn test_audit_log_written() {
        let mut conn = test_db();
        let w = write_memory(&mut conn, MemoryScope::LongTerm, "k", None, "v").unwrap();

        let op: String = conn
            .query_row(
                "SELECT operation FROM memory_log WHERE memory_id = ?1",
                params![w.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(op, "create");
    }
}

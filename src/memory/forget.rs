//! Permanent deletion of individual memory records.

use anyhow::Result;
use rusqlite::{params, Connection};
use serde::Serialize;

use super::store::write_audit_log;

/// Result returned from a forget operation.
#[derive(Debug, Serialize)]
pub struct ForgetResult {
    /// ID of the forgotten memory.
    pub id: String,
    pub scope: String,
    pub key: String,
}

/// Remove a record by id. The audit entry is written before the row goes.
pub fn forget_memory(
    conn: &mut Connection,
    memory_id: &str,
    reason: Option<&str>,
) -> Result<ForgetResult> {
    let tx = conn.transaction()?;

    let (scope, key): (String, String) = tx
        .query_row(
            "SELECT scope, key FROM memories WHERE id = ?1",
            params![memory_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                anyhow::anyhow!("memory not found: {memory_id}")
            }
            other => anyhow::anyhow!("database error: {other}"),
        })?;

    let details = serde_json::json!({
        "reason": reason,
        "scope": scope,
        "key": key,
    });
    write_audit_log(&tx, "delete", memory_id, Some(&details))?;

    tx.execute("DELETE FROM memories WHERE id = ?1", params![memory_id])?;
    tx.commit()?;

    Ok(ForgetResult {
        id: memory_id.to_string(),
        scope,
        key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::memory::store;
    use crate::memory::types::MemoryScope;

    #[test]
    fn test_forget_removes_row() {
        let mut conn = db::open_in_memory().unwrap();
        let id = store::write_memory(&mut conn, MemoryScope::LongTerm, "topic", None, "value")
            .unwrap()
            .id;

        let result = forget_memory(&mut conn, &id, Some("stale")).unwrap();
        assert_eq!(result.key, "topic");
        assert_eq!(result.scope, "long_term");
        assert!(store::get_record(&conn, &id).unwrap().is_none());
    }

    #[test]
    fn test_forget_writes_audit_log() {
        let mut conn = db::open_in_memory().unwrap();
        let id = store::write_memory(&mut conn, MemoryScope::ShortTerm, "s", Some("s"), "note")
            .unwrap()
            .id;

        forget_memory(&mut conn, &id, Some("test reason")).unwrap();

        let details: String = conn
            .query_row(
                "SELECT details FROM memory_log WHERE memory_id = ?1 AND operation = 'delete'",
                params![id],
                |row| row.get(0),
            )
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&details).unwrap();
        assert_eq!(parsed["reason"], "test reason");
    }

    #[test]
    fn test_forget_missing_errors() {
        let mut conn = db::open_in_memory().unwrap();
        let err = forget_memory(&mut conn, "no-such-id", None).unwrap_err();
        assert!(err.to_string().contains("memory not found"));
    }
}

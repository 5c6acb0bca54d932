use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

/// Response from memory stats.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_memories: u64,
    pub short_term: u64,
    pub long_term: u64,
    pub pinned: u64,
    pub consolidated: u64,
    /// Short-term record count per session id.
    pub sessions: HashMap<String, u64>,
    pub archived_runs: u64,
    pub db_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_memory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_memory: Option<String>,
}

/// Compute memory store statistics.
///
/// `db_path` is used for file size calculation; pass None for in-memory databases.
pub fn memory_stats(conn: &Connection, db_path: Option<&Path>) -> Result<StatsResponse> {
    let count = |sql: &str| -> Result<u64> {
        let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
        Ok(n as u64)
    };

    let (oldest, newest): (Option<String>, Option<String>) = conn.query_row(
        "SELECT MIN(created_at), MAX(created_at) FROM memories",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let db_size_bytes = db_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(StatsResponse {
        total_memories: count("SELECT COUNT(*) FROM memories")?,
        short_term: count("SELECT COUNT(*) FROM memories WHERE scope = 'short_term'")?,
        long_term: count("SELECT COUNT(*) FROM memories WHERE scope = 'long_term'")?,
        pinned: count("SELECT COUNT(*) FROM memories WHERE pinned = 1")?,
        consolidated: count("SELECT COUNT(*) FROM memories WHERE consolidated = 1")?,
        sessions: count_by_session(conn)?,
        archived_runs: count("SELECT COUNT(*) FROM runs")?,
        db_size_bytes,
        oldest_memory: oldest,
        newest_memory: newest,
    })
}

fn count_by_session(conn: &Connection) -> Result<HashMap<String, u64>> {
    let mut stmt = conn.prepare(
        "SELECT session_id, COUNT(*) FROM memories \
         WHERE scope = 'short_term' AND session_id IS NOT NULL GROUP BY session_id",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().map(|(s, n)| (s, n as u64)).collect())
}

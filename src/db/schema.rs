//! SQL DDL for the memory tables.
//!
//! Defines `memories`, `memory_log`, and `schema_meta`. The run archive tables
//! arrive through migration v2 (see [`super::migrations`]). All DDL uses
//! `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

/// Schema DDL for the version 1 tables.
const SCHEMA_SQL: &str = r#"
-- Short-term and long-term memory records
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    scope TEXT NOT NULL CHECK(scope IN ('short_term','long_term')),
    key TEXT NOT NULL,
    session_id TEXT,
    value TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_accessed_at TEXT NOT NULL,
    relevance REAL NOT NULL DEFAULT 0.5 CHECK(relevance >= 0.0 AND relevance <= 1.0),
    pinned INTEGER NOT NULL DEFAULT 0,
    consolidated INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_memories_scope_key ON memories(scope, key);
CREATE INDEX IF NOT EXISTS idx_memories_session ON memories(session_id);
CREATE INDEX IF NOT EXISTS idx_memories_accessed ON memories(last_accessed_at);

-- One long-term record per topic key
CREATE UNIQUE INDEX IF NOT EXISTS idx_memories_long_term_key
    ON memories(key) WHERE scope = 'long_term';

-- Audit log
CREATE TABLE IF NOT EXISTS memory_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL CHECK(operation IN ('create','update','consolidate','promote','pin','evict','delete')),
    memory_id TEXT NOT NULL,
    details TEXT,
    created_at TEXT NOT NULL
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

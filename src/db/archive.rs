//! Archive of finished runs: answer, citation order, and the evidence store
//! contents at the time the run ended.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::sync::{Arc, Mutex};

use super::{format_timestamp, parse_timestamp};
use crate::evidence::{CitationHandle, EvidenceItem};
use crate::retrieval::DegradedAdapter;
use crate::search::{DeepSearchRun, RunState, TerminationReason};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub id: String,
    pub session_id: String,
    pub root_query: String,
    pub state: RunState,
    pub termination: TerminationReason,
    pub partial: bool,
    pub step_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivedRun {
    pub summary: RunSummary,
    pub answer: Option<String>,
    pub citations: Vec<CitationHandle>,
    pub evidence: Vec<EvidenceItem>,
    pub degraded: Vec<DegradedAdapter>,
}

impl ArchivedRun {
    /// Cited items in citation order.
    pub fn cited_evidence(&self) -> Vec<&EvidenceItem> {
        self.citations
            .iter()
            .filter_map(|h| self.evidence.iter().find(|e| e.handle == *h))
            .collect()
    }
}

/// Persist a finished run in one transaction. Re-saving a run replaces it.
pub fn save_run(conn: &mut Connection, run: &DeepSearchRun, evidence: &[EvidenceItem]) -> Result<()> {
    if !run.state.is_terminal() {
        bail!("run {} is still {}", run.id, run.state);
    }
    let termination = run
        .termination
        .with_context(|| format!("run {} has no termination reason", run.id))?;
    let finished_at = run.finished_at.unwrap_or_else(Utc::now);

    let tx = conn.transaction()?;
    tx.execute("DELETE FROM runs WHERE id = ?1", params![run.id])?;
    tx.execute(
        "INSERT INTO runs (id, session_id, root_query, state, termination, answer, partial, \
         step_count, degraded, started_at, finished_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            run.id,
            run.session_id,
            run.root.text,
            run.state.as_str(),
            termination.as_str(),
            run.answer.as_ref().map(|a| a.text.as_str()),
            run.answer.as_ref().is_some_and(|a| a.partial),
            run.steps.len() as i64,
            serde_json::to_string(&run.degraded)?,
            format_timestamp(&run.started_at),
            format_timestamp(&finished_at),
        ],
    )?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO run_evidence (run_id, handle, source_id, title, adapter, text, \
             content_hash, confidence, score, retrieved_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for item in evidence {
            stmt.execute(params![
                run.id,
                item.handle.0,
                item.source_id,
                item.title,
                item.adapter,
                item.text,
                item.content_hash,
                item.confidence,
                item.score,
                format_timestamp(&item.retrieved_at),
            ])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO run_citations (run_id, position, handle) VALUES (?1, ?2, ?3)",
        )?;
        for (position, handle) in run.citations().iter().enumerate() {
            stmt.execute(params![run.id, position as i64, handle.0])?;
        }
    }

    tx.commit()?;
    tracing::debug!(run_id = %run.id, evidence = evidence.len(), "run archived");
    Ok(())
}

const SUMMARY_COLUMNS: &str = "id, session_id, root_query, state, termination, partial, \
     step_count, started_at, finished_at";

type SummaryRow = (String, String, String, String, String, bool, i64, String, String);

fn summary_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SummaryRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn into_summary(row: SummaryRow) -> Result<RunSummary> {
    let (id, session_id, root_query, state, termination, partial, steps, started, finished) = row;
    Ok(RunSummary {
        id,
        session_id,
        root_query,
        state: state.parse().map_err(anyhow::Error::msg)?,
        termination: termination.parse().map_err(anyhow::Error::msg)?,
        partial,
        step_count: steps as usize,
        started_at: parse_timestamp(&started)?,
        finished_at: parse_timestamp(&finished)?,
    })
}

/// Most recent runs first.
pub fn list_runs(conn: &Connection, limit: usize) -> Result<Vec<RunSummary>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SUMMARY_COLUMNS} FROM runs ORDER BY started_at DESC, rowid DESC LIMIT ?1"
    ))?;
    let rows = stmt
        .query_map(params![limit as i64], summary_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(into_summary).collect()
}

pub fn load_run(conn: &Connection, run_id: &str) -> Result<Option<ArchivedRun>> {
    let row = conn
        .query_row(
            &format!("SELECT {SUMMARY_COLUMNS}, answer, degraded FROM runs WHERE id = ?1"),
            params![run_id],
            |row| {
                Ok((
                    summary_row(row)?,
                    row.get::<_, Option<String>>(9)?,
                    row.get::<_, Option<String>>(10)?,
                ))
            },
        )
        .optional()?;
    let Some((summary, answer, degraded)) = row else {
        return Ok(None);
    };
    let summary = into_summary(summary)?;
    let degraded: Vec<DegradedAdapter> = match degraded {
        Some(json) => serde_json::from_str(&json).context("invalid degraded adapter list")?,
        None => Vec::new(),
    };

    let mut stmt = conn.prepare(
        "SELECT handle, source_id, title, adapter, text, content_hash, confidence, score, retrieved_at \
         FROM run_evidence WHERE run_id = ?1 ORDER BY handle",
    )?;
    let raw_items = stmt
        .query_map(params![run_id], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, f64>(6)?,
                row.get::<_, f64>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let evidence = raw_items
        .into_iter()
        .map(
            |(handle, source_id, title, adapter, text, content_hash, confidence, score, retrieved)| {
                Ok(EvidenceItem {
                    handle: CitationHandle(handle),
                    source_id,
                    title,
                    text,
                    retrieved_at: parse_timestamp(&retrieved)?,
                    adapter,
                    confidence,
                    content_hash,
                    score,
                })
            },
        )
        .collect::<Result<Vec<_>>>()?;

    let mut stmt = conn
        .prepare("SELECT handle FROM run_citations WHERE run_id = ?1 ORDER BY position")?;
    let citations = stmt
        .query_map(params![run_id], |row| row.get::<_, u32>(0))?
        .map(|h| h.map(CitationHandle))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(ArchivedRun {
        summary,
        answer,
        citations,
        evidence,
        degraded,
    }))
}

/// Shared-connection handle used by the orchestrator and CLI.
#[derive(Clone)]
pub struct RunArchive {
    conn: Arc<Mutex<Connection>>,
}

impl RunArchive {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))
    }

    pub fn save(&self, run: &DeepSearchRun, evidence: &[EvidenceItem]) -> Result<()> {
        let mut conn = self.lock()?;
        save_run(&mut conn, run, evidence)
    }

    pub fn load(&self, run_id: &str) -> Result<Option<ArchivedRun>> {
        let conn = self.lock()?;
        load_run(&conn, run_id)
    }

    pub fn list(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let conn = self.lock()?;
        list_runs(&conn, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::retrieval::DegradeKind;
    use crate::search::{FinalAnswer, Query};

    fn item(n: u32, text: &str) -> EvidenceItem {
        EvidenceItem {
            handle: CitationHandle(n),
            source_id: format!("https://example.org/{n}"),
            title: (n % 2 == 0).then(|| format!("Title {n}")),
            text: text.into(),
            retrieved_at: Utc::now(),
            adapter: "wikipedia".into(),
            confidence: 0.7,
            content_hash: crate::evidence::content_hash(text),
            score: 0.42,
        }
    }

    fn finished_run(evidence: &[EvidenceItem]) -> DeepSearchRun {
        let mut run = DeepSearchRun::new(
            uuid::Uuid::now_v7().to_string(),
            "session".into(),
            Query {
                id: 1,
                text: "capital of France".into(),
                parent: None,
            },
        );
        run.state = RunState::Done;
        run.termination = Some(TerminationReason::Answered);
        run.finished_at = Some(Utc::now());
        run.degraded.push(DegradedAdapter {
            adapter: "duckduckgo".into(),
            kind: DegradeKind::Timeout,
            detail: "no response".into(),
        });
        run.answer = Some(FinalAnswer {
            text: "Paris [2] per [1].".into(),
            citations: vec![CitationHandle(2), CitationHandle(1)],
            evidence: vec![evidence[1].clone(), evidence[0].clone()],
            partial: false,
        });
        run
    }

    #[test]
    fn save_and_load_round_trip() {
        let mut conn = db::open_in_memory().unwrap();
        let evidence = vec![item(1, "France is in Europe."), item(2, "Paris is the capital.")];
        let run = finished_run(&evidence);

        save_run(&mut conn, &run, &evidence).unwrap();
        let loaded = load_run(&conn, &run.id).unwrap().unwrap();

        assert_eq!(loaded.summary.root_query, "capital of France");
        assert_eq!(loaded.summary.state, RunState::Done);
        assert_eq!(loaded.summary.started_at, run.started_at);
        assert_eq!(loaded.answer.as_deref(), Some("Paris [2] per [1]."));
        assert_eq!(loaded.citations, vec![CitationHandle(2), CitationHandle(1)]);
        assert_eq!(loaded.evidence, evidence);
        assert_eq!(loaded.degraded, run.degraded);
        assert_eq!(loaded.cited_evidence()[0].handle, CitationHandle(2));
    }

    #[test]
    fn resave_replaces() {
        let mut conn = db::open_in_memory().unwrap();
        let evidence = vec![item(1, "a"), item(2, "b")];
        let run = finished_run(&evidence);
        save_run(&mut conn, &run, &evidence).unwrap();
        save_run(&mut conn, &run, &evidence).unwrap();

        assert_eq!(list_runs(&conn, 10).unwrap().len(), 1);
    }

    #[test]
    fn refuses_unfinished_run() {
        let mut conn = db::open_in_memory().unwrap();
        let evidence = vec![item(1, "a"), item(2, "b")];
        let mut run = finished_run(&evidence);
        run.state = RunState::Reasoning;
        assert!(save_run(&mut conn, &run, &evidence).is_err());
    }

    #[test]
    fn missing_run_is_none() {
        let conn = db::open_in_memory().unwrap();
        assert!(load_run(&conn, "nope").unwrap().is_none());
    }
}

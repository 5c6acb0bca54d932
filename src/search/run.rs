use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{RunState, TerminationReason};
use crate::evidence::{CitationHandle, EvidenceItem};
use crate::reasoning::{Directive, StepResult};
use crate::retrieval::DegradedAdapter;

/// Monotonic within a session.
pub type QueryId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub id: QueryId,
    pub text: String,
    /// `None` for the root query.
    pub parent: Option<QueryId>,
}

impl Query {
    /// Comparison key for repeated-query detection.
    pub fn normalized(&self) -> String {
        crate::memory::topic_key(&self.text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
}

/// What a step was given, by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub query_chain: Vec<String>,
    pub evidence: Vec<CitationHandle>,
    pub memory_excerpt: String,
    pub directive: Option<Directive>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub index: usize,
    pub query_id: QueryId,
    pub context: StepSnapshot,
    pub output: Option<StepResult>,
    pub status: StepStatus,
    pub attempts: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub text: String,
    /// First-use order.
    pub citations: Vec<CitationHandle>,
    /// The cited items, in citation order.
    pub evidence: Vec<EvidenceItem>,
    /// Best-effort answer from an aborted run.
    pub partial: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeepSearchRun {
    pub id: String,
    pub session_id: String,
    pub root: Query,
    /// Root first, in the order queries were issued.
    pub queries: Vec<Query>,
    pub steps: Vec<ReasoningStep>,
    pub answer: Option<FinalAnswer>,
    pub state: RunState,
    pub termination: Option<TerminationReason>,
    pub degraded: Vec<DegradedAdapter>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DeepSearchRun {
    pub fn new(id: String, session_id: String, root: Query) -> Self {
        Self {
            id,
            session_id,
            queries: vec![root.clone()],
            root,
            steps: Vec::new(),
            answer: None,
            state: RunState::Planning,
            termination: None,
            degraded: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Append a pending step and return its index. Indices are contiguous from 0.
    pub fn begin_step(&mut self, query_id: QueryId, context: StepSnapshot) -> usize {
        let index = self.steps.len();
        self.steps.push(ReasoningStep {
            index,
            query_id,
            context,
            output: None,
            status: StepStatus::Pending,
            attempts: 0,
            error: None,
        });
        index
    }

    /// Citation handles of the final answer, first-use order.
    pub fn citations(&self) -> Vec<CitationHandle> {
        self.answer
            .as_ref()
            .map(|a| a.citations.clone())
            .unwrap_or_default()
    }

    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    /// Query chain from the root to `query_id`, following parent links.
    pub fn chain_to(&self, query_id: QueryId) -> Vec<String> {
        let mut chain = Vec::new();
        let mut cursor = Some(query_id);
        while let Some(id) = cursor {
            match self.queries.iter().find(|q| q.id == id) {
                Some(q) => {
                    chain.push(q.text.clone());
                    cursor = q.parent;
                }
                None => break,
            }
        }
        chain.reverse();
        chain
    }

    /// Record a degraded adapter once per adapter name.
    pub fn note_degraded(&mut self, entries: &[DegradedAdapter]) {
        for entry in entries {
            if !self.degraded.iter().any(|d| d.adapter == entry.adapter) {
                self.degraded.push(entry.clone());
            }
        }
    }

    /// Human-readable explanation for a run that ended without any answer.
    pub fn no_answer_message(&self) -> String {
        let mut msg = String::from("No answer could be produced");
        if let Some(reason) = self.termination {
            msg.push_str(&format!(" (run ended: {reason})"));
        }
        msg.push('.');
        if !self.degraded.is_empty() {
            let names: Vec<String> = self.degraded.iter().map(ToString::to_string).collect();
            msg.push_str(&format!(" Degraded sources: {}.", names.join("; ")));
        }
        msg
    }
}

//! The Deep Search orchestrator: a bounded state machine over
//! retrieval and reasoning steps.
//!
//! ```text
//! Planning → Retrieving → Reasoning ─┬→ Retrieving (next query)
//!                                    └→ Answering → Done
//!                                  (any) → Aborted
//! ```
//!
//! Every run ends within `search.run_deadline_secs`. Regular work stops at
//! the soft deadline (`deadline - final_answer_reserve`); the reserve is kept
//! for one forced final step.

pub mod run;
pub mod state;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::context::Session;
use crate::error::{DeepSearchError, Result};
use crate::evidence::{CitationHandle, EvidenceError, EvidenceItem, RawResult};
use crate::memory::{topic_key, types::MemoryScope};
use crate::reasoning::{
    Directive, ForceReason, ReasoningError, StepContext, StepController,
    StepError, StepResult,
};
use crate::retrieval::FetchRequest;

pub use run::{DeepSearchRun, FinalAnswer, Query, QueryId, ReasoningStep, StepSnapshot, StepStatus};
pub use state::{RunEvent, RunState, TerminationReason};

/// Characters of the answer kept in the short-term memory note.
const MEMORY_NOTE_CHARS: usize = 600;

/// Per-run overrides of the configured defaults.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub max_depth: Option<usize>,
    /// Restrict retrieval to these adapters.
    pub adapters: Option<Vec<String>>,
    pub events: Option<UnboundedSender<RunEvent>>,
}

pub struct Orchestrator<'s> {
    session: &'s Session,
    controller: StepController,
    options: RunOptions,
}

/// Mutable bookkeeping for one run.
struct Progress {
    run: DeepSearchRun,
    current: Query,
    depth: usize,
    force: Option<ForceReason>,
    /// Handles gathered per normalized query text.
    retrieved: HashMap<String, Vec<CitationHandle>>,
    /// Evidence the forced step must see first (repeated query).
    reuse: Vec<CitationHandle>,
}

impl<'s> Orchestrator<'s> {
    pub fn new(session: &'s Session) -> Self {
        let ctx = &session.ctx;
        let controller = StepController::new(Arc::clone(&ctx.model), ctx.config.evidence.context_top_k);
        Self {
            session,
            controller,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.options.events {
            let _ = tx.send(event);
        }
    }

    fn set_state(&self, progress: &mut Progress, state: RunState) {
        progress.run.state = state;
        tracing::debug!(run_id = %progress.run.id, %state, "state changed");
        self.emit(RunEvent::StateChanged { state });
    }

    /// Execute one Deep Search run to a terminal state.
    ///
    /// Only an empty query is an error. Component failures degrade the run;
    /// an aborted run is returned with whatever partial answer exists.
    pub async fn run(&self, root_query: &str, cancel: CancellationToken) -> Result<DeepSearchRun> {
        let root_query = root_query.trim();
        if root_query.is_empty() {
            return Err(DeepSearchError::EmptyQuery);
        }

        let run_id = uuid::Uuid::now_v7().to_string();
        let span = tracing::info_span!("run", run_id = %run_id, session_id = %self.session.id);
        self.execute(run_id, root_query.to_string(), cancel)
            .instrument(span)
            .await
    }

    async fn execute(&self, run_id: String, root_text: String, cancel: CancellationToken) -> Result<DeepSearchRun> {
        let ctx = &self.session.ctx;
        let search = &ctx.config.search;
        let max_depth = self.options.max_depth.unwrap_or(search.max_depth);

        let started = Instant::now();
        let deadline = started + search.run_deadline();
        let soft_deadline = deadline
            .checked_sub(search.final_answer_reserve())
            .unwrap_or(started)
            .max(started);
        // Root step, one per follow-up query, and the forced final step.
        let step_cap = max_depth + 2;

        ctx.evidence.open_run(&run_id);
        self.session.track_run(&run_id);

        let root = Query {
            id: self.session.next_query_id(),
            text: root_text,
            parent: None,
        };
        let mut p = Progress {
            run: DeepSearchRun::new(run_id.clone(), self.session.id.clone(), root.clone()),
            current: root,
            depth: 0,
            force: None,
            retrieved: HashMap::new(),
            reuse: Vec::new(),
        };
        tracing::info!(query = %p.run.root.text, max_depth, "run started");
        self.emit(RunEvent::StateChanged { state: RunState::Planning });

        let termination = loop {
            if cancel.is_cancelled() {
                break TerminationReason::Cancelled;
            }
            if p.run.steps.len() >= step_cap {
                // Unreachable with the transitions below; bounds the loop regardless.
                break p.force.map(Into::into).unwrap_or(TerminationReason::DepthLimit);
            }
            if p.force.is_none() && Instant::now() >= soft_deadline {
                p.force = Some(ForceReason::Deadline);
            }

            // ── Retrieving ───────────────────────────────────────────────
            if p.force.is_none() {
                self.set_state(&mut p, RunState::Retrieving);
                self.emit(RunEvent::Retrieving {
                    depth: p.depth,
                    query: p.current.text.clone(),
                });
                let fetch_deadline = (Instant::now() + ctx.config.retrieval.fetch_deadline()).min(soft_deadline);
                let outcome = ctx
                    .dispatcher
                    .fetch(
                        FetchRequest {
                            query: p.current.text.clone(),
                            adapters: self.options.adapters.clone(),
                            deadline: fetch_deadline,
                        },
                        &cancel,
                    )
                    .await;
                if outcome.cancelled {
                    break TerminationReason::Cancelled;
                }
                p.run.note_degraded(&outcome.degraded);
                let before = ctx.evidence.len(&run_id);
                let handles = self.absorb(&run_id, outcome.results);
                let new_evidence = ctx.evidence.len(&run_id).saturating_sub(before);
                tracing::info!(
                    depth = p.depth,
                    results = handles.len(),
                    new_evidence,
                    degraded = outcome.degraded.len(),
                    "retrieval finished"
                );
                self.emit(RunEvent::Retrieved {
                    new_evidence,
                    degraded: outcome.degraded,
                });
                p.retrieved.insert(p.current.normalized(), handles);
            }

            // ── Reasoning ────────────────────────────────────────────────
            self.set_state(&mut p, RunState::Reasoning);
            let now = Instant::now();
            let budget = match p.force {
                Some(_) => deadline.saturating_duration_since(now),
                None => soft_deadline.saturating_duration_since(now),
            }
            .min(search.step_timeout());
            if budget.is_zero() && p.force.is_none() {
                p.force = Some(ForceReason::Deadline);
                continue;
            }

            let context = self.step_context(&run_id, &p).await;
            let index = p.run.begin_step(
                p.current.id,
                StepSnapshot {
                    query_chain: context.query_chain.clone(),
                    evidence: context.evidence_handles(),
                    memory_excerpt: context.memory_excerpt.clone(),
                    directive: context.directive,
                },
            );
            self.emit(RunEvent::StepStarted {
                index,
                forced: p.force,
            });
            tracing::info!(index, forced = ?p.force, evidence = context.evidence.len(), "reasoning step");

            match self.controller.step(&context, &cancel, budget).await {
                Ok(outcome) => {
                    let step = &mut p.run.steps[index];
                    step.status = StepStatus::Completed;
                    step.attempts = outcome.attempts;
                    step.output = Some(outcome.result.clone());
                    self.emit(RunEvent::StepFinished {
                        index,
                        completed: true,
                        attempts: outcome.attempts,
                    });

                    match outcome.result {
                        StepResult::FinalAnswer { text, citations } => {
                            self.set_state(&mut p, RunState::Answering);
                            p.run.answer = Some(self.resolve_answer(&run_id, text, &citations, false));
                            break p.force.map(Into::into).unwrap_or(TerminationReason::Answered);
                        }
                        StepResult::NextQuery { query } => {
                            let next = Query {
                                id: self.session.next_query_id(),
                                text: query,
                                parent: Some(p.current.id),
                            };
                            p.run.queries.push(next.clone());
                            p.depth += 1;

                            let key = next.normalized();
                            if let Some(earlier) = p.retrieved.get(&key) {
                                tracing::info!(query = %next.text, "query repeated; forcing final answer");
                                p.reuse = earlier.clone();
                                p.force = Some(ForceReason::RepeatedQuery);
                            } else if p.depth > max_depth {
                                tracing::info!(depth = p.depth, "depth limit reached; forcing final answer");
                                p.force = Some(ForceReason::DepthLimit);
                            }
                            p.current = next;
                        }
                    }
                }
                Err(StepError::Cancelled) => {
                    p.run.steps[index].status = StepStatus::Failed;
                    p.run.steps[index].error = Some("cancelled".into());
                    break TerminationReason::Cancelled;
                }
                Err(StepError::Failed { attempts, last }) => {
                    let step = &mut p.run.steps[index];
                    step.status = StepStatus::Failed;
                    step.attempts = attempts;
                    step.error = Some(last.to_string());
                    self.emit(RunEvent::StepFinished {
                        index,
                        completed: false,
                        attempts,
                    });

                    if p.force.is_some() {
                        // The forced step was the last chance.
                        break if last == ReasoningError::Timeout {
                            TerminationReason::Deadline
                        } else {
                            TerminationReason::StepFailed
                        };
                    }
                    p.force = Some(ForceReason::StepFailed);
                }
            }
        };

        self.finish(&run_id, p, termination).await
    }

    /// Submit retrieved results, making room when the run's store is full.
    /// Returns the handles of this batch in submission order.
    fn absorb(&self, run_id: &str, results: Vec<RawResult>) -> Vec<CitationHandle> {
        let store = &self.session.ctx.evidence;
        let mut handles: Vec<CitationHandle> = Vec::new();

        for raw in results {
            let handle = match store.submit(run_id, raw.clone()) {
                Ok(handle) => Some(handle),
                Err(EvidenceError::StorageFull { cap }) => {
                    let candidate = store.score_raw(&raw);
                    match store.lowest_score(run_id) {
                        Some(lowest) if candidate > lowest => {
                            store.prune_lowest(run_id, 1, &handles);
                            store.submit(run_id, raw).ok()
                        }
                        _ => {
                            tracing::debug!(cap, candidate, "evidence store full; result dropped");
                            None
                        }
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "result not stored");
                    None
                }
            };
            if let Some(h) = handle {
                if !handles.contains(&h) {
                    handles.push(h);
                }
            }
        }
        handles
    }

    async fn step_context(&self, run_id: &str, p: &Progress) -> StepContext {
        let ctx = &self.session.ctx;
        let k = ctx.config.evidence.context_top_k;

        let mut evidence: Vec<EvidenceItem> = p
            .reuse
            .iter()
            .filter_map(|h| ctx.evidence.get(run_id, *h))
            .take(k)
            .collect();
        for item in ctx.evidence.top_k(run_id, k) {
            if evidence.len() >= k {
                break;
            }
            if !evidence.iter().any(|e| e.handle == item.handle) {
                evidence.push(item);
            }
        }

        let memory = Arc::clone(&ctx.memory);
        let session_id = self.session.id.clone();
        let topic = p.run.root.text.clone();
        let memory_excerpt = match tokio::task::spawn_blocking(move || memory.excerpt(&session_id, &topic)).await {
            Ok(Ok(excerpt)) => excerpt,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "memory excerpt unavailable");
                String::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "memory excerpt task failed");
                String::new()
            }
        };

        StepContext {
            query_chain: p.run.chain_to(p.current.id),
            evidence,
            memory_excerpt,
            directive: p.force.map(Directive::MustAnswer),
        }
    }

    /// Attach the cited items in first-use order. Handles that no longer
    /// resolve are dropped from the answer.
    fn resolve_answer(&self, run_id: &str, text: String, citations: &[CitationHandle], partial: bool) -> FinalAnswer {
        let store = &self.session.ctx.evidence;
        let mut resolved = Vec::new();
        let mut evidence = Vec::new();
        for handle in citations {
            match store.get(run_id, *handle) {
                Some(item) => {
                    resolved.push(*handle);
                    evidence.push(item);
                }
                None => tracing::warn!(%handle, "citation does not resolve; dropped"),
            }
        }
        FinalAnswer {
            text,
            citations: resolved,
            evidence,
            partial,
        }
    }

    /// Best answer for an aborted run: a digest of the top evidence once at
    /// least one step completed. Rejected replies are never surfaced.
    fn partial_answer(&self, run_id: &str, p: &Progress) -> Option<FinalAnswer> {
        if p.run.completed_steps() == 0 {
            return None;
        }
        let top = self
            .session
            .ctx
            .evidence
            .top_k(run_id, self.session.ctx.config.evidence.context_top_k);
        if top.is_empty() {
            return None;
        }
        let mut text = String::from("No final answer was reached. The strongest evidence found:\n");
        for item in &top {
            let snippet: String = item.text.chars().take(200).collect();
            let label = item.title.as_deref().unwrap_or(&item.source_id);
            text.push_str(&format!("- {label}: {snippet} {}\n", item.handle));
        }
        let handles: Vec<CitationHandle> = top.iter().map(|i| i.handle).collect();
        Some(self.resolve_answer(run_id, text.trim_end().to_string(), &handles, true))
    }

    async fn finish(
        &self,
        run_id: &str,
        mut p: Progress,
        termination: TerminationReason,
    ) -> Result<DeepSearchRun> {
        if p.run.answer.is_some() {
            self.set_state(&mut p, RunState::Done);
        } else {
            p.run.answer = self.partial_answer(run_id, &p);
            self.set_state(&mut p, RunState::Aborted);
        }
        p.run.termination = Some(termination);
        p.run.finished_at = Some(chrono::Utc::now());

        tracing::info!(
            state = %p.run.state,
            %termination,
            steps = p.run.steps.len(),
            citations = p.run.citations().len(),
            partial = p.run.answer.as_ref().is_some_and(|a| a.partial),
            "run finished"
        );

        if p.run.state == RunState::Done {
            self.write_back(&p.run).await;
        }
        self.archive(&p.run).await;

        self.emit(RunEvent::Finished {
            state: p.run.state,
            termination,
        });
        Ok(p.run)
    }

    /// Short-term note for the session, reinforcement of a matching long-term
    /// topic, and background consolidation when the session grows too large.
    async fn write_back(&self, run: &DeepSearchRun) {
        let Some(answer) = &run.answer else {
            return;
        };
        let ctx = &self.session.ctx;
        let memory = Arc::clone(&ctx.memory);
        let session_id = self.session.id.clone();
        let root = run.root.text.clone();
        let summary: String = answer.text.chars().take(MEMORY_NOTE_CHARS).collect();
        let note = format!("Q: {root}\nA: {summary}");

        let result = tokio::task::spawn_blocking(move || -> anyhow::Result<usize> {
            memory.write(MemoryScope::ShortTerm, &session_id, Some(&session_id), &note)?;
            let key = topic_key(&root);
            if !key.is_empty() && memory.reinforce(&key, &summary)?.is_some() {
                tracing::debug!(key = %key, "long-term topic reinforced");
            }
            memory.short_term_count(&session_id)
        })
        .await;

        let count = match result {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "memory write-back failed");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "memory write-back task failed");
                return;
            }
        };

        if count > ctx.memory.config().short_term_threshold {
            let memory = Arc::clone(&ctx.memory);
            let session_id = self.session.id.clone();
            let handle = tokio::spawn(async move {
                let outcome = tokio::task::spawn_blocking(move || memory.consolidate(&session_id)).await;
                match outcome {
                    Ok(Ok(result)) => tracing::debug!(folded = result.records_consolidated, "background consolidation done"),
                    Ok(Err(e)) => tracing::warn!(error = %e, "background consolidation failed"),
                    Err(e) => tracing::warn!(error = %e, "background consolidation task failed"),
                }
            });
            self.session.track_background(handle);
        }
    }

    async fn archive(&self, run: &DeepSearchRun) {
        let ctx = &self.session.ctx;
        let Some(archive) = ctx.archive.clone() else {
            return;
        };
        let snapshot = ctx.evidence.snapshot(&run.id);
        let run = run.clone();
        let result = tokio::task::spawn_blocking(move || archive.save(&run, &snapshot)).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "run archive failed"),
            Err(e) => tracing::warn!(error = %e, "run archive task failed"),
        }
    }
}

impl DeepSearchRun {
    /// The answer of a completed run, or `RunAborted` when there is none.
    pub fn into_answer(self) -> Result<FinalAnswer> {
        match self.answer {
            Some(answer) => Ok(answer),
            None => Err(DeepSearchError::RunAborted {
                run_id: self.id,
                reason: self.termination.unwrap_or(TerminationReason::StepFailed),
            }),
        }
    }
}

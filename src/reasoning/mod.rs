//! One think → decide cycle against the model.
//!
//! [`StepController::step`] builds a prompt from a bounded context, calls the
//! model, and validates the reply. A rejected reply (malformed, citing
//! evidence outside the context, or ignoring a must-answer directive) gets
//! exactly one corrective retry before the step is reported as failed.

pub mod parse;
pub mod prompts;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::evidence::{CitationHandle, EvidenceItem};
use crate::model::{Prompt, ReasoningModel};
use parse::{parse_action, ModelAction};

/// Model calls per step: the first attempt plus one corrective retry.
pub const MAX_ATTEMPTS: u32 = 2;

/// Why a step is forced to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceReason {
    DepthLimit,
    Deadline,
    RepeatedQuery,
    StepFailed,
}

impl std::fmt::Display for ForceReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::DepthLimit => "search depth limit reached",
            Self::Deadline => "time budget nearly spent",
            Self::RepeatedQuery => "the same search was requested twice",
            Self::StepFailed => "the previous step failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum Directive {
    MustAnswer(ForceReason),
}

/// Everything the model sees for one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepContext {
    /// Root query first, current query last.
    pub query_chain: Vec<String>,
    pub evidence: Vec<EvidenceItem>,
    pub memory_excerpt: String,
    pub directive: Option<Directive>,
}

impl StepContext {
    pub fn evidence_handles(&self) -> Vec<CitationHandle> {
        self.evidence.iter().map(|e| e.handle).collect()
    }

    fn must_answer(&self) -> bool {
        matches!(self.directive, Some(Directive::MustAnswer(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepResult {
    NextQuery {
        query: String,
    },
    FinalAnswer {
        text: String,
        citations: Vec<CitationHandle>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub result: StepResult,
    pub attempts: u32,
}

/// Why a single model attempt was rejected.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ReasoningError {
    #[error("cited evidence not supplied in context: {}", format_handles(.handles))]
    InvalidCitation { handles: Vec<CitationHandle> },
    #[error("model invocation failed: {0}")]
    ModelInvocationFailure(String),
    #[error("model call exceeded the step budget")]
    Timeout,
}

fn format_handles(handles: &[CitationHandle]) -> String {
    handles
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StepError {
    #[error("step failed after {attempts} attempt(s): {last}")]
    Failed {
        attempts: u32,
        last: ReasoningError,
    },
    #[error("step cancelled")]
    Cancelled,
}

pub struct StepController {
    model: Arc<dyn ReasoningModel>,
    max_evidence: usize,
}

impl StepController {
    pub fn new(model: Arc<dyn ReasoningModel>, max_evidence: usize) -> Self {
        Self {
            model,
            max_evidence: max_evidence.max(1),
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    /// Run one step. Both attempts share `budget`.
    pub async fn step(
        &self,
        context: &StepContext,
        cancel: &CancellationToken,
        budget: Duration,
    ) -> Result<StepOutcome, StepError> {
        let deadline = Instant::now() + budget;

        let mut ctx = context.clone();
        ctx.evidence.truncate(self.max_evidence);
        let allowed = ctx.evidence_handles();

        let base = prompts::step_prompt(&ctx);
        let mut prompt = base.clone();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let reply = match self.invoke(&prompt, cancel, deadline).await {
                Ok(reply) => reply,
                Err(InvokeError::Cancelled) => return Err(StepError::Cancelled),
                Err(InvokeError::Failed(err)) => {
                    // Nothing to correct on a timeout: the budget is gone.
                    if err == ReasoningError::Timeout || attempts >= MAX_ATTEMPTS {
                        tracing::warn!(attempts, error = %err, "reasoning step failed");
                        return Err(StepError::Failed { attempts, last: err });
                    }
                    tracing::debug!(attempts, error = %err, "retrying model call");
                    prompt = prompts::corrective_prompt(&base, "(no reply)", &err.to_string());
                    continue;
                }
            };

            match validate(&reply, &allowed, ctx.must_answer()) {
                Ok(result) => {
                    tracing::debug!(attempts, ?result, "reasoning step completed");
                    return Ok(StepOutcome { result, attempts });
                }
                Err(err) if attempts >= MAX_ATTEMPTS => {
                    tracing::warn!(attempts, error = %err, "reasoning step failed");
                    return Err(StepError::Failed { attempts, last: err });
                }
                Err(err) => {
                    tracing::info!(attempts, error = %err, "model reply rejected; sending correction");
                    prompt = prompts::corrective_prompt(&base, &reply, &err.to_string());
                }
            }
        }
    }

    async fn invoke(
        &self,
        prompt: &Prompt,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<String, InvokeError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(InvokeError::Cancelled),
            res = tokio::time::timeout_at(deadline, self.model.generate(prompt)) => match res {
                Ok(Ok(text)) => Ok(text),
                Ok(Err(e)) => Err(InvokeError::Failed(ReasoningError::ModelInvocationFailure(e.to_string()))),
                Err(_) => Err(InvokeError::Failed(ReasoningError::Timeout)),
            },
        }
    }
}

enum InvokeError {
    Cancelled,
    Failed(ReasoningError),
}

/// Parse a reply and check it against the context it was produced from.
pub fn validate(
    reply: &str,
    allowed: &[CitationHandle],
    must_answer: bool,
) -> Result<StepResult, ReasoningError> {
    let action =
        parse_action(reply).map_err(|e| ReasoningError::ModelInvocationFailure(e.to_string()))?;

    match action {
        ModelAction::Search { .. } if must_answer => Err(ReasoningError::ModelInvocationFailure(
            "a search was requested but an answer is required".into(),
        )),
        ModelAction::Search { query } => Ok(StepResult::NextQuery { query }),
        ModelAction::Answer { text, citations } => {
            let foreign: Vec<CitationHandle> = citations
                .iter()
                .filter(|h| !allowed.contains(h))
                .copied()
                .collect();
            if !foreign.is_empty() {
                return Err(ReasoningError::InvalidCitation { handles: foreign });
            }
            Ok(StepResult::FinalAnswer { text, citations })
        }
    }
}

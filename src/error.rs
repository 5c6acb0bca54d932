//! Crate-level error type.
//!
//! Component errors convert into [`DeepSearchError`]. Most of them never reach
//! a caller of [`crate::Orchestrator::run`]: adapters degrade, steps retry,
//! and storage pressure is handled by pruning. What does surface is invalid
//! input, setup failures, and (via [`crate::DeepSearchRun::into_answer`]) a
//! run that ended without any answer.

use crate::evidence::EvidenceError;
use crate::model::ModelError;
use crate::reasoning::{ReasoningError, StepError};
use crate::retrieval::AdapterError;
use crate::search::TerminationReason;

#[derive(Debug, thiserror::Error)]
pub enum DeepSearchError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error(transparent)]
    Evidence(#[from] EvidenceError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Reasoning(#[from] ReasoningError),

    #[error(transparent)]
    Step(#[from] StepError),

    #[error("memory: {0:#}")]
    Memory(anyhow::Error),

    #[error("storage: {0:#}")]
    Storage(anyhow::Error),

    #[error("configuration: {0:#}")]
    Config(anyhow::Error),

    #[error("run {run_id} aborted without an answer ({reason})")]
    RunAborted {
        run_id: String,
        reason: TerminationReason,
    },

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T, E = DeepSearchError> = std::result::Result<T, E>;

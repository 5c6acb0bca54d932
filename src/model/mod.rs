//! Language model boundary.

pub mod ollama;

use async_trait::async_trait;

pub use ollama::OllamaModel;

/// A prompt split into system instructions and the user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model endpoint must be on 127.0.0.1 (got {0})")]
    RemoteNotAllowed(String),
    #[error("model request failed: {0}")]
    Transport(String),
    #[error("model returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode model response: {0}")]
    Decode(String),
    #[error("model returned an empty response")]
    Empty,
}

/// Generates raw text for a prompt. Parsing and validation of the text are
/// the caller's job.
#[async_trait]
pub trait ReasoningModel: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &Prompt) -> Result<String, ModelError>;
}

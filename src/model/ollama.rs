use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ModelError, Prompt, ReasoningModel};
use crate::config::ModelConfig;

/// Ollama over HTTP, restricted to `127.0.0.1`.
#[derive(Debug, Clone)]
pub struct OllamaModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f64,
    request_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Accept only `http://127.0.0.1` with an optional port.
pub fn validate_base_url(base_url: &str) -> Result<String, ModelError> {
    let base_url = base_url.trim_end_matches('/').to_string();
    if !base_url.starts_with("http://127.0.0.1:") && base_url != "http://127.0.0.1" {
        return Err(ModelError::RemoteNotAllowed(base_url));
    }
    Ok(base_url)
}

impl OllamaModel {
    pub fn new(config: &ModelConfig) -> Result<Self, ModelError> {
        let base_url = validate_base_url(&config.base_url)?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ModelError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            model: config.model.clone(),
            temperature: config.temperature,
            request_timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Names of locally installed models. Fails fast when Ollama is down.
    pub async fn health_check(&self) -> Result<Vec<String>, ModelError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_millis(800))
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ModelError::Status {
                status: status.as_u16(),
                body: String::new(),
            });
        }
        let tags: TagsResponse = resp
            .json()
            .await
            .map_err(|e| ModelError::Decode(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl ReasoningModel for OllamaModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String, ModelError> {
        let url = format!("{}/api/generate", self.base_url);
        let req = GenerateRequest {
            model: &self.model,
            system: &prompt.system,
            prompt: &prompt.user,
            stream: false,
            format: "json",
            options: GenerateOptions {
                temperature: self.temperature,
            },
        };

        let resp = self
            .client
            .post(&url)
            .timeout(self.request_timeout)
            .json(&req)
            .send()
            .await
            .map_err(|e| ModelError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let v: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| ModelError::Decode(e.to_string()))?;
        if v.response.trim().is_empty() {
            return Err(ModelError::Empty);
        }
        tracing::trace!(model = %self.model, chars = v.response.len(), "model responded");
        Ok(v.response)
    }
}

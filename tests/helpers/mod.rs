#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deepsearch::config::DeepSearchConfig;
use deepsearch::evidence::RawResult;
use deepsearch::model::{ModelError, Prompt, ReasoningModel};
use deepsearch::retrieval::{AdapterError, RetrievalAdapter};
use deepsearch::SearchContext;

/// Replays canned replies in order and records every prompt. Once the script
/// runs out it answers with `ModelError::Empty`.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, ModelError>>>,
    prompts: Mutex<Vec<Prompt>>,
    delay: Duration,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Result<String, ModelError>>) -> Arc<Self> {
        Self::with_delay(replies, Duration::ZERO)
    }

    pub fn with_delay(replies: Vec<Result<String, ModelError>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn push(&self, reply: Result<String, ModelError>) {
        self.replies.lock().unwrap().push_back(reply);
    }
}

#[async_trait]
impl ReasoningModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &Prompt) -> Result<String, ModelError> {
        self.prompts.lock().unwrap().push(prompt.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ModelError::Empty))
    }
}

pub fn answer(text: &str, citations: &[u32]) -> Result<String, ModelError> {
    Ok(serde_json::json!({"action": "answer", "answer": text, "citations": citations}).to_string())
}

pub fn search(query: &str) -> Result<String, ModelError> {
    Ok(serde_json::json!({"action": "search", "query": query}).to_string())
}

/// Returns fixed `(source, text, confidence)` results, optionally per query.
pub struct StaticAdapter {
    name: String,
    default: Vec<(String, String, f64)>,
    by_query: HashMap<String, Vec<(String, String, f64)>>,
    queries: Mutex<Vec<String>>,
}

impl StaticAdapter {
    pub fn new(name: &str, results: &[(&str, &str, f64)]) -> Arc<Self> {
        Self::build(name, results, HashMap::new())
    }

    pub fn per_query(
        name: &str,
        default: &[(&str, &str, f64)],
        by_query: &[(&str, &[(&str, &str, f64)])],
    ) -> Arc<Self> {
        let map = by_query
            .iter()
            .map(|(q, results)| (q.to_string(), owned(results)))
            .collect();
        Self::build(name, default, map)
    }

    fn build(
        name: &str,
        default: &[(&str, &str, f64)],
        by_query: HashMap<String, Vec<(String, String, f64)>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            default: owned(default),
            by_query,
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

fn owned(results: &[(&str, &str, f64)]) -> Vec<(String, String, f64)> {
    results
        .iter()
        .map(|(s, t, c)| (s.to_string(), t.to_string(), *c))
        .collect()
}

#[async_trait]
impl RetrievalAdapter for StaticAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, query: &str, _timeout: Duration) -> Result<Vec<RawResult>, AdapterError> {
        self.queries.lock().unwrap().push(query.to_string());
        let results = self.by_query.get(query).unwrap_or(&self.default);
        Ok(results
            .iter()
            .map(|(source, text, conf)| RawResult::new(self.name.clone(), source.clone(), text.clone(), *conf))
            .collect())
    }
}

/// Sleeps far past any adapter timeout.
pub struct SlowAdapter {
    name: String,
    delay: Duration,
    pub calls: AtomicUsize,
}

impl SlowAdapter {
    pub fn new(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            delay,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl RetrievalAdapter for SlowAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, query: &str, _timeout: Duration) -> Result<Vec<RawResult>, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(vec![RawResult::new(self.name.clone(), "slow://late", format!("late result for {query}"), 0.9)])
    }
}

pub struct FailingAdapter {
    name: String,
}

impl FailingAdapter {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
        })
    }
}

#[async_trait]
impl RetrievalAdapter for FailingAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, _query: &str, _timeout: Duration) -> Result<Vec<RawResult>, AdapterError> {
        Err(AdapterError::Status {
            adapter: self.name.clone(),
            status: 503,
        })
    }
}

/// Short timeouts, no rate limiting.
pub fn test_config() -> DeepSearchConfig {
    let mut config = DeepSearchConfig::default();
    config.retrieval.adapters = Vec::new();
    config.retrieval.adapter_timeout_ms = 500;
    config.retrieval.fetch_deadline_ms = 1_000;
    config.retrieval.min_interval_ms = 0;
    config.search.max_depth = 3;
    config.search.run_deadline_secs = 30;
    config.search.step_timeout_secs = 10;
    config.search.final_answer_reserve_secs = 5;
    config
}

/// In-memory context with the given model and adapters.
pub fn context(
    config: DeepSearchConfig,
    model: Arc<dyn ReasoningModel>,
    adapters: Vec<Arc<dyn RetrievalAdapter>>,
) -> Arc<SearchContext> {
    Arc::new(SearchContext::in_memory(config, model, adapters).unwrap())
}

//! Shared engine state and per-session scoping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::config::DeepSearchConfig;
use crate::db::{self, archive::RunArchive};
use crate::error::{DeepSearchError, Result};
use crate::evidence::{EvidenceStore, WeightedScorer};
use crate::memory::MemoryManager;
use crate::model::{OllamaModel, ReasoningModel};
use crate::retrieval::{build_adapters, RetrievalAdapter, RetrievalDispatcher};
use crate::search::QueryId;

/// Everything a run needs, passed explicitly.
pub struct SearchContext {
    pub config: DeepSearchConfig,
    pub evidence: Arc<EvidenceStore>,
    pub memory: Arc<MemoryManager>,
    pub model: Arc<dyn ReasoningModel>,
    pub dispatcher: Arc<RetrievalDispatcher>,
    pub archive: Option<RunArchive>,
}

impl SearchContext {
    /// Assemble a context from parts. Runs are archived in the memory
    /// database unless [`SearchContext::without_archive`] is applied.
    pub fn new(
        config: DeepSearchConfig,
        memory: MemoryManager,
        model: Arc<dyn ReasoningModel>,
        adapters: Vec<Arc<dyn RetrievalAdapter>>,
    ) -> Self {
        let scorer = Arc::new(WeightedScorer::new(&config.evidence));
        let evidence = Arc::new(EvidenceStore::with_scorer(
            config.evidence.max_items_per_run,
            scorer,
        ));
        let dispatcher = Arc::new(RetrievalDispatcher::new(adapters, &config.retrieval));
        let archive = Some(RunArchive::new(memory.connection()));
        Self {
            config,
            evidence,
            memory: Arc::new(memory),
            model,
            dispatcher,
            archive,
        }
    }

    pub fn without_archive(mut self) -> Self {
        self.archive = None;
        self
    }

    /// Production wiring: on-disk database, configured adapters, Ollama.
    pub fn from_config(config: DeepSearchConfig) -> Result<Self> {
        let db_path = config.resolved_db_path();
        let conn = db::open_database(&db_path).map_err(DeepSearchError::Storage)?;
        let memory = MemoryManager::new(conn, config.memory.clone()).with_db_path(&db_path);
        let model: Arc<dyn ReasoningModel> = Arc::new(OllamaModel::new(&config.model)?);
        let adapters = build_adapters(&config.retrieval).map_err(DeepSearchError::Config)?;
        tracing::info!(
            db = %db_path.display(),
            model = model.name(),
            adapters = ?config.retrieval.adapters,
            "search context ready"
        );
        Ok(Self::new(config, memory, model, adapters))
    }

    /// In-memory database, for tests and dry runs.
    pub fn in_memory(
        config: DeepSearchConfig,
        model: Arc<dyn ReasoningModel>,
        adapters: Vec<Arc<dyn RetrievalAdapter>>,
    ) -> Result<Self> {
        let conn = db::open_in_memory().map_err(DeepSearchError::Storage)?;
        let memory = MemoryManager::new(conn, config.memory.clone());
        Ok(Self::new(config, memory, model, adapters))
    }
}

/// One conversation: owns its query id sequence, the runs it started, and
/// any background memory work those runs scheduled.
pub struct Session {
    pub id: String,
    pub ctx: Arc<SearchContext>,
    query_seq: AtomicU64,
    runs: Mutex<Vec<String>>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    pub fn new(ctx: Arc<SearchContext>) -> Self {
        Self::with_id(ctx, uuid::Uuid::now_v7().to_string())
    }

    pub fn with_id(ctx: Arc<SearchContext>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ctx,
            query_seq: AtomicU64::new(0),
            runs: Mutex::new(Vec::new()),
            background: Mutex::new(Vec::new()),
        }
    }

    /// Next query id; starts at 1.
    pub fn next_query_id(&self) -> QueryId {
        self.query_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn track_run(&self, run_id: &str) {
        if let Ok(mut runs) = self.runs.lock() {
            runs.push(run_id.to_string());
        }
    }

    pub(crate) fn track_background(&self, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.background.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.push(handle);
        }
    }

    /// Wait for background memory work scheduled by this session's runs.
    pub async fn settle(&self) -> Result<()> {
        let tasks: Vec<JoinHandle<()>> = match self.background.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for task in tasks {
            task.await?;
        }
        Ok(())
    }

    /// Finish the session: settle background work, release run evidence, and
    /// drop short-term memory.
    pub async fn close(self) -> Result<()> {
        self.settle().await?;

        let runs: Vec<String> = match self.runs.lock() {
            Ok(mut runs) => runs.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for run_id in &runs {
            self.ctx.evidence.release(run_id);
        }

        let memory = Arc::clone(&self.ctx.memory);
        let session_id = self.id.clone();
        let removed = tokio::task::spawn_blocking(move || memory.end_session(&session_id))
            .await?
            .map_err(DeepSearchError::Memory)?;
        tracing::info!(session_id = %self.id, runs = runs.len(), removed, "session closed");
        Ok(())
    }
}

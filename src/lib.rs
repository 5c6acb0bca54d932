//! Local-first deep search: recursive retrieval, cited answers, and
//! persistent memory over a local LLM.
//!
//! A run starts from one question. The orchestrator fetches evidence from
//! every registered retrieval adapter in parallel, hands the strongest
//! evidence to the model, and either follows the model's next query or
//! returns its answer. Every claim in an answer cites evidence by handle
//! (`[1]`, `[2]`, ...), and every handle resolves to the stored item.
//!
//! # Architecture
//!
//! - **Evidence**: per-run store keyed by content hash; handles are stable
//!   for the life of the run
//! - **Retrieval**: adapters behind one trait, fanned out with per-adapter
//!   timeouts and rate limits; failures degrade instead of aborting
//! - **Reasoning**: one model call per step, parsed into a tagged action and
//!   validated against the evidence the step was shown
//! - **Memory**: SQLite short-term (per session) and long-term (per topic)
//!   records with consolidation, promotion, and LRA eviction
//! - **Model**: Ollama on `127.0.0.1`; nothing leaves the machine except
//!   retrieval requests
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`context`]: [`SearchContext`] wiring and [`Session`] scoping
//! - [`db`]: SQLite initialization, schema, migrations, run archive, and health checks
//! - [`evidence`]: Evidence store, content hashing, and ranking
//! - [`memory`]: Short-term and long-term memory with maintenance
//! - [`model`]: Reasoning model trait and the Ollama client
//! - [`reasoning`]: Step controller, prompts, and reply parsing
//! - [`retrieval`]: Adapter trait, dispatcher, and reference adapters
//! - [`search`]: The run state machine

pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod evidence;
pub mod memory;
pub mod model;
pub mod reasoning;
pub mod retrieval;
pub mod search;

pub use context::{SearchContext, Session};
pub use error::{DeepSearchError, Result};
pub use search::{DeepSearchRun, FinalAnswer, Orchestrator, RunOptions};

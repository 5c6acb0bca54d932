use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::duckduckgo::DuckDuckGoAdapter;
use super::scrape::PageScrapeAdapter;
use super::wikipedia::WikipediaAdapter;
use crate::config::RetrievalConfig;
use crate::evidence::RawResult;

/// Failure of a single adapter call. Never fatal to a run: the dispatcher
/// turns it into zero results plus a degraded entry.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("{adapter} timed out after {timeout_ms}ms")]
    Timeout { adapter: String, timeout_ms: u64 },
    #[error("{adapter} request failed: {message}")]
    Request { adapter: String, message: String },
    #[error("{adapter} returned HTTP {status}")]
    Status { adapter: String, status: u16 },
    #[error("{adapter} returned unreadable data: {message}")]
    Parse { adapter: String, message: String },
}

impl AdapterError {
    /// Map a reqwest error, keeping timeouts distinguishable.
    pub(crate) fn from_reqwest(adapter: &str, timeout: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                adapter: adapter.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }
        } else if err.is_decode() {
            Self::Parse {
                adapter: adapter.to_string(),
                message: err.to_string(),
            }
        } else {
            Self::Request {
                adapter: adapter.to_string(),
                message: err.to_string(),
            }
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// A source of raw results for a query.
#[async_trait]
pub trait RetrievalAdapter: Send + Sync {
    /// Stable name used in config, logs, and degraded-adapter reports.
    fn name(&self) -> &str;

    /// Fetch results for `query`, finishing within `timeout`.
    async fn fetch(&self, query: &str, timeout: Duration) -> Result<Vec<RawResult>, AdapterError>;
}

pub(crate) fn http_client() -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("deepsearch/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::limited(5))
        .build()?;
    Ok(client)
}

/// Build the adapters named in config. Unknown names are a startup error.
pub fn build_adapters(config: &RetrievalConfig) -> anyhow::Result<Vec<Arc<dyn RetrievalAdapter>>> {
    let client = http_client()?;
    let max_results = config.max_results_per_adapter.max(1);

    let mut adapters: Vec<Arc<dyn RetrievalAdapter>> = Vec::new();
    for name in &config.adapters {
        let adapter: Arc<dyn RetrievalAdapter> = match name.as_str() {
            "duckduckgo" => Arc::new(DuckDuckGoAdapter::new(client.clone(), max_results)),
            "wikipedia" => Arc::new(WikipediaAdapter::new(client.clone())),
            "scrape" => Arc::new(PageScrapeAdapter::new(client.clone(), max_results)),
            other => anyhow::bail!(
                "unknown retrieval adapter '{other}' (expected duckduckgo, wikipedia or scrape)"
            ),
        };
        if adapters.iter().any(|a| a.name() == adapter.name()) {
            anyhow::bail!("retrieval adapter '{name}' listed twice");
        }
        adapters.push(adapter);
    }
    Ok(adapters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_configured_adapters_in_order() {
        let config = RetrievalConfig::default();
        let adapters = build_adapters(&config).unwrap();
        let names: Vec<&str> = adapters.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["duckduckgo", "wikipedia", "scrape"]);
    }

    #[test]
    fn rejects_unknown_adapter() {
        let config = RetrievalConfig {
            adapters: vec!["bing".into()],
            ..RetrievalConfig::default()
        };
        let err = build_adapters(&config).err().unwrap();
        assert!(err.to_string().contains("unknown retrieval adapter 'bing'"));
    }

    #[test]
    fn rejects_duplicate_adapter() {
        let config = RetrievalConfig {
            adapters: vec!["wikipedia".into(), "wikipedia".into()],
            ..RetrievalConfig::default()
        };
        assert!(build_adapters(&config).is_err());
    }
}

//! Wikipedia adapter: top search hit, then its plain-text intro.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::adapter::{AdapterError, RetrievalAdapter};
use crate::evidence::RawResult;

const NAME: &str = "wikipedia";
const API: &str = "https://en.wikipedia.org/w/api.php";

pub struct WikipediaAdapter {
    client: reqwest::Client,
}

impl WikipediaAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn get_json(
        &self,
        params: &[(&str, String)],
        timeout: Duration,
    ) -> Result<Value, AdapterError> {
        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let response = self
            .client
            .get(format!("{API}?{query}"))
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| AdapterError::from_reqwest(NAME, timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::Status {
                adapter: NAME.into(),
                status: status.as_u16(),
            });
        }
        response
            .json()
            .await
            .map_err(|e| AdapterError::from_reqwest(NAME, timeout, e))
    }
}

#[async_trait]
impl RetrievalAdapter for WikipediaAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(&self, query: &str, timeout: Duration) -> Result<Vec<RawResult>, AdapterError> {
        let started = tokio::time::Instant::now();

        let search = self
            .get_json(
                &[
                    ("action", "query".into()),
                    ("format", "json".into()),
                    ("list", "search".into()),
                    ("srsearch", query.into()),
                    ("utf8", "1".into()),
                    ("srlimit", "1".into()),
                ],
                timeout,
            )
            .await?;

        let Some(page_id) = top_page_id(&search) else {
            tracing::debug!(adapter = NAME, query, "no articles found");
            return Ok(Vec::new());
        };

        // Both requests share the caller's budget.
        let remaining = timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(AdapterError::Timeout {
                adapter: NAME.into(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }

        let extract = self
            .get_json(
                &[
                    ("action", "query".into()),
                    ("format", "json".into()),
                    ("prop", "extracts".into()),
                    ("pageids", page_id.to_string()),
                    ("exintro", "1".into()),
                    ("explaintext", "1".into()),
                ],
                remaining,
            )
            .await?;

        Ok(parse_extract(&extract, page_id).into_iter().collect())
    }
}

fn top_page_id(search: &Value) -> Option<u64> {
    search
        .pointer("/query/search/0/pageid")
        .and_then(Value::as_u64)
}

fn parse_extract(body: &Value, page_id: u64) -> Option<RawResult> {
    let page = body.pointer(&format!("/query/pages/{page_id}"))?;
    let extract = page.get("extract").and_then(Value::as_str)?.trim();
    if extract.is_empty() {
        return None;
    }
    let mut raw = RawResult::new(
        NAME,
        format!("https://en.wikipedia.org/?curid={page_id}"),
        extract,
        0.7,
    );
    if let Some(title) = page.get("title").and_then(Value::as_str) {
        raw = raw.with_title(title);
    }
    Some(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_top_hit() {
        let body = json!({"query": {"search": [{"pageid": 22989, "title": "Paris"}]}});
        assert_eq!(top_page_id(&body), Some(22989));
        assert_eq!(top_page_id(&json!({"query": {"search": []}})), None);
    }

    #[test]
    fn parses_intro_extract() {
        let body = json!({"query": {"pages": {"22989": {
            "pageid": 22989,
            "title": "Paris",
            "extract": "Paris is the capital of France."
        }}}});
        let raw = parse_extract(&body, 22989).unwrap();
        assert_eq!(raw.title.as_deref(), Some("Paris"));
        assert_eq!(raw.source_id, "https://en.wikipedia.org/?curid=22989");
        assert_eq!(raw.adapter, "wikipedia");
    }

    #[test]
    fn blank_extract_is_dropped() {
        let body = json!({"query": {"pages": {"1": {"title": "X", "extract": "  "}}}});
        assert!(parse_extract(&body, 1).is_none());
    }
}

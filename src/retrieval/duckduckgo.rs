//! DuckDuckGo instant-answer adapter (no API key).

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::adapter::{AdapterError, RetrievalAdapter};
use crate::evidence::RawResult;

const NAME: &str = "duckduckgo";
const ENDPOINT: &str = "https://api.duckduckgo.com/";

pub struct DuckDuckGoAdapter {
    client: reqwest::Client,
    max_results: usize,
}

impl DuckDuckGoAdapter {
    pub fn new(client: reqwest::Client, max_results: usize) -> Self {
        Self {
            client,
            max_results,
        }
    }
}

#[async_trait]
impl RetrievalAdapter for DuckDuckGoAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(&self, query: &str, timeout: Duration) -> Result<Vec<RawResult>, AdapterError> {
        let url = format!(
            "{ENDPOINT}?q={}&format=json&no_html=1&skip_disambig=1",
            urlencoding::encode(query)
        );

        let response = self
            .client
            .get(&url)
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

        let body: Value = response
            .json()
            .await
            .map_err(|e| AdapterError::from_reqwest(NAME, timeout, e))?;

        let results = parse_instant_answer(&body, self.max_results);
        tracing::debug!(adapter = NAME, count = results.len(), "instant answers parsed");
        Ok(results)
    }
}

/// Abstract first, then related topics and results in listed order.
/// Confidence steps down with position.
fn parse_instant_answer(body: &Value, max_results: usize) -> Vec<RawResult> {
    let mut results = Vec::new();

    if let Some(text) = non_empty(body, "AbstractText") {
        let url = non_empty(body, "AbstractURL").unwrap_or(ENDPOINT);
        let mut raw = RawResult::new(NAME, url, text, 0.8);
        if let Some(heading) = non_empty(body, "Heading").or_else(|| non_empty(body, "AbstractSource")) {
            raw = raw.with_title(heading);
        }
        results.push(raw);
    }

    if let Some(text) = non_empty(body, "Answer") {
        results.push(RawResult::new(NAME, ENDPOINT, text, 0.75).with_title("Instant answer"));
    }

    let topics = ["Results", "RelatedTopics"]
        .iter()
        .filter_map(|field| body.get(field).and_then(Value::as_array))
        .flatten()
        // Grouped related topics nest their entries under "Topics".
        .flat_map(|topic| match topic.get("Topics").and_then(Value::as_array) {
            Some(nested) => nested.iter().collect::<Vec<_>>(),
            None => vec![topic],
        });

    for (rank, topic) in topics.enumerate() {
        if results.len() >= max_results {
            break;
        }
        let Some(text) = non_empty(topic, "Text") else {
            continue;
        };
        let url = non_empty(topic, "FirstURL").unwrap_or(ENDPOINT);
        let confidence = (0.6 - 0.05 * rank as f64).max(0.3);
        results.push(RawResult::new(NAME, url, text, confidence));
    }

    results.truncate(max_results);
    results
}

fn non_empty<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn abstract_ranks_first() {
        let body = json!({
            "Heading": "Paris",
            "AbstractText": "Paris is the capital and largest city of France.",
            "AbstractURL": "https://en.wikipedia.org/wiki/Paris",
            "RelatedTopics": [
                {"Text": "Paris Agreement", "FirstURL": "https://duckduckgo.com/Paris_Agreement"}
            ]
        });
        let results = parse_instant_answer(&body, 3);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].source_id, "https://en.wikipedia.org/wiki/Paris");
        assert_eq!(results[0].title.as_deref(), Some("Paris"));
        assert!(results[0].confidence > results[1].confidence);
    }

    #[test]
    fn nested_topics_are_flattened_and_capped() {
        let body = json!({
            "AbstractText": "",
            "RelatedTopics": [
                {"Name": "Group", "Topics": [
                    {"Text": "one", "FirstURL": "https://a"},
                    {"Text": "two", "FirstURL": "https://b"}
                ]},
                {"Text": "three", "FirstURL": "https://c"}
            ]
        });
        let results = parse_instant_answer(&body, 2);
        let texts: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[test]
    fn empty_body_yields_nothing() {
        assert!(parse_instant_answer(&json!({}), 3).is_empty());
    }
}

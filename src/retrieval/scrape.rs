//! Page scrape adapter: reads URLs that appear in the query itself.

use async_trait::async_trait;
use futures::future::join_all;
use std::time::Duration;

use super::adapter::{AdapterError, RetrievalAdapter};
use crate::evidence::RawResult;

const NAME: &str = "scrape";

/// Page text is capped to keep the model context bounded.
pub const MAX_PAGE_CHARS: usize = 3000;

pub struct PageScrapeAdapter {
    client: reqwest::Client,
    max_pages: usize,
}

impl PageScrapeAdapter {
    pub fn new(client: reqwest::Client, max_pages: usize) -> Self {
        Self { client, max_pages }
    }

    async fn scrape(&self, url: &str, timeout: Duration) -> Result<RawResult, AdapterError> {
        let response = self
            .client
            .get(url)
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

        let is_html = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/html") || ct.contains("application/xhtml"))
            .unwrap_or(true);

        let body = response
            .text()
            .await
            .map_err(|e| AdapterError::from_reqwest(NAME, timeout, e))?;

        let text = if is_html { extract_text_from_html(&body) } else { body };
        let text = cap_chars(&text, MAX_PAGE_CHARS);
        Ok(RawResult::new(NAME, url, text, 0.6).with_title(url))
    }
}

#[async_trait]
impl RetrievalAdapter for PageScrapeAdapter {
    fn name(&self) -> &str {
        NAME
    }

    async fn fetch(&self, query: &str, timeout: Duration) -> Result<Vec<RawResult>, AdapterError> {
        let urls: Vec<&str> = extract_urls(query).into_iter().take(self.max_pages).collect();
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let outcomes = join_all(urls.iter().map(|url| self.scrape(url, timeout))).await;

        let mut results = Vec::new();
        let mut last_err = None;
        for (url, outcome) in urls.iter().zip(outcomes) {
            match outcome {
                Ok(raw) if !raw.text.trim().is_empty() => results.push(raw),
                Ok(_) => tracing::debug!(adapter = NAME, url, "page had no readable text"),
                Err(e) => {
                    tracing::debug!(adapter = NAME, url, error = %e, "page fetch failed");
                    last_err = Some(e);
                }
            }
        }

        // Only an error when nothing could be read.
        match (results.is_empty(), last_err) {
            (true, Some(e)) => Err(e),
            _ => Ok(results),
        }
    }
}

/// `http(s)://` tokens in the text, trailing punctuation trimmed.
pub fn extract_urls(text: &str) -> Vec<&str> {
    let mut urls: Vec<&str> = Vec::new();
    for token in text.split_whitespace() {
        let token = token.trim_start_matches(['(', '<', '"', '\'']);
        if !(token.starts_with("http://") || token.starts_with("https://")) {
            continue;
        }
        let url = token.trim_end_matches(['.', ',', ';', ':', '!', '?', ')', '>', '"', '\'']);
        if url.len() > "https://".len() && !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

fn cap_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Strip markup and return readable text, one block per line.
///
/// Content inside script, style, nav, header and footer elements is dropped.
pub fn extract_text_from_html(html: &str) -> String {
    const SKIPPED: [&str; 5] = ["script", "style", "nav", "header", "footer"];
    const BLOCKS: [&str; 13] = [
        "p", "br", "div", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "section", "article",
    ];

    let mut text = String::new();
    let mut in_tag = false;
    let mut building_tag = false;
    let mut tag_name = String::new();
    let mut skip_depth = 0usize;

    for ch in html.chars() {
        if ch == '<' {
            in_tag = true;
            building_tag = true;
            tag_name.clear();
            continue;
        }
        if ch == '>' && in_tag {
            in_tag = false;
            building_tag = false;

            let tag = tag_name.to_lowercase();
            let (closing, name) = match tag.strip_prefix('/') {
                Some(name) => (true, name),
                None => (false, tag.as_str()),
            };
            if SKIPPED.contains(&name) {
                if closing {
                    skip_depth = skip_depth.saturating_sub(1);
                } else {
                    skip_depth += 1;
                }
            }
            if BLOCKS.contains(&name) {
                text.push('\n');
            }
            continue;
        }
        if in_tag {
            if building_tag && (ch.is_alphanumeric() || ch == '/') {
                tag_name.push(ch);
            } else {
                building_tag = false;
            }
            continue;
        }
        if skip_depth > 0 {
            continue;
        }
        text.push(ch);
    }

    let text = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

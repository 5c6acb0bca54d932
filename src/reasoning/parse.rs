//! Parsing of structured model output.
//!
//! The model must reply with one JSON object tagged by `action`. Markdown
//! fences and stray prose around the object are tolerated.

use serde::Deserialize;

use crate::evidence::CitationHandle;

/// Decoded model reply before citation validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelAction {
    Search { query: String },
    Answer { text: String, citations: Vec<CitationHandle> },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
enum Wire {
    Search {
        query: String,
    },
    Answer {
        answer: String,
        #[serde(default)]
        citations: Vec<CitationRef>,
    },
}

/// Models write citations as `1`, `"1"`, or `"[1]"`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CitationRef {
    Number(u32),
    Text(String),
}

impl CitationRef {
    fn handle(&self) -> Option<CitationHandle> {
        match self {
            Self::Number(n) => Some(CitationHandle(*n)),
            Self::Text(s) => s
                .trim()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .trim()
                .parse()
                .ok()
                .map(CitationHandle),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("reply contains no JSON object")]
    NoJson,
    #[error("reply is not a valid action object: {0}")]
    Invalid(String),
    #[error("search action has an empty query")]
    EmptyQuery,
    #[error("answer action has empty text")]
    EmptyAnswer,
    #[error("citation entry {0:?} is not a handle number")]
    BadCitation(String),
}

/// Decode a model reply. Citations are the declared list merged with inline
/// `[n]` markers, ordered by first inline use.
pub fn parse_action(raw: &str) -> Result<ModelAction, ParseError> {
    let json = extract_json_object(raw).ok_or(ParseError::NoJson)?;
    let wire: Wire =
        serde_json::from_str(json).map_err(|e| ParseError::Invalid(e.to_string()))?;

    match wire {
        Wire::Search { query } => {
            let query = query.trim();
            if query.is_empty() {
                return Err(ParseError::EmptyQuery);
            }
            Ok(ModelAction::Search {
                query: query.to_string(),
            })
        }
        Wire::Answer { answer, citations } => {
            let text = answer.trim();
            if text.is_empty() {
                return Err(ParseError::EmptyAnswer);
            }
            let mut declared = Vec::with_capacity(citations.len());
            for c in &citations {
                match c.handle() {
                    Some(h) => declared.push(h),
                    None => return Err(ParseError::BadCitation(format!("{c:?}"))),
                }
            }
            Ok(ModelAction::Answer {
                text: text.to_string(),
                citations: merge_citations(&inline_citations(text), &declared),
            })
        }
    }
}

/// Inline first (in order of first use), then declared-only handles.
fn merge_citations(inline: &[CitationHandle], declared: &[CitationHandle]) -> Vec<CitationHandle> {
    let mut out: Vec<CitationHandle> = Vec::new();
    for h in inline.iter().chain(declared) {
        if !out.contains(h) {
            out.push(*h);
        }
    }
    out
}

/// Handles referenced as `[n]` or `[n, m]` in text, in order of first use.
pub fn inline_citations(text: &str) -> Vec<CitationHandle> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else {
            break;
        };
        let inner = &after[..close];
        let parsed: Option<Vec<u32>> = inner
            .split(',')
            .map(|part| part.trim().parse::<u32>().ok())
            .collect();
        if let Some(numbers) = parsed {
            for n in numbers {
                let h = CitationHandle(n);
                if !out.contains(&h) {
                    out.push(h);
                }
            }
            rest = &after[close + 1..];
        } else {
            // Not a marker; resume right after this bracket.
            rest = after;
        }
    }
    out
}

/// The outermost `{ ... }` span. Fences and prose around it are ignored.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

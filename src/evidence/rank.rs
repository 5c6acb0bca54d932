//! Evidence relevance scoring.

use chrono::{DateTime, Utc};

use super::RawResult;
use crate::config::EvidenceConfig;

/// Assigns a relevance score to a raw result at submission time.
pub trait EvidenceScorer: Send + Sync {
    fn score(&self, raw: &RawResult, now: DateTime<Utc>) -> f64;
}

/// Weighted sum of confidence, saturating length, and recency decay.
///
/// All weights are non-negative, so the score never decreases when
/// confidence increases and everything else is held fixed.
#[derive(Debug, Clone)]
pub struct WeightedScorer {
    confidence_weight: f64,
    length_weight: f64,
    recency_weight: f64,
    length_saturation_chars: usize,
    recency_half_life_secs: u64,
}

impl WeightedScorer {
    pub fn new(config: &EvidenceConfig) -> Self {
        Self {
            confidence_weight: config.confidence_weight.max(0.0),
            length_weight: config.length_weight.max(0.0),
            recency_weight: config.recency_weight.max(0.0),
            length_saturation_chars: config.length_saturation_chars.max(1),
            recency_half_life_secs: config.recency_half_life_secs.max(1),
        }
    }

    fn length_factor(&self, text: &str) -> f64 {
        let chars = text.chars().count() as f64;
        (chars / self.length_saturation_chars as f64).min(1.0)
    }

    /// 1.0 for undated or future sources, halving every half-life.
    fn recency_factor(&self, published_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
        let Some(published) = published_at else {
            return 1.0;
        };
        let age_secs = (now - published).num_seconds().max(0) as f64;
        0.5f64.powf(age_secs / self.recency_half_life_secs as f64)
    }
}

impl Default for WeightedScorer {
    fn default() -> Self {
        Self::new(&EvidenceConfig::default())
    }
}

impl EvidenceScorer for WeightedScorer {
    fn score(&self, raw: &RawResult, now: DateTime<Utc>) -> f64 {
        let confidence = if raw.confidence.is_finite() {
            raw.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.confidence_weight * confidence
            + self.length_weight * self.length_factor(&raw.text)
            + self.recency_weight * self.recency_factor(raw.published_at, now)
    }
}

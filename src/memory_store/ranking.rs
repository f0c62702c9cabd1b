//! Relevance ranking: recency (exponential decay) + pins + similarity,
//! combined with configurable weights (§4.3, Open Question (b)).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Weights applied to the three ranking signals. Treated as configuration,
/// not hard-coded precedence — the spec leaves the exact trade-off
/// unspecified (§9 Open Questions (b)).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RankingWeights {
    pub recency: f64,
    pub pin_bonus: f64,
    pub similarity: f64,
    /// Half-life, in seconds, of the exponential recency decay.
    pub recency_half_life_secs: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            recency: 0.3,
            pin_bonus: 0.5,
            similarity: 0.7,
            recency_half_life_secs: 3_600.0,
        }
    }
}

impl RankingWeights {
    pub fn score(&self, similarity: f32, pinned: bool, written_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        let age_secs = (now - written_at).num_milliseconds().max(0) as f64 / 1000.0;
        let recency_score = 0.5_f64.powf(age_secs / self.recency_half_life_secs.max(1.0));
        let pin_score = if pinned { 1.0 } else { 0.0 };
        self.recency * recency_score + self.pin_bonus * pin_score + self.similarity * similarity as f64
    }
}

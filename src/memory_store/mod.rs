//! MemoryStore: Cache, Runtime, and Vector tiers behind one interface
//! (§4.3). Read by the ContextAssembler; written by the Orchestrator
//! (post-step distillation) and the AgentRunner (memory-write actions).

pub mod cache;
pub mod ranking;
pub mod runtime;
pub mod vector;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cache::CacheTier;
pub use ranking::RankingWeights;
pub use runtime::RuntimeTier;
pub use vector::VectorTier;

use crate::session::SessionKey;

/// One memory record. `embedding` is only meaningful for the Vector tier;
/// Cache/Runtime entries may simply leave it `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub key: String,
    pub value: serde_json::Value,
    pub embedding: Option<Vec<f32>>,
    pub pinned: bool,
    pub written_at: DateTime<Utc>,
}

impl MemoryItem {
    pub fn new(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            value,
            embedding: None,
            pinned: false,
            written_at: Utc::now(),
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryTier {
    Cache,
    Runtime,
    Vector,
}

#[derive(Debug, Error)]
#[cfg_attr(feature = "diagnostics", derive(miette::Diagnostic))]
pub enum MemoryStoreError {
    #[error("the cache tier does not support similarity search")]
    #[cfg_attr(feature = "diagnostics", diagnostic(code(agentloom::memory_store::unsupported)))]
    UnsupportedOperation,
}

pub type Result<T> = std::result::Result<T, MemoryStoreError>;

/// Unified façade over the three memory tiers (§4.3).
pub struct MemoryStore {
    cache: CacheTier,
    runtime: RuntimeTier,
    vector: VectorTier,
    weights: RankingWeights,
}

impl MemoryStore {
    pub fn new(cache_ttl: Duration, weights: RankingWeights) -> Self {
        Self {
            cache: CacheTier::new(cache_ttl),
            runtime: RuntimeTier::default(),
            vector: VectorTier::default(),
            weights,
        }
    }

    pub fn put(&self, tier: MemoryTier, session: &SessionKey, item: MemoryItem) {
        match tier {
            MemoryTier::Cache => self.cache.put(item.key.clone(), item.value),
            MemoryTier::Runtime => self.runtime.put(session, item),
            MemoryTier::Vector => self.vector.put(item),
        }
    }

    pub fn get(&self, tier: MemoryTier, session: &SessionKey, key: &str) -> Option<MemoryItem> {
        match tier {
            MemoryTier::Cache => self.cache.get(key).map(|v| MemoryItem::new(key, v)),
            MemoryTier::Runtime => self.runtime.get(session, key),
            MemoryTier::Vector => self.vector.get(key),
        }
    }

    /// Top-k over the Runtime + Vector tiers by combined rank (§4.3):
    /// recency, pins, and — when `query_embedding` is given — similarity.
    /// The Cache tier is excluded: it is for raw tool/prompt scratch, not
    /// semantically searchable context.
    pub fn search(
        &self,
        session: &SessionKey,
        query_embedding: Option<&[f32]>,
        k: usize,
        min_score: f64,
    ) -> Vec<(MemoryItem, f64)> {
        let now = Utc::now();
        let mut candidates: Vec<MemoryItem> = self.runtime.all(session);
        candidates.extend(self.vector_candidates(query_embedding, k * 4));

        let mut scored: Vec<(MemoryItem, f64)> = candidates
            .into_iter()
            .map(|item| {
                let similarity = query_embedding
                    .and_then(|q| item.embedding.as_deref().map(|e| vector::cosine_similarity(q, e)))
                    .unwrap_or(0.0);
                let score = self.weights.score(similarity, item.pinned, item.written_at, now);
                (item, score)
            })
            .filter(|(_, score)| *score >= min_score)
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        scored
    }

    fn vector_candidates(&self, query_embedding: Option<&[f32]>, k: usize) -> Vec<MemoryItem> {
        match query_embedding {
            Some(q) => self.vector.search_similar(q, k).into_iter().map(|(i, _)| i).collect(),
            None => Vec::new(),
        }
    }

    pub fn pin_runtime(&self, session: &SessionKey, key: &str) {
        self.runtime.pin(session, key);
    }

    pub fn clear_session(&self, session: &SessionKey) {
        self.runtime.clear(session);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(300), RankingWeights::default())
    }
}

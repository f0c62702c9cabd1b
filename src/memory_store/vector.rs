//! Vector tier (§4.3): cross-session long-term store, content-addressed by
//! embedding, cosine-similarity top-k — grounded on the pack's RAG store
//! (`ChunkRecord` + `search_similar`), minus the on-disk backend: this tier
//! is process-local and in-memory, matching the Checkpointer being the
//! crate's only durable boundary.

use parking_lot::RwLock;

use super::MemoryItem;

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[derive(Default)]
pub struct VectorTier {
    items: RwLock<Vec<MemoryItem>>,
}

impl VectorTier {
    pub fn put(&self, item: MemoryItem) {
        let mut items = self.items.write();
        if let Some(existing) = items.iter_mut().find(|i| i.key == item.key) {
            *existing = item;
        } else {
            items.push(item);
        }
    }

    pub fn get(&self, key: &str) -> Option<MemoryItem> {
        self.items.read().iter().find(|i| i.key == key).cloned()
    }

    /// Top-k by cosine similarity against `query_embedding`. Items without
    /// an embedding never match.
    pub fn search_similar(&self, query_embedding: &[f32], k: usize) -> Vec<(MemoryItem, f32)> {
        let items = self.items.read();
        let mut scored: Vec<(MemoryItem, f32)> = items
            .iter()
            .filter_map(|item| {
                let embedding = item.embedding.as_ref()?;
                Some((item.clone(), cosine_similarity(query_embedding, embedding)))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        scored
    }
}

//! Similarity index boundary: a black-box vector index. The
//! in-memory cosine implementation is the reference/test backend, not a
//! production vector store.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::CoreResult;
use crate::ids::DocumentId;

pub type Vector = Vec<f32>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub document_id: DocumentId,
    pub score: f64,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    async fn upsert(
        &self,
        document_id: DocumentId,
        vector: Vector,
        payload: serde_json::Value,
        excerpt: String,
    ) -> CoreResult<()>;

    async fn delete(&self, document_id: DocumentId) -> CoreResult<()>;

    /// Results are descending by score; every returned hit satisfies
    /// `score >= score_threshold`.
    async fn search(
        &self,
        vector: &Vector,
        k: usize,
        score_threshold: f64,
        filters: &HashMap<String, serde_json::Value>,
    ) -> CoreResult<Vec<SearchHit>>;
}

struct Entry {
    vector: Vector,
    payload: serde_json::Value,
    #[allow(dead_code)]
    excerpt: String,
}

#[derive(Default)]
pub struct InMemorySimilarityIndex {
    entries: RwLock<HashMap<DocumentId, Entry>>,
}

impl InMemorySimilarityIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f64
}

fn matches_filters(payload: &serde_json::Value, filters: &HashMap<String, serde_json::Value>) -> bool {
    filters
        .iter()
        .all(|(k, v)| payload.get(k).map(|p| p == v).unwrap_or(false))
}

#[async_trait]
impl SimilarityIndex for InMemorySimilarityIndex {
    async fn upsert(
        &self,
        document_id: DocumentId,
        vector: Vector,
        payload: serde_json::Value,
        excerpt: String,
    ) -> CoreResult<()> {
        self.entries.write().insert(
            document_id,
            Entry {
                vector,
                payload,
                excerpt,
            },
        );
        Ok(())
    }

    async fn delete(&self, document_id: DocumentId) -> CoreResult<()> {
        self.entries.write().remove(&document_id);
        Ok(())
    }

    async fn search(
        &self,
        vector: &Vector,
        k: usize,
        score_threshold: f64,
        filters: &HashMap<String, serde_json::Value>,
    ) -> CoreResult<Vec<SearchHit>> {
        let entries = self.entries.read();
        let mut hits: Vec<SearchHit> = entries
            .iter()
            .filter(|(_, e)| matches_filters(&e.payload, filters))
            .map(|(id, e)| SearchHit {
                document_id: *id,
                score: cosine_similarity(vector, &e.vector),
                payload: e.payload.clone(),
            })
            .filter(|h| h.score >= score_threshold)
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }
}

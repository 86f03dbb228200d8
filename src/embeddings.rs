//! Embedding provider boundary: deterministic for identical text and model.
//! The stub implementation here derives a low-dimensional
//! vector from a SHA-256 digest — a stand-in for a real embedding service,
//! not a production model.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::CoreResult;
use crate::similarity::Vector;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> CoreResult<Vector>;

    async fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vector>> {
        let mut out = Vec::with_capacity(texts.len());
        for t in texts {
            out.push(self.embed(t).await?);
        }
        Ok(out)
    }
}

pub struct HashEmbeddingProvider {
    dimensions: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(32)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> CoreResult<Vector> {
        let mut vector = Vec::with_capacity(self.dimensions);
        let mut counter: u32 = 0;
        while vector.len() < self.dimensions {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for chunk in digest.chunks(4) {
                if vector.len() == self.dimensions {
                    break;
                }
                let mut buf = [0u8; 4];
                buf[..chunk.len()].copy_from_slice(chunk);
                let v = u32::from_le_bytes(buf) as f32 / u32::MAX as f32;
                vector.push(v * 2.0 - 1.0);
            }
            counter += 1;
        }
        Ok(vector)
    }
}

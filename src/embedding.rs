//! Text embedders for entity similarity search.
//!
//! Two implementations behind one trait: a deterministic character-level
//! embedder that needs no network (the default for entity values, which are
//! short strings where surface similarity is what matters), and a REST client
//! for a hosted embedding model.

use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use tracing::debug;

/// Embedding vector.
pub type Embedding = Vec<f32>;

/// Dimension of the character-level embedder.
pub const CHAR_GRAM_DIM: usize = 128;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Embedding>;

    fn dimension(&self) -> usize;
}

/// Character-level embedder: frequency, bigram and position-weighted buckets,
/// normalized to a unit vector so cosine similarity is a dot product.
#[derive(Debug, Default, Clone)]
pub struct CharGramEmbedder;

impl CharGramEmbedder {
    pub fn new() -> Self {
        Self
    }

    fn embed_sync(text: &str) -> Embedding {
        let mut embedding = vec![0.0f32; CHAR_GRAM_DIM];
        let lower = text.to_lowercase();

        // Character frequency buckets (first 64 dimensions)
        for ch in lower.chars() {
            let idx = (ch as usize) % 64;
            embedding[idx] += 1.0;
        }

        // Character bigram buckets (next 32 dimensions)
        let chars: Vec<char> = lower.chars().collect();
        for i in 0..chars.len().saturating_sub(1) {
            let bigram = (chars[i] as usize) * 31 + (chars[i + 1] as usize);
            let idx = 64 + (bigram % 32);
            embedding[idx] += 1.0;
        }

        // Position-weighted buckets (last 32 dimensions); earlier characters
        // dominate so shared prefixes score high.
        for (i, ch) in lower.chars().enumerate() {
            let weight = 1.0 / (i + 1) as f32;
            let idx = 96 + ((ch as usize) % 32);
            embedding[idx] += weight;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for e in &mut embedding {
                *e /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl Embedder for CharGramEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(Self::embed_sync(text))
    }

    fn dimension(&self) -> usize {
        CHAR_GRAM_DIM
    }
}

/// REST embedding client (OpenAI-compatible `/embeddings` endpoint).
pub struct OpenAiEmbedder {
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, base_url: String, model: String, dimension: usize) -> Self {
        Self {
            api_key,
            base_url,
            model,
            dimension,
        }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let client = reqwest::Client::new();
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let response = client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::Embedding(format!("Embedding API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AssistantError::Embedding(format!(
                "Embedding API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AssistantError::Embedding(format!("Failed to parse embedding response: {}", e)))?;

        let embedding: Embedding = response_json
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|arr| arr.first())
            .and_then(|entry| entry.get("embedding"))
            .and_then(|e| e.as_array())
            .ok_or_else(|| AssistantError::Embedding("No embedding vector in response".to_string()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        debug!(model = %self.model, dim = embedding.len(), "embedded text");
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Cosine similarity between two vectors; 0.0 on dimension mismatch or a
/// zero-norm side.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a > 0.0 && norm_b > 0.0 {
        (dot / (norm_a * norm_b)) as f64
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_gram_is_unit_vector() {
        let embedding = CharGramEmbedder::embed_sync("Rosalinda Rodriguez");
        assert_eq!(embedding.len(), CHAR_GRAM_DIM);
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_similar_names_score_higher_than_unrelated() {
        let a = CharGramEmbedder::embed_sync("Rosalinda Rodriguez");
        let b = CharGramEmbedder::embed_sync("Rosalinda Rodriguz");
        let c = CharGramEmbedder::embed_sync("payroll period");

        let close = cosine_similarity(&a, &b);
        let far = cosine_similarity(&a, &c);
        assert!(close > 0.9, "close = {}", close);
        assert!(far < close);
    }

    #[test]
    fn test_cosine_handles_mismatched_dimensions() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }
}

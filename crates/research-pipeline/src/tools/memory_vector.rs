//! In-process vector store and embedder

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::hash::{DefaultHasher, Hash, Hasher};
use tokio::sync::RwLock;

use super::{Embedder, VectorHit, VectorStore};
use crate::error::PipelineError;

#[derive(Debug, Clone)]
struct Entry {
    content: String,
    embedding: Vec<f32>,
    metadata: serde_json::Value,
}

fn tokens(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

/// Share of query terms that appear in `content`
fn overlap_score(query: &BTreeSet<String>, content: &str) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let content = tokens(content);
    let matched = query.iter().filter(|t| content.contains(*t)).count();
    matched as f64 / query.len() as f64
}

/// Vector store held in memory, scored by term overlap
///
/// Embeddings are kept with each entry but search ranks by the share of query terms
/// found in the stored text, which needs no embedding of the query.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry without an embedding
    pub async fn insert(&self, id: impl Into<String>, content: impl Into<String>) {
        self.entries.write().await.insert(
            id.into(),
            Entry {
                content: content.into(),
                embedding: Vec::new(),
                metadata: serde_json::Value::Null,
            },
        );
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn embedding(&self, id: &str) -> Option<Vec<f32>> {
        self.entries.read().await.get(id).map(|e| e.embedding.clone())
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
        score_threshold: Option<f64>,
    ) -> Result<Vec<VectorHit>, PipelineError> {
        let query = tokens(query);
        let threshold = score_threshold.unwrap_or(0.0);

        let mut hits: Vec<VectorHit> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(id, entry)| VectorHit {
                id: id.clone(),
                content: entry.content.clone(),
                score: overlap_score(&query, &entry.content),
                metadata: entry.metadata.clone(),
            })
            .filter(|hit| hit.score > 0.0 && hit.score >= threshold)
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn upsert(
        &self,
        id: &str,
        content: &str,
        embedding: &[f32],
        metadata: Option<serde_json::Value>,
    ) -> Result<(), PipelineError> {
        self.entries.write().await.insert(
            id.to_string(),
            Entry {
                content: content.to_string(),
                embedding: embedding.to_vec(),
                metadata: metadata.unwrap_or(serde_json::Value::Null),
            },
        );
        Ok(())
    }
}

/// Feature-hashing embedder producing L2-normalized term vectors
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in tokens(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() % self.dimensions as u64) as usize;
            vector[bucket] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_ranks_by_overlap() {
        let store = MemoryVectorStore::new();
        store.insert("a", "Quantum computers use qubits").await;
        store.insert("b", "Qubits and quantum error correction in quantum computing").await;
        store.insert("c", "Classical sorting algorithms").await;

        let hits = store.search("quantum error correction", 5, None).await.unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "b");
        assert!((hits[0].score - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_search_applies_threshold_and_top_k() {
        let store = MemoryVectorStore::new();
        store.insert("a", "alpha beta").await;
        store.insert("b", "alpha gamma").await;
        store.insert("c", "alpha beta gamma").await;

        let hits = store.search("alpha beta gamma", 1, None).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "c");

        let hits = store.search("alpha beta gamma", 5, Some(0.9)).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_entry() {
        let store = MemoryVectorStore::new();
        store.upsert("id", "old text", &[1.0], None).await.unwrap();
        store
            .upsert("id", "new text", &[0.5, 0.5], Some(serde_json::json!({"k": 1})))
            .await
            .unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.embedding("id").await, Some(vec![0.5, 0.5]));
        let hits = store.search("new", 1, None).await.unwrap();
        assert_eq!(hits[0].metadata["k"], 1);
    }

    #[tokio::test]
    async fn test_hashing_embedder_is_normalized() {
        let embedder = HashingEmbedder::new(16);
        let vector = embedder.embed("rust ownership borrowing").await.unwrap();
        assert_eq!(vector.len(), 16);
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);

        let empty = embedder.embed("").await.unwrap();
        assert!(empty.iter().all(|v| *v == 0.0));
    }
}

//! Per-category entity similarity index.
//!
//! Canonical database values are stored with a dense embedding, one partition
//! per entity category. Partitions are concurrent maps keyed by a stable id
//! derived from the value text, so an overlapping reindex and live search
//! traffic coexist with last-write-wins semantics rather than locking.

use crate::embedding::{cosine_similarity, Embedder, Embedding};
use crate::error::{AssistantError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Closed set of entity categories the index partitions by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityCategory {
    Person,
    Place,
    Activity,
    Department,
}

impl EntityCategory {
    pub const ALL: [EntityCategory; 4] = [
        EntityCategory::Person,
        EntityCategory::Place,
        EntityCategory::Activity,
        EntityCategory::Department,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityCategory::Person => "person",
            EntityCategory::Place => "place",
            EntityCategory::Activity => "activity",
            EntityCategory::Department => "department",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "person" | "people" | "employee" | "employees" => Some(EntityCategory::Person),
            "place" | "places" | "location" | "locations" => Some(EntityCategory::Place),
            "activity" | "activities" => Some(EntityCategory::Activity),
            "department" | "departments" => Some(EntityCategory::Department),
            _ => None,
        }
    }
}

impl fmt::Display for EntityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One indexed canonical value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub text: String,
    pub category: EntityCategory,
    pub embedding: Embedding,
    pub metadata: HashMap<String, String>,
}

/// A similarity match for a query string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMatch {
    pub original_text: String,
    pub resolved_text: String,
    pub category: EntityCategory,
    pub confidence: f64,
    pub metadata: HashMap<String, String>,
}

pub struct EntityIndex {
    partitions: HashMap<EntityCategory, DashMap<String, EntityRecord>>,
    embedder: Arc<dyn Embedder>,
    confidence_threshold: f64,
    persist_dir: Option<PathBuf>,
}

impl EntityIndex {
    /// Create an index with one partition per category, loading any persisted
    /// partitions found under `persist_dir`.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        confidence_threshold: f64,
        persist_dir: Option<PathBuf>,
    ) -> Self {
        let mut partitions = HashMap::new();
        for category in EntityCategory::ALL {
            partitions.insert(category, DashMap::new());
        }

        let index = Self {
            partitions,
            embedder,
            confidence_threshold,
            persist_dir,
        };
        index.load_persisted();
        index
    }

    fn partition(&self, category: EntityCategory) -> &DashMap<String, EntityRecord> {
        // Partitions for every category are created in `new`.
        &self.partitions[&category]
    }

    fn partition_path(&self, category: EntityCategory) -> Option<PathBuf> {
        self.persist_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", category)))
    }

    fn load_persisted(&self) {
        for category in EntityCategory::ALL {
            let Some(path) = self.partition_path(category) else {
                return;
            };
            if !path.exists() {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(AssistantError::from)
                .and_then(|s| Ok(serde_json::from_str::<Vec<EntityRecord>>(&s)?))
            {
                Ok(records) => {
                    let partition = self.partition(category);
                    let count = records.len();
                    for record in records {
                        partition.insert(record.id.clone(), record);
                    }
                    info!(%category, count, "loaded persisted entity partition");
                }
                Err(e) => warn!(%category, error = %e, "failed to load persisted partition"),
            }
        }
    }

    /// Stable id for a value: category, text length and a text hash. A
    /// collision overwrites the previous record, which is tolerated because
    /// collisions are overwhelmingly duplicate values.
    fn record_id(category: EntityCategory, text: &str) -> String {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        format!("{}_{}_{}", category, text.len(), hasher.finish() % 10_000)
    }

    /// Embed and store a value. Last write wins on id collision.
    pub async fn insert(
        &self,
        text: &str,
        category: EntityCategory,
        metadata: HashMap<String, String>,
    ) -> Result<()> {
        let embedding = self.embedder.embed(text).await?;
        let record = EntityRecord {
            id: Self::record_id(category, text),
            text: text.to_string(),
            category,
            embedding,
            metadata,
        };
        debug!(%category, text, id = %record.id, "indexed entity");
        self.partition(category).insert(record.id.clone(), record);
        Ok(())
    }

    /// Search one category, excluding matches below the acceptance threshold.
    pub async fn search(
        &self,
        text: &str,
        category: EntityCategory,
        top_k: usize,
    ) -> Result<Vec<EntityMatch>> {
        self.search_with_threshold(text, category, top_k, self.confidence_threshold)
            .await
    }

    /// Search one category with an explicit confidence floor. The suggestion
    /// path passes 0.0 so near-misses surface.
    pub async fn search_with_threshold(
        &self,
        text: &str,
        category: EntityCategory,
        top_k: usize,
        min_confidence: f64,
    ) -> Result<Vec<EntityMatch>> {
        let partition = self.partition(category);
        if partition.is_empty() {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(text).await?;
        let query_lower = text.to_lowercase();

        let mut matches: Vec<EntityMatch> = Vec::new();
        for entry in partition.iter() {
            let record = entry.value();
            let confidence = Self::score(&query_embedding, &query_lower, record);
            if confidence >= min_confidence {
                matches.push(EntityMatch {
                    original_text: text.to_string(),
                    resolved_text: record.text.clone(),
                    category,
                    confidence,
                    metadata: record.metadata.clone(),
                });
            }
        }

        matches.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(top_k);

        debug!(%category, text, count = matches.len(), "similarity search");
        Ok(matches)
    }

    /// Vector confidence (1 − cosine distance) refined by string similarity.
    /// The refinement damps the high baseline cosine that character-level
    /// embeddings give arbitrary text pairs; exact and near matches keep
    /// scores close to 1.0.
    fn score(query_embedding: &[f32], query_lower: &str, record: &EntityRecord) -> f64 {
        let distance = 1.0 - cosine_similarity(query_embedding, &record.embedding);
        let vector_confidence = (1.0 - distance).clamp(0.0, 1.0);
        let string_confidence = strsim::jaro_winkler(query_lower, &record.text.to_lowercase());
        vector_confidence * string_confidence
    }

    /// Irreversibly clear a category partition and its persisted file.
    pub fn reset(&self, category: EntityCategory) -> Result<()> {
        self.partition(category).clear();
        if let Some(path) = self.partition_path(category) {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        info!(%category, "reset entity partition");
        Ok(())
    }

    /// Write one category partition to disk.
    pub fn persist(&self, category: EntityCategory) -> Result<()> {
        let Some(path) = self.partition_path(category) else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let records: Vec<EntityRecord> = self
            .partition(category)
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let encoded = serde_json::to_string(&records)?;
        std::fs::write(&path, encoded)?;
        debug!(%category, count = records.len(), "persisted entity partition");
        Ok(())
    }

    /// Whether a value is already indexed in a category (by stable id).
    pub fn contains(&self, category: EntityCategory, text: &str) -> bool {
        self.partition(category)
            .contains_key(&Self::record_id(category, text))
    }

    pub fn count(&self, category: EntityCategory) -> usize {
        self.partition(category).len()
    }

    /// Record counts per category.
    pub fn stats(&self) -> HashMap<EntityCategory, usize> {
        EntityCategory::ALL
            .into_iter()
            .map(|c| (c, self.count(c)))
            .collect()
    }
}

//! Assistant configuration
//!
//! Every tunable lives here as a named field rather than a string-keyed map,
//! loaded from the environment with the same variable names the deployment
//! scripts already use.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Result of validating a configuration or an indexing precondition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
        self.valid = false;
    }

    pub fn warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Directory for persisted entity index partitions.
    pub persist_dir: PathBuf,

    /// Minimum confidence for a similarity match to be accepted at all.
    pub confidence_threshold: f64,
    /// Minimum overall resolution confidence to trust the rewritten query.
    pub min_query_confidence: f64,
    /// Lower bound used when probing for "did you mean" candidates.
    pub exploration_threshold: f64,
    /// Suggestions returned per extracted mention.
    pub max_suggestions_per_entity: usize,

    /// Row cap appended to generated SELECT statements without a LIMIT.
    pub row_limit: u64,

    /// Generation model settings.
    pub model_api_key: String,
    pub model_base_url: String,
    pub model_name: String,
    pub embedding_model_name: String,

    /// Warehouse settings.
    pub warehouse_base_url: String,
    pub warehouse_user: String,
    pub warehouse_catalog: String,
    pub warehouse_schema: String,

    /// Bounded timeouts for the network-bound calls.
    pub generation_timeout_secs: u64,
    pub query_timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            persist_dir: PathBuf::from("data/entity_index"),
            confidence_threshold: 0.5,
            min_query_confidence: 0.3,
            exploration_threshold: 0.5,
            max_suggestions_per_entity: 3,
            row_limit: 80,
            model_api_key: String::new(),
            model_base_url: "https://api.openai.com/v1".to_string(),
            model_name: "gpt-4".to_string(),
            embedding_model_name: "text-embedding-3-small".to_string(),
            warehouse_base_url: "http://localhost:8080".to_string(),
            warehouse_user: "chronoquery".to_string(),
            warehouse_catalog: "hive".to_string(),
            warehouse_schema: "tms".to_string(),
            generation_timeout_secs: 30,
            query_timeout_secs: 60,
        }
    }
}

impl AssistantConfig {
    /// Build a config from the environment, falling back to defaults for
    /// anything unset. `dotenv` is loaded by the binary before this runs.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            persist_dir: env::var("VECTOR_DB_PERSIST_DIR")
                .map(PathBuf::from)
                .unwrap_or(d.persist_dir),
            confidence_threshold: env_f64("VECTOR_CONFIDENCE_THRESHOLD", d.confidence_threshold),
            min_query_confidence: env_f64("MIN_QUERY_CONFIDENCE", d.min_query_confidence),
            exploration_threshold: env_f64("EXPLORATION_THRESHOLD", d.exploration_threshold),
            max_suggestions_per_entity: env_usize(
                "MAX_SUGGESTIONS_PER_ENTITY",
                d.max_suggestions_per_entity,
            ),
            row_limit: env_u64("QUERY_ROW_LIMIT", d.row_limit),
            model_api_key: env::var("OPENAI_API_KEY").unwrap_or(d.model_api_key),
            model_base_url: env::var("OPENAI_BASE_URL").unwrap_or(d.model_base_url),
            model_name: env::var("GENERATION_MODEL_NAME").unwrap_or(d.model_name),
            embedding_model_name: env::var("EMBEDDING_MODEL_NAME").unwrap_or(d.embedding_model_name),
            warehouse_base_url: env::var("WAREHOUSE_BASE_URL").unwrap_or(d.warehouse_base_url),
            warehouse_user: env::var("WAREHOUSE_USER").unwrap_or(d.warehouse_user),
            warehouse_catalog: env::var("WAREHOUSE_CATALOG").unwrap_or(d.warehouse_catalog),
            warehouse_schema: env::var("WAREHOUSE_SCHEMA").unwrap_or(d.warehouse_schema),
            generation_timeout_secs: env_u64("GENERATION_TIMEOUT_SECS", d.generation_timeout_secs),
            query_timeout_secs: env_u64("QUERY_TIMEOUT_SECS", d.query_timeout_secs),
        }
    }

    /// Validate the configuration without touching any backend.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::ok();

        for (name, value) in [
            ("VECTOR_CONFIDENCE_THRESHOLD", self.confidence_threshold),
            ("MIN_QUERY_CONFIDENCE", self.min_query_confidence),
            ("EXPLORATION_THRESHOLD", self.exploration_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                report.error(format!("{} must be between 0.0 and 1.0", name));
            }
        }

        if self.max_suggestions_per_entity == 0 {
            report.error("MAX_SUGGESTIONS_PER_ENTITY must be at least 1");
        } else if self.max_suggestions_per_entity > 10 {
            report.warning("MAX_SUGGESTIONS_PER_ENTITY is greater than 10, may affect performance");
        }

        if self.row_limit == 0 {
            report.error("QUERY_ROW_LIMIT must be at least 1");
        }

        if self.generation_timeout_secs == 0 || self.query_timeout_secs == 0 {
            report.error("Timeouts must be non-zero");
        }

        if self.model_api_key.is_empty() {
            report.warning("OPENAI_API_KEY is not set; generation and remote embeddings are unavailable");
        }

        report
    }
}

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds_are_valid() {
        let report = AssistantConfig::default().validate();
        assert!(report.valid, "errors: {:?}", report.errors);
    }

    #[test]
    fn test_out_of_range_threshold_is_rejected() {
        let mut config = AssistantConfig::default();
        config.confidence_threshold = 1.5;
        let report = config.validate();
        assert!(!report.valid);
        assert!(report.errors[0].contains("VECTOR_CONFIDENCE_THRESHOLD"));
    }

    #[test]
    fn test_zero_suggestions_is_rejected() {
        let mut config = AssistantConfig::default();
        config.max_suggestions_per_entity = 0;
        assert!(!config.validate().valid);
    }
}

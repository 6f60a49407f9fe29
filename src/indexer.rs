//! Entity indexer: extracts canonical values from the warehouse and
//! populates the similarity index, one category at a time.
//!
//! Every operation reports a structured result instead of failing the batch:
//! a broken category records its errors and the remaining categories still
//! build.

use crate::config::ValidationReport;
use crate::index::{EntityCategory, EntityIndex};
use crate::warehouse::Warehouse;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};

/// How one category's canonical values are pulled out of the warehouse.
struct ExtractionSpec {
    category: EntityCategory,
    sql: &'static str,
    name_column: &'static str,
    /// Short alternative handles (location/activity codes) indexed as their
    /// own records, since users refer to them directly.
    extra_text_columns: &'static [&'static str],
    metadata_columns: &'static [&'static str],
}

const EXTRACTION_SPECS: &[ExtractionSpec] = &[
    ExtractionSpec {
        category: EntityCategory::Person,
        sql: "SELECT DISTINCT CONCAT(first_name, ' ', last_name) AS full_name, \
              first_name, last_name, id AS employee_id, location_id \
              FROM employee \
              WHERE first_name IS NOT NULL AND last_name IS NOT NULL \
              AND TRIM(first_name) <> '' AND TRIM(last_name) <> ''",
        name_column: "full_name",
        extra_text_columns: &[],
        metadata_columns: &["first_name", "last_name", "employee_id", "location_id"],
    },
    ExtractionSpec {
        category: EntityCategory::Place,
        sql: "SELECT DISTINCT name, id AS location_id, code \
              FROM location \
              WHERE name IS NOT NULL AND TRIM(name) <> ''",
        name_column: "name",
        extra_text_columns: &["code"],
        metadata_columns: &["location_id", "code"],
    },
    ExtractionSpec {
        category: EntityCategory::Activity,
        sql: "SELECT DISTINCT description AS name, id AS activity_id, code, \
              type AS activity_type, active \
              FROM activity \
              WHERE description IS NOT NULL AND TRIM(description) <> ''",
        name_column: "name",
        extra_text_columns: &["code"],
        metadata_columns: &["activity_id", "code", "activity_type", "active"],
    },
    ExtractionSpec {
        category: EntityCategory::Department,
        sql: "SELECT DISTINCT department AS name \
              FROM employee \
              WHERE department IS NOT NULL AND TRIM(department) <> ''",
        name_column: "name",
        extra_text_columns: &[],
        metadata_columns: &[],
    },
];

fn spec_for(category: EntityCategory) -> &'static ExtractionSpec {
    EXTRACTION_SPECS
        .iter()
        .find(|spec| spec.category == category)
        .expect("extraction spec exists for every category")
}

/// Outcome of indexing one category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    pub category: EntityCategory,
    pub total_extracted: usize,
    pub successfully_indexed: usize,
    pub duplicates_skipped: usize,
    pub errors: Vec<String>,
}

impl IndexStats {
    fn empty(category: EntityCategory) -> Self {
        Self {
            category,
            total_extracted: 0,
            successfully_indexed: 0,
            duplicates_skipped: 0,
            errors: Vec::new(),
        }
    }

    fn failed(category: EntityCategory, error: String) -> Self {
        let mut stats = Self::empty(category);
        stats.errors.push(error);
        stats
    }
}

pub struct EntityIndexer {
    warehouse: Arc<dyn Warehouse>,
    index: Arc<EntityIndex>,
}

impl EntityIndexer {
    pub fn new(warehouse: Arc<dyn Warehouse>, index: Arc<EntityIndex>) -> Self {
        Self { warehouse, index }
    }

    /// Build the index for one category. Values already present (in this run
    /// or from a previous build) are skipped, not overwritten.
    pub async fn build_index(&self, category: EntityCategory, reset: bool) -> IndexStats {
        let spec = spec_for(category);
        let mut stats = IndexStats::empty(category);

        if reset {
            if let Err(e) = self.index.reset(category) {
                stats.errors.push(format!("Failed to reset {}: {}", category, e));
                return stats;
            }
        }

        let output = match self.warehouse.execute(spec.sql).await {
            Ok(output) => output,
            Err(e) => {
                error!(%category, error = %e, "entity extraction query failed");
                stats.errors.push(format!("Extraction query failed: {}", e));
                return stats;
            }
        };

        stats.total_extracted = output.rows.len();
        let mut seen: HashSet<String> = HashSet::new();

        for row in &output.rows {
            let name = row
                .get(spec.name_column)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .unwrap_or("");
            if name.is_empty() {
                continue;
            }

            let name_lower = name.to_lowercase();
            if seen.contains(&name_lower) || self.index.contains(category, name) {
                stats.duplicates_skipped += 1;
                continue;
            }
            seen.insert(name_lower);

            let mut metadata = HashMap::new();
            metadata.insert("category".to_string(), category.to_string());
            metadata.insert("source".to_string(), "warehouse".to_string());
            for column in spec.metadata_columns {
                if let Some(value) = row.get(*column) {
                    if !value.is_null() {
                        metadata.insert(
                            (*column).to_string(),
                            value.as_str().map(String::from).unwrap_or_else(|| value.to_string()),
                        );
                    }
                }
            }

            match self.index.insert(name, category, metadata.clone()).await {
                Ok(()) => stats.successfully_indexed += 1,
                Err(e) => stats.errors.push(format!("Failed to index '{}': {}", name, e)),
            }

            // Index alternative handles (codes) as their own records so a
            // query like "location 061" resolves without a name lookup.
            for column in spec.extra_text_columns {
                let value = row
                    .get(*column)
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .unwrap_or("");
                if value.is_empty() {
                    continue;
                }
                let value_lower = value.to_lowercase();
                if seen.contains(&value_lower) || self.index.contains(category, value) {
                    continue;
                }
                seen.insert(value_lower);
                match self.index.insert(value, category, metadata.clone()).await {
                    Ok(()) => stats.successfully_indexed += 1,
                    Err(e) => stats.errors.push(format!("Failed to index '{}': {}", value, e)),
                }
            }
        }

        if let Err(e) = self.index.persist(category) {
            warn!(%category, error = %e, "failed to persist partition");
            stats.errors.push(format!("Failed to persist {}: {}", category, e));
        }

        info!(
            %category,
            extracted = stats.total_extracted,
            indexed = stats.successfully_indexed,
            duplicates = stats.duplicates_skipped,
            errors = stats.errors.len(),
            "index build complete"
        );
        stats
    }

    /// Build every category. A failing category records its errors and does
    /// not abort the siblings.
    pub async fn build_all(&self, reset: bool) -> HashMap<EntityCategory, IndexStats> {
        let mut results = HashMap::new();
        for category in EntityCategory::ALL {
            results.insert(category, self.build_index(category, reset).await);
        }

        let total: usize = results.values().map(|s| s.successfully_indexed).sum();
        let errors: usize = results.values().map(|s| s.errors.len()).sum();
        info!(total_indexed = total, total_errors = errors, "full index build complete");
        results
    }

    /// Reset and rebuild one category from current warehouse data.
    pub async fn refresh(&self, category: EntityCategory) -> IndexStats {
        match self.index.reset(category) {
            Ok(()) => self.build_index(category, false).await,
            Err(e) => IndexStats::failed(category, format!("Failed to reset {}: {}", category, e)),
        }
    }

    /// Check the warehouse has the tables the extraction queries need,
    /// without attempting an indexing run.
    pub async fn validate_sources(&self) -> ValidationReport {
        let mut report = ValidationReport::ok();

        match self.warehouse.list_tables().await {
            Ok(tables) => {
                if tables.is_empty() {
                    report.warning("No tables found in warehouse schema");
                }
                let present: HashSet<&str> = tables.iter().map(String::as_str).collect();
                for required in crate::catalog::REQUIRED_SOURCE_TABLES {
                    if !present.contains(required) {
                        report.error(format!("Missing required source table: {}", required));
                    }
                }
            }
            Err(e) => {
                report.error(format!("Warehouse connectivity issue: {}", e));
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::CharGramEmbedder;
    use crate::error::AssistantError;
    use crate::warehouse::QueryOutput;
    use async_trait::async_trait;
    use serde_json::json;

    /// Warehouse stub returning canned rows per table mentioned in the SQL.
    struct FakeWarehouse {
        tables: Vec<String>,
        fail_activity: bool,
    }

    impl FakeWarehouse {
        fn new() -> Self {
            Self {
                tables: vec![
                    "employee".to_string(),
                    "location".to_string(),
                    "activity".to_string(),
                    "time_entry".to_string(),
                ],
                fail_activity: false,
            }
        }

        fn rows(values: Vec<serde_json::Value>) -> QueryOutput {
            let rows: Vec<serde_json::Map<String, serde_json::Value>> = values
                .into_iter()
                .map(|v| v.as_object().unwrap().clone())
                .collect();
            QueryOutput {
                row_count: rows.len(),
                rows,
                job_id: None,
                bytes_processed: None,
            }
        }
    }

    #[async_trait]
    impl Warehouse for FakeWarehouse {
        async fn list_tables(&self) -> crate::error::Result<Vec<String>> {
            Ok(self.tables.clone())
        }

        async fn schema_ddl(&self) -> crate::error::Result<String> {
            Ok(String::new())
        }

        async fn dry_run(&self, _sql: &str) -> crate::error::Result<()> {
            Ok(())
        }

        async fn execute(&self, sql: &str) -> crate::error::Result<QueryOutput> {
            if sql.contains("full_name") {
                return Ok(Self::rows(vec![
                    json!({"full_name": "Rosalinda Rodriguez", "first_name": "Rosalinda",
                           "last_name": "Rodriguez", "employee_id": 7, "location_id": 3}),
                    json!({"full_name": "rosalinda rodriguez", "first_name": "rosalinda",
                           "last_name": "rodriguez", "employee_id": 8, "location_id": 3}),
                    json!({"full_name": "Marcus Webb", "first_name": "Marcus",
                           "last_name": "Webb", "employee_id": 9, "location_id": 1}),
                ]));
            }
            if sql.contains("FROM location") {
                return Ok(Self::rows(vec![
                    json!({"name": "Downtown High School", "location_id": 3, "code": "061"}),
                ]));
            }
            if sql.contains("FROM activity") {
                if self.fail_activity {
                    return Err(AssistantError::Execution("activity table offline".into()));
                }
                return Ok(Self::rows(vec![
                    json!({"name": "Regular Teaching", "activity_id": 1, "code": "REG",
                           "activity_type": "REGULAR", "active": "true"}),
                ]));
            }
            // Department extraction
            Ok(Self::rows(vec![json!({"name": "Mathematics"})]))
        }
    }

    fn indexer(warehouse: FakeWarehouse) -> (EntityIndexer, Arc<EntityIndex>) {
        let index = Arc::new(EntityIndex::new(
            Arc::new(CharGramEmbedder::new()),
            0.5,
            None,
        ));
        (
            EntityIndexer::new(Arc::new(warehouse), Arc::clone(&index)),
            index,
        )
    }

    #[tokio::test]
    async fn test_build_skips_case_insensitive_duplicates() {
        let (indexer, index) = indexer(FakeWarehouse::new());
        let stats = indexer.build_index(EntityCategory::Person, false).await;

        assert_eq!(stats.total_extracted, 3);
        assert_eq!(stats.successfully_indexed, 2);
        assert_eq!(stats.duplicates_skipped, 1);
        assert!(stats.errors.is_empty());
        assert_eq!(index.count(EntityCategory::Person), 2);
    }

    #[tokio::test]
    async fn test_second_build_without_reset_is_idempotent() {
        let (indexer, index) = indexer(FakeWarehouse::new());
        let first = indexer.build_index(EntityCategory::Place, false).await;
        // Name plus its code handle.
        assert_eq!(first.successfully_indexed, 2);
        assert_eq!(index.count(EntityCategory::Place), 2);

        let second = indexer.build_index(EntityCategory::Place, false).await;
        assert_eq!(second.duplicates_skipped, second.total_extracted);
        assert_eq!(second.successfully_indexed, 0);
        assert_eq!(index.count(EntityCategory::Place), 2);
    }

    #[tokio::test]
    async fn test_metadata_columns_are_carried() {
        let (indexer, index) = indexer(FakeWarehouse::new());
        indexer.build_index(EntityCategory::Place, false).await;

        let matches = index
            .search("Downtown High School", EntityCategory::Place, 1)
            .await
            .unwrap();
        assert_eq!(matches[0].metadata["code"], "061");
        assert_eq!(matches[0].metadata["source"], "warehouse");
    }

    #[tokio::test]
    async fn test_failed_category_does_not_abort_siblings() {
        let mut warehouse = FakeWarehouse::new();
        warehouse.fail_activity = true;
        let (indexer, index) = indexer(warehouse);

        let results = indexer.build_all(false).await;
        assert!(!results[&EntityCategory::Activity].errors.is_empty());
        assert_eq!(results[&EntityCategory::Activity].successfully_indexed, 0);
        assert!(results[&EntityCategory::Person].successfully_indexed > 0);
        assert!(index.count(EntityCategory::Person) > 0);
    }

    #[tokio::test]
    async fn test_refresh_replaces_partition() {
        let (indexer, index) = indexer(FakeWarehouse::new());
        indexer.build_index(EntityCategory::Place, false).await;

        let stats = indexer.refresh(EntityCategory::Place).await;
        assert_eq!(stats.duplicates_skipped, 0);
        assert_eq!(stats.successfully_indexed, 2);
        assert_eq!(index.count(EntityCategory::Place), 2);
    }

    #[tokio::test]
    async fn test_validate_sources_reports_missing_table() {
        let mut warehouse = FakeWarehouse::new();
        warehouse.tables = vec!["employee".to_string()];
        let (indexer, _) = indexer(warehouse);

        let report = indexer.validate_sources().await;
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("location")));
        assert!(report.errors.iter().any(|e| e.contains("activity")));
    }
}

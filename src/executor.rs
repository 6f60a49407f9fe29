//! Query validation and execution.
//!
//! The read-only guarantee of the whole system is enforced here and only
//! here: any destructive keyword anywhere in the statement rejects it before
//! the warehouse is touched. Valid queries are dry-run first, then executed,
//! and zero-row results come back enriched with entity suggestions.

use crate::error::{AssistantError, Result};
use crate::generator::strip_code_fences;
use crate::resolver::{EntityResolver, NoResultsAnalysis};
use crate::session::TurnContext;
use crate::warehouse::{normalize_row, Warehouse};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The whole destructive surface of the warehouse dialect. Substring scan by
/// design: false positives are acceptable, false negatives are not.
const DESTRUCTIVE_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "UPDATE", "INSERT", "CREATE", "ALTER", "TRUNCATE",
];

/// Result of a validated execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub rows: Vec<serde_json::Map<String, Value>>,
    pub row_count: usize,
    pub job_id: Option<String>,
    pub bytes_processed: Option<u64>,
    /// Present when the query returned zero rows and suggestions were built.
    pub entity_suggestions: Option<NoResultsAnalysis>,
    pub no_results_analysis: bool,
}

pub struct QueryExecutor {
    warehouse: Arc<dyn Warehouse>,
    resolver: Arc<EntityResolver>,
    query_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(
        warehouse: Arc<dyn Warehouse>,
        resolver: Arc<EntityResolver>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            warehouse,
            resolver,
            query_timeout,
        }
    }

    /// Validate and execute one statement. Errors are reported, never
    /// retried; a malformed query won't fix itself.
    pub async fn validate_and_run(
        &self,
        sql: &str,
        context: Option<&TurnContext>,
    ) -> Result<ExecutionOutcome> {
        let sql = strip_code_fences(sql);

        let upper = sql.to_uppercase();
        for keyword in DESTRUCTIVE_KEYWORDS {
            if upper.contains(keyword) {
                warn!(keyword, "rejected destructive statement");
                return Err(AssistantError::DestructiveStatement((*keyword).to_string()));
            }
        }

        info!(sql = %sql, "validating query");
        tokio::time::timeout(self.query_timeout, self.warehouse.dry_run(&sql))
            .await
            .map_err(|_| {
                AssistantError::Timeout(self.query_timeout.as_secs(), "query dry run".to_string())
            })??;

        let output = tokio::time::timeout(self.query_timeout, self.warehouse.execute(&sql))
            .await
            .map_err(|_| {
                AssistantError::Timeout(self.query_timeout.as_secs(), "query execution".to_string())
            })??;

        let rows: Vec<serde_json::Map<String, Value>> =
            output.rows.into_iter().map(normalize_row).collect();
        info!(rows = rows.len(), job_id = ?output.job_id, "query executed");

        let mut outcome = ExecutionOutcome {
            row_count: rows.len(),
            rows,
            job_id: output.job_id,
            bytes_processed: output.bytes_processed,
            entity_suggestions: None,
            no_results_analysis: false,
        };

        if outcome.rows.is_empty() {
            let original_query = context
                .and_then(|c| c.last_query.clone())
                .unwrap_or_else(|| sql.clone());
            let analysis = self
                .resolver
                .handle_no_results_case(&original_query, &sql)
                .await;
            info!(
                suggestions = analysis.suggestions.len(),
                "no results, attached entity suggestions"
            );
            outcome.entity_suggestions = Some(analysis);
            outcome.no_results_analysis = true;
        }

        Ok(outcome)
    }
}

//! Warehouse access boundary.
//!
//! The core only needs four operations from the warehouse: list tables, read
//! the schema as DDL text, dry-run a statement, and execute one. The HTTP
//! implementation speaks the Trino statement protocol (POST /v1/statement,
//! follow nextUri until the result set is drained).

use crate::catalog;
use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

/// Result of an executed query, rows normalized to JSON-safe values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryOutput {
    pub rows: Vec<serde_json::Map<String, Value>>,
    pub row_count: usize,
    pub job_id: Option<String>,
    pub bytes_processed: Option<u64>,
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Schema of every table as CREATE TABLE text, with description comments.
    async fn schema_ddl(&self) -> Result<String>;

    /// Cost/syntax validation without data movement.
    async fn dry_run(&self, sql: &str) -> Result<()>;

    async fn execute(&self, sql: &str) -> Result<QueryOutput>;
}

/// Trino-style REST client.
pub struct HttpWarehouse {
    client: reqwest::Client,
    base_url: String,
    user: String,
    catalog: String,
    schema: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    id: Option<String>,
    next_uri: Option<String>,
    columns: Option<Vec<StatementColumn>>,
    data: Option<Vec<Vec<Value>>>,
    error: Option<StatementError>,
}

#[derive(Debug, Deserialize)]
struct StatementColumn {
    name: String,
}

#[derive(Debug, Deserialize)]
struct StatementError {
    message: String,
}

impl HttpWarehouse {
    pub fn new(base_url: String, user: String, catalog: String, schema: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            user,
            catalog,
            schema,
        }
    }

    /// Submit a statement and drain the paged result set.
    async fn run_statement(&self, sql: &str) -> Result<QueryOutput> {
        let response = self
            .client
            .post(format!("{}/v1/statement", self.base_url))
            .header("X-Trino-User", &self.user)
            .header("X-Trino-Catalog", &self.catalog)
            .header("X-Trino-Schema", &self.schema)
            .body(sql.to_string())
            .send()
            .await
            .map_err(|e| AssistantError::Warehouse(format!("Statement submission failed: {}", e)))?;

        let mut page: StatementResponse = response
            .json()
            .await
            .map_err(|e| AssistantError::Warehouse(format!("Malformed statement response: {}", e)))?;

        let job_id = page.id.clone();
        let mut columns: Vec<String> = Vec::new();
        let mut raw_rows: Vec<Vec<Value>> = Vec::new();

        loop {
            if let Some(err) = page.error {
                return Err(AssistantError::Warehouse(err.message));
            }
            if let Some(cols) = page.columns.take() {
                if columns.is_empty() {
                    columns = cols.into_iter().map(|c| c.name).collect();
                }
            }
            if let Some(data) = page.data.take() {
                raw_rows.extend(data);
            }

            let Some(next_uri) = page.next_uri.take() else {
                break;
            };
            page = self
                .client
                .get(&next_uri)
                .header("X-Trino-User", &self.user)
                .send()
                .await
                .map_err(|e| AssistantError::Warehouse(format!("Result fetch failed: {}", e)))?
                .json()
                .await
                .map_err(|e| AssistantError::Warehouse(format!("Malformed result page: {}", e)))?;
        }

        let rows: Vec<serde_json::Map<String, Value>> = raw_rows
            .into_iter()
            .map(|row| {
                columns
                    .iter()
                    .zip(row)
                    .map(|(name, value)| (name.clone(), normalize_value(value)))
                    .collect()
            })
            .collect();

        debug!(rows = rows.len(), job_id = ?job_id, "statement complete");
        Ok(QueryOutput {
            row_count: rows.len(),
            rows,
            job_id,
            bytes_processed: None,
        })
    }
}

#[async_trait]
impl Warehouse for HttpWarehouse {
    async fn list_tables(&self) -> Result<Vec<String>> {
        let output = self.run_statement("SHOW TABLES").await?;
        Ok(output
            .rows
            .iter()
            .filter_map(|row| row.values().next().and_then(|v| v.as_str()).map(String::from))
            .collect())
    }

    async fn schema_ddl(&self) -> Result<String> {
        let tables = self.list_tables().await?;
        let mut schema_parts: Vec<String> = Vec::new();

        for table in &tables {
            let described = match self.run_statement(&format!("DESCRIBE {}", table)).await {
                Ok(output) => output,
                Err(e) => {
                    error!(table, error = %e, "failed to describe table");
                    continue;
                }
            };

            if let Some(description) = catalog::table_description(table) {
                schema_parts.push(format!("-- {}", description));
            }
            schema_parts.push(format!("CREATE TABLE {} (", table));
            let column_lines: Vec<String> = described
                .rows
                .iter()
                .filter_map(|row| {
                    let name = row.get("Column").and_then(|v| v.as_str())?;
                    let dtype = row.get("Type").and_then(|v| v.as_str())?;
                    Some(format!("  {} {}", name, dtype))
                })
                .collect();
            schema_parts.push(column_lines.join(",\n"));
            schema_parts.push(");".to_string());
            schema_parts.push(String::new());
        }

        info!(tables = tables.len(), "assembled schema DDL");
        Ok(schema_parts.join("\n"))
    }

    async fn dry_run(&self, sql: &str) -> Result<()> {
        self.run_statement(&format!("EXPLAIN (TYPE VALIDATE) {}", sql))
            .await
            .map_err(|e| match e {
                AssistantError::Warehouse(msg) => AssistantError::Validation(msg),
                other => other,
            })?;
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<QueryOutput> {
        self.run_statement(sql)
            .await
            .map_err(|e| match e {
                AssistantError::Warehouse(msg) => AssistantError::Execution(msg),
                other => other,
            })
    }
}

/// Normalize one cell into a JSON-safe scalar: timestamps become ISO-8601
/// strings, composite values become their string rendering.
pub fn normalize_value(value: Value) -> Value {
    match value {
        Value::String(s) => {
            // Warehouse timestamps arrive as "2024-03-01 08:30:00.000"; emit
            // ISO-8601 so downstream consumers get one date shape.
            if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f") {
                return Value::String(dt.format("%Y-%m-%dT%H:%M:%S").to_string());
            }
            Value::String(s)
        }
        Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
        primitive => primitive,
    }
}

/// Normalize a whole row map in place.
pub fn normalize_row(row: serde_json::Map<String, Value>) -> serde_json::Map<String, Value> {
    row.into_iter()
        .map(|(k, v)| (k, normalize_value(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_is_normalized_to_iso() {
        let normalized = normalize_value(Value::String("2024-03-01 08:30:00.000".into()));
        assert_eq!(normalized, Value::String("2024-03-01T08:30:00".into()));
    }

    #[test]
    fn test_composites_become_strings() {
        let normalized = normalize_value(serde_json::json!({"a": 1}));
        assert_eq!(normalized, Value::String("{\"a\":1}".into()));

        let normalized = normalize_value(serde_json::json!([1, 2]));
        assert_eq!(normalized, Value::String("[1,2]".into()));
    }

    #[test]
    fn test_primitives_pass_through() {
        assert_eq!(normalize_value(serde_json::json!(42)), serde_json::json!(42));
        assert_eq!(normalize_value(serde_json::json!(true)), serde_json::json!(true));
        assert_eq!(
            normalize_value(Value::String("061".into())),
            Value::String("061".into())
        );
    }
}

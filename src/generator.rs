//! NL-to-SQL generation: one prompt, one model call, cleaned output.
//!
//! Safety is not trusted to the model; the executor enforces read-only
//! semantics downstream. This module only guarantees shape: a single
//! fence-free statement with a row cap on uncapped SELECTs.

use crate::catalog;
use crate::error::{AssistantError, Result};
use crate::llm::GenerativeModel;
use crate::resolver::{EntityResolver, ResolutionResult};
use crate::session::TurnContext;
use crate::warehouse::Warehouse;
use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::ast::Statement;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Generated SQL plus the resolution trace that shaped it.
#[derive(Debug, Clone)]
pub struct GeneratedSql {
    pub sql: String,
    pub resolution: ResolutionResult,
}

lazy_static! {
    static ref LEADING_FENCE: Regex = Regex::new(r"(?i)^```(?:sql)?\s*").unwrap();
    static ref TRAILING_FENCE: Regex = Regex::new(r"\s*```$").unwrap();
}

/// Strip markdown code fencing, surrounding whitespace and a trailing
/// semicolon from model output.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let without_leading = LEADING_FENCE.replace(trimmed, "");
    let without_trailing = TRAILING_FENCE.replace(&without_leading, "");
    without_trailing.trim().trim_end_matches(';').trim().to_string()
}

pub struct SqlGenerator {
    model: Arc<dyn GenerativeModel>,
    warehouse: Arc<dyn Warehouse>,
    resolver: Arc<EntityResolver>,
    row_limit: u64,
    generation_timeout: Duration,
}

impl SqlGenerator {
    pub fn new(
        model: Arc<dyn GenerativeModel>,
        warehouse: Arc<dyn Warehouse>,
        resolver: Arc<EntityResolver>,
        row_limit: u64,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            model,
            warehouse,
            resolver,
            row_limit,
            generation_timeout,
        }
    }

    /// Resolve entities, assemble the prompt and produce one SQL statement.
    pub async fn generate(
        &self,
        question: &str,
        context: Option<&TurnContext>,
    ) -> Result<GeneratedSql> {
        let resolution = self.resolver.enhance_query(question, context).await;
        let resolution_context = self.resolver.resolution_context(&resolution);

        let documentation = catalog::relevant_documentation(&resolution.enhanced_query);
        let schema_ddl = self.warehouse.schema_ddl().await?;
        let conversation_context = context.map(TurnContext::prompt_block).unwrap_or_default();

        let prompt = catalog::nl2sql_prompt(
            &schema_ddl,
            &documentation,
            &resolution_context,
            &conversation_context,
            &resolution.enhanced_query,
            self.row_limit,
        );
        debug!(chars = prompt.len(), "assembled generation prompt");

        let raw = tokio::time::timeout(self.generation_timeout, self.model.generate(&prompt))
            .await
            .map_err(|_| {
                AssistantError::Timeout(
                    self.generation_timeout.as_secs(),
                    "SQL generation".to_string(),
                )
            })??;

        let sql = strip_code_fences(&raw);
        if sql.is_empty() {
            return Err(AssistantError::Generation(
                "Model produced no usable SQL".to_string(),
            ));
        }

        let sql = enforce_row_cap(&sql, self.row_limit);
        info!(question, sql = %sql, "generated SQL");

        Ok(GeneratedSql { sql, resolution })
    }
}

/// Append `LIMIT n` to a SELECT statement that has no row-limiting clause.
/// Non-SELECT statements pass through untouched (the executor rejects them).
fn enforce_row_cap(sql: &str, row_limit: u64) -> String {
    match Parser::parse_sql(&GenericDialect {}, sql) {
        Ok(statements) => match statements.as_slice() {
            [Statement::Query(query)] if query.limit.is_none() && query.fetch.is_none() => {
                format!("{} LIMIT {}", sql, row_limit)
            }
            _ => sql.to_string(),
        },
        Err(_) => {
            // Dialect-specific syntax the generic parser rejects: fall back
            // to the plain-text check.
            let upper = sql.to_uppercase();
            if upper.trim_start().starts_with("SELECT") && !upper.contains("LIMIT") {
                format!("{} LIMIT {}", sql, row_limit)
            } else {
                sql.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::CharGramEmbedder;
    use crate::extract::HeuristicMentionExtractor;
    use crate::index::{EntityCategory, EntityIndex};
    use crate::warehouse::QueryOutput;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Model fake that returns a canned response and records the prompt.
    struct ScriptedModel {
        response: String,
        last_prompt: Mutex<Option<String>>,
    }

    impl ScriptedModel {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                last_prompt: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl GenerativeModel for ScriptedModel {
        async fn generate(&self, prompt: &str) -> Result<String> {
            *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
            Ok(self.response.clone())
        }
    }

    struct StubWarehouse;

    #[async_trait]
    impl Warehouse for StubWarehouse {
        async fn list_tables(&self) -> Result<Vec<String>> {
            Ok(vec!["employee".to_string(), "location".to_string()])
        }

        async fn schema_ddl(&self) -> Result<String> {
            Ok("CREATE TABLE employee (\n  id bigint,\n  first_name varchar\n);".to_string())
        }

        async fn dry_run(&self, _sql: &str) -> Result<()> {
            Ok(())
        }

        async fn execute(&self, _sql: &str) -> Result<QueryOutput> {
            Ok(QueryOutput::default())
        }
    }

    async fn generator_with(model: Arc<ScriptedModel>) -> SqlGenerator {
        let index = Arc::new(EntityIndex::new(Arc::new(CharGramEmbedder::new()), 0.5, None));
        index
            .insert("Rosalinda Rodriguez", EntityCategory::Person, HashMap::new())
            .await
            .unwrap();
        let resolver = Arc::new(EntityResolver::new(
            Arc::new(HeuristicMentionExtractor::new()),
            index,
            0.3,
            0.5,
            3,
        ));
        SqlGenerator::new(
            model,
            Arc::new(StubWarehouse),
            resolver,
            80,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(
            strip_code_fences("```sql\nSELECT 1\n```"),
            "SELECT 1"
        );
        assert_eq!(strip_code_fences("```\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fences("  SELECT 1;  "), "SELECT 1");
        assert_eq!(strip_code_fences("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_row_cap_appended_to_uncapped_select() {
        assert_eq!(
            enforce_row_cap("SELECT * FROM employee", 80),
            "SELECT * FROM employee LIMIT 80"
        );
    }

    #[test]
    fn test_existing_limit_is_left_unchanged() {
        let sql = "SELECT * FROM employee LIMIT 5";
        assert_eq!(enforce_row_cap(sql, 80), sql);
    }

    #[test]
    fn test_subquery_limit_does_not_satisfy_outer_cap() {
        // The plain-text check would be fooled here; the parser is not.
        let sql = "SELECT * FROM (SELECT id FROM employee LIMIT 5) t";
        assert_eq!(enforce_row_cap(sql, 80), format!("{} LIMIT 80", sql));
    }

    #[test]
    fn test_non_select_passes_through() {
        let sql = "DROP TABLE employee";
        assert_eq!(enforce_row_cap(sql, 80), sql);
    }

    #[tokio::test]
    async fn test_generate_cleans_and_caps_output() {
        let model = Arc::new(ScriptedModel::new(
            "```sql\nSELECT l.code, l.name FROM employee e JOIN location l ON e.location_id = l.id\n```",
        ));
        let generator = generator_with(Arc::clone(&model)).await;

        let generated = generator
            .generate("Which location does Rosalinda Rodriguz work at?", None)
            .await
            .unwrap();

        assert!(generated.sql.ends_with("LIMIT 80"));
        assert!(!generated.sql.contains("```"));
        assert_eq!(generated.resolution.resolved_entities.len(), 1);
    }

    #[tokio::test]
    async fn test_prompt_contains_resolved_entity_and_schema() {
        let model = Arc::new(ScriptedModel::new("SELECT 1"));
        let generator = generator_with(Arc::clone(&model)).await;

        generator
            .generate("Which location does Rosalinda Rodriguz work at?", None)
            .await
            .unwrap();

        let prompt = model.last_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("Rosalinda Rodriguez"));
        assert!(prompt.contains("ENTITY RESOLUTION CONTEXT"));
        assert!(prompt.contains("CREATE TABLE employee"));
        assert!(prompt.contains("Business Rules"));
    }

    #[tokio::test]
    async fn test_prior_turn_block_is_included() {
        let model = Arc::new(ScriptedModel::new("SELECT 1"));
        let generator = generator_with(Arc::clone(&model)).await;
        let context = TurnContext::builder("s1")
            .last_query("Which location does Rosalinda Rodriguez work at?")
            .last_response("Downtown High School")
            .build();

        generator
            .generate("who else works there?", Some(&context))
            .await
            .unwrap();

        let prompt = model.last_prompt.lock().unwrap().clone().unwrap();
        assert!(prompt.contains("CONVERSATION CONTEXT"));
        assert!(prompt.contains("Previous Answer: Downtown High School"));
    }

    #[tokio::test]
    async fn test_empty_model_output_is_a_generation_error() {
        let model = Arc::new(ScriptedModel::new("```sql\n```"));
        let generator = generator_with(model).await;

        let err = generator.generate("count employees", None).await.unwrap_err();
        assert!(matches!(err, AssistantError::Generation(_)));
    }
}

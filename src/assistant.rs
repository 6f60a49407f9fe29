//! Assistant facade: the operations exposed to callers (an HTTP chat layer,
//! the CLI). Clients are injected once at construction; nothing in here is a
//! global.

use crate::config::{AssistantConfig, ValidationReport};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::executor::{ExecutionOutcome, QueryExecutor};
use crate::extract::{ModelMentionExtractor, TwoStageExtractor};
use crate::generator::{GeneratedSql, SqlGenerator};
use crate::index::{EntityCategory, EntityIndex};
use crate::indexer::{EntityIndexer, IndexStats};
use crate::llm::GenerativeModel;
use crate::resolver::{EntityResolver, Suggestion};
use crate::session::{ConversationMemory, TurnContext};
use crate::warehouse::Warehouse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info_span, Instrument};
use uuid::Uuid;

pub struct Assistant {
    config: AssistantConfig,
    index: Arc<EntityIndex>,
    resolver: Arc<EntityResolver>,
    generator: SqlGenerator,
    executor: QueryExecutor,
    indexer: EntityIndexer,
    memory: Option<Arc<dyn ConversationMemory>>,
}

impl Assistant {
    pub fn new(
        config: AssistantConfig,
        model: Arc<dyn GenerativeModel>,
        embedder: Arc<dyn Embedder>,
        warehouse: Arc<dyn Warehouse>,
        memory: Option<Arc<dyn ConversationMemory>>,
    ) -> Self {
        let index = Arc::new(EntityIndex::new(
            embedder,
            config.confidence_threshold,
            Some(config.persist_dir.clone()),
        ));

        let primary: Arc<dyn crate::extract::MentionExtractor> =
            Arc::new(ModelMentionExtractor::new(Arc::clone(&model)));
        let extractor = Arc::new(TwoStageExtractor::new(Some(primary)));

        let resolver = Arc::new(EntityResolver::new(
            extractor,
            Arc::clone(&index),
            config.min_query_confidence,
            config.exploration_threshold,
            config.max_suggestions_per_entity,
        ));

        let generator = SqlGenerator::new(
            Arc::clone(&model),
            Arc::clone(&warehouse),
            Arc::clone(&resolver),
            config.row_limit,
            Duration::from_secs(config.generation_timeout_secs),
        );

        let executor = QueryExecutor::new(
            Arc::clone(&warehouse),
            Arc::clone(&resolver),
            Duration::from_secs(config.query_timeout_secs),
        );

        let indexer = EntityIndexer::new(warehouse, Arc::clone(&index));

        Self {
            config,
            index,
            resolver,
            generator,
            executor,
            indexer,
            memory,
        }
    }

    async fn context_for(&self, session_id: Option<&str>) -> Option<TurnContext> {
        let (memory, session_id) = (self.memory.as_ref()?, session_id?);
        memory.turn_context(session_id).await
    }

    /// Resolve entities in `question` and generate one SQL statement.
    pub async fn resolve_and_generate_sql(
        &self,
        question: &str,
        session_id: Option<&str>,
    ) -> Result<GeneratedSql> {
        let request_id = Uuid::new_v4();
        let context = self.context_for(session_id).await;
        self.generator
            .generate(question, context.as_ref())
            .instrument(info_span!("generate", %request_id))
            .await
    }

    /// Validate and execute SQL, enriching empty results with suggestions.
    pub async fn validate_and_execute(
        &self,
        sql: &str,
        session_id: Option<&str>,
    ) -> Result<ExecutionOutcome> {
        let request_id = Uuid::new_v4();
        let context = self.context_for(session_id).await;
        self.executor
            .validate_and_run(sql, context.as_ref())
            .instrument(info_span!("execute", %request_id))
            .await
    }

    /// "Did you mean" candidates for the entities in a question.
    pub async fn suggest_corrections(&self, question: &str) -> Vec<Suggestion> {
        self.resolver.suggest_corrections(question, None).await
    }

    /// Rebuild the entity index: one category, or all of them.
    pub async fn rebuild_entity_index(
        &self,
        category: Option<EntityCategory>,
        reset: bool,
    ) -> HashMap<EntityCategory, IndexStats> {
        match category {
            Some(category) => {
                let stats = if reset {
                    self.indexer.refresh(category).await
                } else {
                    self.indexer.build_index(category, false).await
                };
                HashMap::from([(category, stats)])
            }
            None => self.indexer.build_all(reset).await,
        }
    }

    /// Validate configuration and warehouse sources without indexing.
    pub async fn check(&self) -> ValidationReport {
        let mut report = self.config.validate();
        let sources = self.indexer.validate_sources().await;
        report.errors.extend(sources.errors);
        report.warnings.extend(sources.warnings);
        report.valid = report.errors.is_empty();
        report
    }

    /// Record counts per entity category.
    pub fn index_stats(&self) -> HashMap<EntityCategory, usize> {
        self.index.stats()
    }
}

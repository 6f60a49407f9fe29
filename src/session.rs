//! Conversation turn context, consumed from an externally-owned memory.
//!
//! The core never writes conversation state; it reads the previous turn to
//! bias extraction and prompt assembly. The context is a closed struct with
//! named fields rather than a string-keyed bag, built through a builder.

use crate::index::EntityMatch;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Prior-turn context for one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnContext {
    pub session_id: String,
    pub last_query: Option<String>,
    pub last_response: Option<String>,
    /// Small sample of the previous result rows (first two), JSON-safe.
    pub last_result_sample: Vec<serde_json::Value>,
    /// Entities resolved on the previous turn.
    pub resolved_entities: Vec<EntityMatch>,
}

impl TurnContext {
    pub fn builder(session_id: impl Into<String>) -> TurnContextBuilder {
        TurnContextBuilder {
            context: TurnContext {
                session_id: session_id.into(),
                ..Default::default()
            },
        }
    }

    /// Render the previous-turn block for the generation prompt; empty when
    /// there is no prior turn.
    pub fn prompt_block(&self) -> String {
        let (Some(last_query), Some(last_response)) = (&self.last_query, &self.last_response)
        else {
            return String::new();
        };

        let mut block = format!(
            "\nCONVERSATION CONTEXT:\nPrevious Question: {}\nPrevious Answer: {}\n",
            last_query, last_response
        );
        if !self.last_result_sample.is_empty() {
            let sample: Vec<&serde_json::Value> = self.last_result_sample.iter().take(2).collect();
            block.push_str(&format!(
                "Previous Query Data Sample: {}\n",
                serde_json::to_string(&sample).unwrap_or_default()
            ));
        }
        block
    }
}

pub struct TurnContextBuilder {
    context: TurnContext,
}

impl TurnContextBuilder {
    pub fn last_query(mut self, query: impl Into<String>) -> Self {
        self.context.last_query = Some(query.into());
        self
    }

    pub fn last_response(mut self, response: impl Into<String>) -> Self {
        self.context.last_response = Some(response.into());
        self
    }

    pub fn last_result_sample(mut self, sample: Vec<serde_json::Value>) -> Self {
        self.context.last_result_sample = sample;
        self
    }

    pub fn resolved_entities(mut self, entities: Vec<EntityMatch>) -> Self {
        self.context.resolved_entities = entities;
        self
    }

    pub fn build(self) -> TurnContext {
        self.context
    }
}

/// Read-only view of the conversation memory collaborator.
#[async_trait]
pub trait ConversationMemory: Send + Sync {
    async fn turn_context(&self, session_id: &str) -> Option<TurnContext>;
}

/// In-process memory used by the CLI and tests. Production callers supply
/// their own implementation over whatever store they keep sessions in.
#[derive(Default)]
pub struct InMemoryConversationMemory {
    turns: RwLock<HashMap<String, TurnContext>>,
}

impl InMemoryConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_turn(&self, context: TurnContext) {
        let mut turns = self.turns.write().expect("memory lock poisoned");
        turns.insert(context.session_id.clone(), context);
    }
}

#[async_trait]
impl ConversationMemory for InMemoryConversationMemory {
    async fn turn_context(&self, session_id: &str) -> Option<TurnContext> {
        let turns = self.turns.read().expect("memory lock poisoned");
        turns.get(session_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_block_requires_prior_turn() {
        let empty = TurnContext::builder("s1").build();
        assert!(empty.prompt_block().is_empty());
    }

    #[test]
    fn test_prompt_block_includes_sample_rows() {
        let context = TurnContext::builder("s1")
            .last_query("Which location does Rosalinda Rodriguez work at?")
            .last_response("She works at Downtown High School (061).")
            .last_result_sample(vec![serde_json::json!({"code": "061"})])
            .build();

        let block = context.prompt_block();
        assert!(block.contains("Previous Question: Which location"));
        assert!(block.contains("Previous Query Data Sample"));
        assert!(block.contains("061"));
    }

    #[tokio::test]
    async fn test_in_memory_roundtrip() {
        let memory = InMemoryConversationMemory::new();
        memory.record_turn(TurnContext::builder("s1").last_query("q").build());

        let context = memory.turn_context("s1").await.unwrap();
        assert_eq!(context.last_query.as_deref(), Some("q"));
        assert!(memory.turn_context("s2").await.is_none());
    }
}

//! chronoquery: natural-language-to-SQL assistant for a time-management
//! warehouse.
//!
//! Questions are resolved against vector indexes of canonical database
//! values (misspelled names, abbreviated location codes), converted to SQL
//! through a single model call, and executed behind read-only guardrails
//! with "did you mean" recovery on empty results.

pub mod assistant;
pub mod catalog;
pub mod config;
pub mod embedding;
pub mod error;
pub mod executor;
pub mod extract;
pub mod generator;
pub mod index;
pub mod indexer;
pub mod llm;
pub mod resolver;
pub mod session;
pub mod warehouse;

pub use assistant::Assistant;
pub use config::{AssistantConfig, ValidationReport};
pub use error::{AssistantError, Result};
pub use executor::ExecutionOutcome;
pub use generator::GeneratedSql;
pub use index::{EntityCategory, EntityMatch};
pub use indexer::IndexStats;
pub use resolver::{NoResultsAnalysis, ResolutionResult, ResolutionStatus, Suggestion};
pub use session::{ConversationMemory, InMemoryConversationMemory, TurnContext};

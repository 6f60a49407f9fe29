use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssistantError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Entity index error: {0}")]
    Index(String),

    #[error("Mention extraction error: {0}")]
    Extraction(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("SQL generation error: {0}")]
    Generation(String),

    #[error("Destructive operation '{0}' not allowed")]
    DestructiveStatement(String),

    #[error("Query validation failed: {0}")]
    Validation(String),

    #[error("Query execution failed: {0}")]
    Execution(String),

    #[error("Warehouse error: {0}")]
    Warehouse(String),

    #[error("Timed out after {0}s: {1}")]
    Timeout(u64, String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AssistantError>;

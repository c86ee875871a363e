use crate::validation::SchemaViolation;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqlBotError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Failed to extract JSON from model response: {0}")]
    Extraction(String),

    #[error("Schema validation error: {0}")]
    Validation(#[from] SchemaViolation),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Query rejected: {0}")]
    QueryRejected(String),

    #[error("Question is empty")]
    EmptyQuestion,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SqlBotError {
    /// Whether another orchestration attempt could succeed where this one failed.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SqlBotError::EmptyQuestion | SqlBotError::Config(_))
    }
}

impl From<rusqlite::Error> for SqlBotError {
    fn from(err: rusqlite::Error) -> Self {
        SqlBotError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SqlBotError>;

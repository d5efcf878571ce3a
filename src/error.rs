use thiserror::Error;

#[derive(Error, Debug)]
pub enum Text2SqlError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("SQL safety violation: {0}")]
    SafetyViolation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for Text2SqlError {
    fn from(err: rusqlite::Error) -> Self {
        Text2SqlError::Database(err.to_string())
    }
}

impl From<sqlx::Error> for Text2SqlError {
    fn from(err: sqlx::Error) -> Self {
        Text2SqlError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Text2SqlError>;

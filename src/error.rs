use thiserror::Error;

#[derive(Error, Debug)]
pub enum TypometerError {
    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Store Error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV Parsing Error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, TypometerError>;
